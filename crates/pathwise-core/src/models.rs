//! Core data models used throughout Pathwise.
//!
//! These types represent the knowledge-base records, persisted index entries,
//! query results, and roadmap steps that flow through the build and
//! retrieval pipeline.

use serde::{Deserialize, Serialize};

/// Provenance used when a loader does not supply a source file.
pub const UNKNOWN_SOURCE: &str = "unknown";

fn default_source_file() -> String {
    UNKNOWN_SOURCE.to_string()
}

/// A validated knowledge-base record, the unit of retrieval.
///
/// Created by the document loader from a raw JSON record and consumed once
/// by the index builder. `title` and `content` are guaranteed non-empty
/// after trimming once [`SourceDocument::validate`] has passed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub title: String,
    pub url: String,
    pub content: String,
    #[serde(default = "default_source_file")]
    pub source_file: String,
}

impl SourceDocument {
    /// Check the invariants serde cannot express.
    ///
    /// Returns a human-readable reason on failure, suitable for a
    /// per-record rejection log line.
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("field `title` must not be empty".to_string());
        }
        if self.content.trim().is_empty() {
            return Err("field `content` must not be empty".to_string());
        }
        Ok(())
    }

    /// Metadata persisted alongside the document content.
    pub fn metadata(&self) -> EntryMetadata {
        EntryMetadata {
            title: self.title.clone(),
            url: self.url.clone(),
            source_file: self.source_file.clone(),
        }
    }
}

/// Metadata stored next to each index entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub title: String,
    pub url: String,
    #[serde(default = "default_source_file")]
    pub source_file: String,
}

/// The persisted unit of a collection: one document with its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    /// Unique within a collection; re-inserting the same id overwrites.
    pub id: String,
    pub content: String,
    pub metadata: EntryMetadata,
    pub embedding: Vec<f32>,
}

/// How closeness between two embeddings is measured.
///
/// Smaller distances always mean "more similar".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// Squared Euclidean distance.
    #[default]
    L2,
    /// `1 - cosine_similarity`.
    Cosine,
}

impl DistanceMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::L2 => "l2",
            DistanceMetric::Cosine => "cosine",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "l2" => Some(DistanceMetric::L2),
            "cosine" => Some(DistanceMetric::Cosine),
            _ => None,
        }
    }
}

/// Metadata describing a collection's embedding space.
///
/// `model`, `dims`, and `metric` are fixed when the collection is created;
/// vectors from any other space are meaningless against it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionInfo {
    pub name: String,
    pub model: String,
    pub dims: usize,
    pub metric: DistanceMetric,
    /// Unix seconds.
    pub created_at: i64,
    /// Unix seconds of the last upsert.
    pub updated_at: i64,
}

/// One source returned by a retrieval query. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedSource {
    pub title: String,
    pub url: String,
    pub content: String,
    #[serde(default = "default_source_file")]
    pub source_file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
}

/// Whether a query produced results worth presenting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Low,
}

/// Result of a relevance-gated query.
///
/// `Low` confidence always comes with an empty source list: it is the
/// "looked and found nothing good" sentinel, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub relevant_sources: Vec<RetrievedSource>,
    pub confidence: Confidence,
}

impl QueryResult {
    pub fn low() -> Self {
        Self {
            relevant_sources: Vec::new(),
            confidence: Confidence::Low,
        }
    }

    pub fn high(relevant_sources: Vec<RetrievedSource>) -> Self {
        Self {
            relevant_sources,
            confidence: Confidence::High,
        }
    }
}

/// One week of a generated learning roadmap.
///
/// Produced by an external roadmap generator; any fields besides `week`,
/// `learning_objectives`, and `resources` are carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningStep {
    pub week: i64,
    #[serde(default)]
    pub learning_objectives: Vec<String>,
    #[serde(default)]
    pub resources: Vec<RetrievedSource>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl LearningStep {
    pub fn new(week: i64, learning_objectives: Vec<String>) -> Self {
        Self {
            week,
            learning_objectives,
            resources: Vec::new(),
            extra: serde_json::Map::new(),
        }
    }
}
