//! Relevance-gated retrieval.
//!
//! The runtime query path: embed the query, fetch the `k` nearest entries
//! from a [`VectorIndex`], and apply the relevance gate:
//!
//! 1. No hits, or the nearest distance is above `relevance_threshold`
//!    → `{relevant_sources: [], confidence: low}`.
//! 2. Otherwise every returned hit (at most `k`) becomes a
//!    [`RetrievedSource`] and confidence is `high`.
//!
//! Only the gate produces an intentional empty result. Embedding and search
//! failures surface as [`RetrievalError`] so callers can tell "we looked and
//! found nothing good" apart from "we couldn't look".

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::embedding::Embedder;
use crate::models::{CollectionInfo, DistanceMetric, QueryResult, RetrievedSource};
use crate::store::{ensure_same_space, VectorIndex};

/// Failures on the retrieval path.
///
/// Every variant belongs to the "service unavailable" class; a query that
/// simply has no good answer is a [`QueryResult::low`], never an error.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("collection '{0}' does not exist; run the index build first")]
    CollectionMissing(String),

    #[error("index/embedder mismatch: {0}")]
    ModelMismatch(String),

    #[error("failed to embed query: {0}")]
    Embedding(#[source] anyhow::Error),

    #[error("vector search failed: {0}")]
    Search(#[source] anyhow::Error),

    #[error("retrieval timed out after {0}s")]
    Timeout(u64),
}

impl RetrievalError {
    /// True for failures detected while opening the service rather than
    /// while answering a query.
    pub fn is_startup(&self) -> bool {
        matches!(
            self,
            RetrievalError::CollectionMissing(_) | RetrievalError::ModelMismatch(_)
        )
    }
}

/// Tuning knobs for a query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalParams {
    pub k: usize,
    /// Maximum nearest distance still considered relevant.
    pub relevance_threshold: f64,
}

/// Anything that can answer a relevance-gated query for a single
/// learning objective.
#[async_trait]
pub trait SourceRetriever: Send + Sync {
    async fn query_sources(&self, query: &str, k: usize) -> Result<QueryResult, RetrievalError>;
}

/// Run one relevance-gated query against `collection`.
pub async fn query_and_assess(
    embedder: &dyn Embedder,
    index: &dyn VectorIndex,
    collection: &str,
    query: &str,
    params: RetrievalParams,
) -> Result<QueryResult, RetrievalError> {
    if params.k == 0 {
        return Ok(QueryResult::low());
    }

    let query_vec = embedder
        .embed_one(query)
        .await
        .map_err(RetrievalError::Embedding)?;

    let hits = index
        .query(collection, &query_vec, params.k)
        .await
        .map_err(RetrievalError::Search)?;

    match hits.nearest_distance() {
        Some(best) if best <= params.relevance_threshold => {}
        best => {
            warn!(
                query,
                best_distance = ?best,
                threshold = params.relevance_threshold,
                "low confidence retrieval"
            );
            return Ok(QueryResult::low());
        }
    }

    let hits = hits.into_hits().map_err(RetrievalError::Search)?;
    debug!(query, hits = hits.len(), "retrieval cleared relevance gate");

    let sources = hits
        .into_iter()
        .map(|hit| RetrievedSource {
            title: hit.metadata.title,
            url: hit.metadata.url,
            content: hit.document,
            source_file: hit.metadata.source_file,
            distance: Some(hit.distance),
        })
        .collect();

    Ok(QueryResult::high(sources))
}

/// Long-lived retrieval handle sharing one embedder and one index across
/// all concurrent queries.
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    collection: CollectionInfo,
    relevance_threshold: f64,
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("collection", &self.collection)
            .field("relevance_threshold", &self.relevance_threshold)
            .finish()
    }
}

impl Retriever {
    /// Open a retriever over an existing collection.
    ///
    /// Fails fast if the collection is missing, was built in a different
    /// embedding space than `embedder` produces, or was built with a
    /// different distance metric than `metric`.
    pub async fn open(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        collection: &str,
        metric: DistanceMetric,
        relevance_threshold: f64,
    ) -> Result<Self, RetrievalError> {
        let info = index
            .collection(collection)
            .await
            .map_err(RetrievalError::Search)?
            .ok_or_else(|| RetrievalError::CollectionMissing(collection.to_string()))?;

        ensure_same_space(&info, embedder.model_name(), embedder.dims(), metric)
            .map_err(|e| RetrievalError::ModelMismatch(e.to_string()))?;

        Ok(Self {
            embedder,
            index,
            collection: info,
            relevance_threshold,
        })
    }

    pub fn collection(&self) -> &CollectionInfo {
        &self.collection
    }

    pub fn relevance_threshold(&self) -> f64 {
        self.relevance_threshold
    }

    /// Query with an explicit threshold instead of the configured one.
    pub async fn query_with_threshold(
        &self,
        query: &str,
        k: usize,
        relevance_threshold: f64,
    ) -> Result<QueryResult, RetrievalError> {
        query_and_assess(
            self.embedder.as_ref(),
            self.index.as_ref(),
            &self.collection.name,
            query,
            RetrievalParams {
                k,
                relevance_threshold,
            },
        )
        .await
    }
}

#[async_trait]
impl SourceRetriever for Retriever {
    async fn query_sources(&self, query: &str, k: usize) -> Result<QueryResult, RetrievalError> {
        self.query_with_threshold(query, k, self.relevance_threshold)
            .await
    }
}
