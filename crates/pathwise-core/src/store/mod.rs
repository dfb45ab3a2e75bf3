//! Vector index abstraction for Pathwise.
//!
//! The [`VectorIndex`] trait defines the storage operations needed by the
//! index builder and the retrieval path, enabling pluggable backends
//! (SQLite, in-memory).
//!
//! Entries travel through the crate as composite [`IndexEntry`] records.
//! They are flattened into the parallel `ids` / `documents` / `metadatas` /
//! `embeddings` arrays of an [`UpsertBatch`] only at this boundary, and
//! query responses come back as parallel [`QueryHits`] arrays that are
//! zipped into [`IndexHit`]s before anyone else sees them.

pub mod memory;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::{CollectionInfo, DistanceMetric, EntryMetadata, IndexEntry};

/// Parallel arrays handed to [`VectorIndex::upsert`].
///
/// Can only be built from entries or through [`UpsertBatch::try_new`], so
/// the four arrays always have the same length and ordering.
#[derive(Debug, Clone, Default)]
pub struct UpsertBatch {
    ids: Vec<String>,
    documents: Vec<String>,
    metadatas: Vec<EntryMetadata>,
    embeddings: Vec<Vec<f32>>,
}

impl UpsertBatch {
    /// Flatten composite entries into parallel arrays.
    pub fn from_entries(entries: Vec<IndexEntry>) -> Self {
        let mut batch = Self {
            ids: Vec::with_capacity(entries.len()),
            documents: Vec::with_capacity(entries.len()),
            metadatas: Vec::with_capacity(entries.len()),
            embeddings: Vec::with_capacity(entries.len()),
        };
        for entry in entries {
            batch.ids.push(entry.id);
            batch.documents.push(entry.content);
            batch.metadatas.push(entry.metadata);
            batch.embeddings.push(entry.embedding);
        }
        batch
    }

    /// Build a batch from caller-supplied parallel arrays.
    ///
    /// Fails if the arrays disagree in length.
    pub fn try_new(
        ids: Vec<String>,
        documents: Vec<String>,
        metadatas: Vec<EntryMetadata>,
        embeddings: Vec<Vec<f32>>,
    ) -> Result<Self> {
        let n = ids.len();
        if documents.len() != n || metadatas.len() != n || embeddings.len() != n {
            bail!(
                "upsert arrays misaligned: ids={}, documents={}, metadatas={}, embeddings={}",
                n,
                documents.len(),
                metadatas.len(),
                embeddings.len()
            );
        }
        Ok(Self {
            ids,
            documents,
            metadatas,
            embeddings,
        })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn documents(&self) -> &[String] {
        &self.documents
    }

    pub fn metadatas(&self) -> &[EntryMetadata] {
        &self.metadatas
    }

    pub fn embeddings(&self) -> &[Vec<f32>] {
        &self.embeddings
    }

    /// Iterate rows in lockstep: `(id, document, metadata, embedding)`.
    pub fn rows(&self) -> impl Iterator<Item = (&str, &str, &EntryMetadata, &[f32])> {
        self.ids
            .iter()
            .zip(&self.documents)
            .zip(&self.metadatas)
            .zip(&self.embeddings)
            .map(|(((id, doc), meta), emb)| (id.as_str(), doc.as_str(), meta, emb.as_slice()))
    }
}

/// A single nearest-neighbour match.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub id: String,
    pub document: String,
    pub metadata: EntryMetadata,
    pub distance: f64,
}

/// Parallel arrays returned by [`VectorIndex::query`], nearest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryHits {
    pub ids: Vec<String>,
    pub documents: Vec<String>,
    pub metadatas: Vec<EntryMetadata>,
    pub distances: Vec<f64>,
}

impl QueryHits {
    /// Collect ranked hits into parallel arrays.
    pub fn from_hits(hits: Vec<IndexHit>) -> Self {
        let mut out = Self::default();
        for hit in hits {
            out.ids.push(hit.id);
            out.documents.push(hit.document);
            out.metadatas.push(hit.metadata);
            out.distances.push(hit.distance);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Distance of the nearest hit, if any.
    pub fn nearest_distance(&self) -> Option<f64> {
        self.distances.first().copied()
    }

    /// Zip the parallel arrays back into hits.
    ///
    /// Fails if a backend returned arrays of different lengths.
    pub fn into_hits(self) -> Result<Vec<IndexHit>> {
        let n = self.ids.len();
        if self.documents.len() != n || self.metadatas.len() != n || self.distances.len() != n {
            bail!(
                "query response misaligned: ids={}, documents={}, metadatas={}, distances={}",
                n,
                self.documents.len(),
                self.metadatas.len(),
                self.distances.len()
            );
        }
        Ok(self
            .ids
            .into_iter()
            .zip(self.documents)
            .zip(self.metadatas)
            .zip(self.distances)
            .map(|(((id, document), metadata), distance)| IndexHit {
                id,
                document,
                metadata,
                distance,
            })
            .collect())
    }
}

/// Abstract persistent vector index.
///
/// All operations are async (via `async-trait`). In-memory implementations
/// return immediately-ready futures.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`ensure_collection`](VectorIndex::ensure_collection) | Get-or-create a collection |
/// | [`collection`](VectorIndex::collection) | Look up collection metadata |
/// | [`upsert`](VectorIndex::upsert) | Insert-or-replace a batch by id |
/// | [`query`](VectorIndex::query) | k-nearest neighbours by distance |
/// | [`count`](VectorIndex::count) | Number of entries in a collection |
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Return the named collection, creating it if absent.
    ///
    /// Errors if it already exists with a different model, dimensionality,
    /// or metric.
    async fn ensure_collection(
        &self,
        name: &str,
        model: &str,
        dims: usize,
        metric: DistanceMetric,
    ) -> Result<CollectionInfo>;

    /// Look up a collection without creating it.
    async fn collection(&self, name: &str) -> Result<Option<CollectionInfo>>;

    /// Insert or replace every row of `batch`. Either all rows are written
    /// or none are.
    async fn upsert(&self, collection: &str, batch: &UpsertBatch) -> Result<()>;

    /// Return at most `k` entries ranked by ascending distance to
    /// `embedding`. Ties keep storage order.
    async fn query(&self, collection: &str, embedding: &[f32], k: usize) -> Result<QueryHits>;

    /// Number of entries stored in a collection.
    async fn count(&self, collection: &str) -> Result<usize>;
}

/// Check that an existing collection lives in the requested embedding space.
pub fn ensure_same_space(
    info: &CollectionInfo,
    model: &str,
    dims: usize,
    metric: DistanceMetric,
) -> Result<()> {
    if info.model != model || info.dims != dims || info.metric != metric {
        bail!(
            "collection '{}' was built with model '{}' ({} dims, {}), but '{}' ({} dims, {}) was requested",
            info.name,
            info.model,
            info.dims,
            info.metric.as_str(),
            model,
            dims,
            metric.as_str()
        );
    }
    Ok(())
}

/// Stable ranking shared by backends that score every stored vector.
///
/// `scored` must be in storage order; the sort is stable, so equal
/// distances keep that order. NaN distances rank after every real one.
pub fn rank_nearest(mut scored: Vec<IndexHit>, k: usize) -> Vec<IndexHit> {
    scored.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    scored.truncate(k);
    scored
}
