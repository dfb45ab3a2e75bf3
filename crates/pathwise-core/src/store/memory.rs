//! In-memory [`VectorIndex`] implementation for testing and WASM targets.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread safety.
//! Vector search is brute-force over all stored vectors of a collection.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::embedding::{check_dims, distance};
use crate::models::{CollectionInfo, DistanceMetric, EntryMetadata};

use super::{ensure_same_space, rank_nearest, IndexHit, QueryHits, UpsertBatch, VectorIndex};

struct StoredEntry {
    id: String,
    document: String,
    metadata: EntryMetadata,
    embedding: Vec<f32>,
}

struct StoredCollection {
    info: CollectionInfo,
    /// Storage order; an upsert of an existing id replaces it in place.
    entries: Vec<StoredEntry>,
    positions: HashMap<String, usize>,
}

/// In-memory vector index for tests.
pub struct InMemoryIndex {
    collections: RwLock<HashMap<String, StoredCollection>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory index lock poisoned")
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn ensure_collection(
        &self,
        name: &str,
        model: &str,
        dims: usize,
        metric: DistanceMetric,
    ) -> Result<CollectionInfo> {
        let mut collections = self.collections.write().map_err(poisoned)?;
        if let Some(existing) = collections.get(name) {
            ensure_same_space(&existing.info, model, dims, metric)?;
            return Ok(existing.info.clone());
        }
        let now = chrono::Utc::now().timestamp();
        let info = CollectionInfo {
            name: name.to_string(),
            model: model.to_string(),
            dims,
            metric,
            created_at: now,
            updated_at: now,
        };
        collections.insert(
            name.to_string(),
            StoredCollection {
                info: info.clone(),
                entries: Vec::new(),
                positions: HashMap::new(),
            },
        );
        Ok(info)
    }

    async fn collection(&self, name: &str) -> Result<Option<CollectionInfo>> {
        let collections = self.collections.read().map_err(poisoned)?;
        Ok(collections.get(name).map(|c| c.info.clone()))
    }

    async fn upsert(&self, collection: &str, batch: &UpsertBatch) -> Result<()> {
        let mut collections = self.collections.write().map_err(poisoned)?;
        let stored = collections
            .get_mut(collection)
            .ok_or_else(|| anyhow!("collection '{}' does not exist", collection))?;

        // Validate the whole batch before touching anything.
        for (id, _, _, embedding) in batch.rows() {
            if let Err(e) = check_dims(embedding, stored.info.dims) {
                bail!("entry '{}': {}", id, e);
            }
        }

        for (id, document, metadata, embedding) in batch.rows() {
            let entry = StoredEntry {
                id: id.to_string(),
                document: document.to_string(),
                metadata: metadata.clone(),
                embedding: embedding.to_vec(),
            };
            match stored.positions.get(id) {
                Some(&pos) => stored.entries[pos] = entry,
                None => {
                    stored.positions.insert(id.to_string(), stored.entries.len());
                    stored.entries.push(entry);
                }
            }
        }
        stored.info.updated_at = chrono::Utc::now().timestamp();
        Ok(())
    }

    async fn query(&self, collection: &str, embedding: &[f32], k: usize) -> Result<QueryHits> {
        let collections = self.collections.read().map_err(poisoned)?;
        let stored = collections
            .get(collection)
            .ok_or_else(|| anyhow!("collection '{}' does not exist", collection))?;
        check_dims(embedding, stored.info.dims)?;

        let metric = stored.info.metric;
        let scored: Vec<IndexHit> = stored
            .entries
            .iter()
            .map(|e| IndexHit {
                id: e.id.clone(),
                document: e.document.clone(),
                metadata: e.metadata.clone(),
                distance: distance(metric, embedding, &e.embedding),
            })
            .collect();

        Ok(QueryHits::from_hits(rank_nearest(scored, k)))
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let collections = self.collections.read().map_err(poisoned)?;
        Ok(collections
            .get(collection)
            .map(|c| c.entries.len())
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IndexEntry;

    fn entry(id: &str, content: &str, embedding: Vec<f32>) -> IndexEntry {
        IndexEntry {
            id: id.to_string(),
            content: content.to_string(),
            metadata: EntryMetadata {
                title: id.to_uppercase(),
                url: format!("https://example.com/{}", id),
                source_file: "kb.json".to_string(),
            },
            embedding,
        }
    }

    async fn seeded() -> InMemoryIndex {
        let index = InMemoryIndex::new();
        index
            .ensure_collection("kb", "test-model", 2, DistanceMetric::L2)
            .await
            .unwrap();
        let batch = UpsertBatch::from_entries(vec![
            entry("a", "alpha", vec![1.0, 0.0]),
            entry("b", "beta", vec![0.0, 1.0]),
            entry("c", "gamma", vec![0.7, 0.7]),
        ]);
        index.upsert("kb", &batch).await.unwrap();
        index
    }

    #[tokio::test]
    async fn test_query_ranks_by_ascending_distance() {
        let index = seeded().await;
        let hits = index.query("kb", &[1.0, 0.0], 3).await.unwrap();
        assert_eq!(hits.ids, vec!["a", "c", "b"]);
        assert_eq!(hits.distances[0], 0.0);
        assert!(hits.distances.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(hits.documents[0], "alpha");
        assert_eq!(hits.metadatas[0].title, "A");
    }

    #[tokio::test]
    async fn test_query_never_exceeds_k_or_size() {
        let index = seeded().await;
        assert_eq!(index.query("kb", &[1.0, 0.0], 2).await.unwrap().len(), 2);
        assert_eq!(index.query("kb", &[1.0, 0.0], 10).await.unwrap().len(), 3);
        assert!(index.query("kb", &[1.0, 0.0], 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_replaces_same_id() {
        let index = seeded().await;
        let batch = UpsertBatch::from_entries(vec![entry("a", "alpha v2", vec![0.0, 1.0])]);
        index.upsert("kb", &batch).await.unwrap();

        assert_eq!(index.count("kb").await.unwrap(), 3);
        let hits = index.query("kb", &[0.0, 1.0], 1).await.unwrap();
        // "a" now ties with "b" at distance 0 and keeps its earlier slot.
        assert_eq!(hits.ids, vec!["a"]);
        assert_eq!(hits.documents, vec!["alpha v2"]);
    }

    #[tokio::test]
    async fn test_ensure_collection_is_get_or_create() {
        let index = seeded().await;
        let info = index
            .ensure_collection("kb", "test-model", 2, DistanceMetric::L2)
            .await
            .unwrap();
        assert_eq!(info.name, "kb");
        assert_eq!(index.count("kb").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_ensure_collection_rejects_other_model() {
        let index = seeded().await;
        let result = index
            .ensure_collection("kb", "other-model", 2, DistanceMetric::L2)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_upsert_rejects_wrong_dims_atomically() {
        let index = seeded().await;
        let batch = UpsertBatch::from_entries(vec![
            entry("d", "delta", vec![0.5, 0.5]),
            entry("e", "epsilon", vec![0.5, 0.5, 0.5]),
        ]);
        assert!(index.upsert("kb", &batch).await.is_err());
        assert_eq!(index.count("kb").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_missing_collection() {
        let index = InMemoryIndex::new();
        assert!(index.collection("nope").await.unwrap().is_none());
        assert_eq!(index.count("nope").await.unwrap(), 0);
        assert!(index.query("nope", &[1.0], 1).await.is_err());
    }
}
