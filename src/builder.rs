//! Index build pipeline.
//!
//! Coordinates the full build flow: loader → id assignment → embedding →
//! storage. A build is a one-shot batch: every loaded document is embedded,
//! then the whole collection is written with a single upsert. Re-running
//! over an unchanged data directory overwrites the same ids.
//!
//! Nothing is written until the loader has produced at least one valid
//! document, so a missing or empty data directory leaves the index file
//! untouched.

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use pathwise_core::embedding::Embedder;
use pathwise_core::ids::entry_id;
use pathwise_core::models::{DistanceMetric, IndexEntry, SourceDocument};
use pathwise_core::store::{UpsertBatch, VectorIndex};

use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::loader::{load_documents, LoadReport};
use crate::migrate;
use crate::sqlite_store::SqliteIndex;

/// Fatal build failures. Skipped files and records are not errors; they
/// are reported in [`BuildReport::records_rejected`].
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("no input data: {0}")]
    NoInputData(String),

    #[error("no valid documents found ({rejected} records rejected across {files} files)")]
    NoValidDocuments { files: usize, rejected: usize },

    #[error("embedding failed: {0}")]
    Embedding(#[source] anyhow::Error),

    #[error("index write failed: {0}")]
    Index(#[source] anyhow::Error),
}

/// Summary printed by `pathwise build`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildReport {
    pub collection: String,
    pub documents_loaded: usize,
    pub records_rejected: usize,
    pub entries_upserted: usize,
    /// Entries in the collection after the upsert, including any left over
    /// from earlier builds.
    pub collection_count: usize,
}

/// Build the configured collection using the configured embedding provider.
pub async fn build_index(config: &Config) -> Result<BuildReport, BuildError> {
    let load = load_valid_documents(config)?;
    let embedder = create_embedder(&config.embedding)
        .await
        .map_err(BuildError::Embedding)?;
    build_loaded(config, embedder.as_ref(), load).await
}

/// Like [`build_index`] with a caller-supplied embedder.
pub async fn build_index_with(
    config: &Config,
    embedder: Arc<dyn Embedder>,
) -> Result<BuildReport, BuildError> {
    let load = load_valid_documents(config)?;
    build_loaded(config, embedder.as_ref(), load).await
}

fn load_valid_documents(config: &Config) -> Result<LoadReport, BuildError> {
    let load = load_documents(&config.sources.data_dir, &config.sources.include_globs)?;
    if load.documents.is_empty() {
        return Err(BuildError::NoValidDocuments {
            files: load.files_scanned,
            rejected: load.rejections.len(),
        });
    }
    Ok(load)
}

async fn build_loaded(
    config: &Config,
    embedder: &dyn Embedder,
    load: LoadReport,
) -> Result<BuildReport, BuildError> {
    let entries = embed_documents(embedder, &load.documents, config.embedding.batch_size).await?;

    let pool = db::connect(config, true).await.map_err(BuildError::Index)?;
    migrate::run_migrations(&pool)
        .await
        .map_err(BuildError::Index)?;
    let index = SqliteIndex::new(pool);

    let result = write_collection(
        &index,
        &config.index.collection,
        embedder,
        config.index.metric,
        entries,
    )
    .await;
    index.pool().close().await;

    let (entries_upserted, collection_count) = result?;
    Ok(BuildReport {
        collection: config.index.collection.clone(),
        documents_loaded: load.documents.len(),
        records_rejected: load.rejections.len(),
        entries_upserted,
        collection_count,
    })
}

/// Embed and store `documents` into `collection` of any [`VectorIndex`].
///
/// Returns `(entries_upserted, collection_count)`.
pub async fn index_documents(
    index: &dyn VectorIndex,
    collection: &str,
    embedder: &dyn Embedder,
    metric: DistanceMetric,
    documents: &[SourceDocument],
    batch_size: usize,
) -> Result<(usize, usize), BuildError> {
    if documents.is_empty() {
        return Err(BuildError::NoValidDocuments {
            files: 0,
            rejected: 0,
        });
    }
    let entries = embed_documents(embedder, documents, batch_size).await?;
    write_collection(index, collection, embedder, metric, entries).await
}

/// Assign ids and embed every document, in load order.
pub async fn embed_documents(
    embedder: &dyn Embedder,
    documents: &[SourceDocument],
    batch_size: usize,
) -> Result<Vec<IndexEntry>, BuildError> {
    let batch_size = batch_size.max(1);
    let mut entries = Vec::with_capacity(documents.len());

    for (batch_no, batch) in documents.chunks(batch_size).enumerate() {
        let texts: Vec<String> = batch.iter().map(|d| d.content.clone()).collect();
        let vectors = embedder
            .embed(&texts)
            .await
            .map_err(BuildError::Embedding)?;
        if vectors.len() != batch.len() {
            return Err(BuildError::Embedding(anyhow::anyhow!(
                "embedder returned {} vectors for {} documents",
                vectors.len(),
                batch.len()
            )));
        }
        debug!(batch = batch_no, size = batch.len(), "embedded batch");

        let offset = batch_no * batch_size;
        for (i, (doc, embedding)) in batch.iter().zip(vectors).enumerate() {
            entries.push(IndexEntry {
                id: entry_id(offset + i, &doc.title),
                content: doc.content.clone(),
                metadata: doc.metadata(),
                embedding,
            });
        }
    }

    info!(
        documents = entries.len(),
        model = embedder.model_name(),
        "embedded documents"
    );
    Ok(entries)
}

async fn write_collection(
    index: &dyn VectorIndex,
    collection: &str,
    embedder: &dyn Embedder,
    metric: DistanceMetric,
    entries: Vec<IndexEntry>,
) -> Result<(usize, usize), BuildError> {
    let info = index
        .ensure_collection(collection, embedder.model_name(), embedder.dims(), metric)
        .await
        .map_err(BuildError::Index)?;
    debug!(collection = %info.name, model = %info.model, dims = info.dims, "collection ready");

    let batch = UpsertBatch::from_entries(entries);
    let upserted = batch.len();
    index
        .upsert(collection, &batch)
        .await
        .map_err(BuildError::Index)?;

    let count = index.count(collection).await.map_err(BuildError::Index)?;
    info!(
        collection,
        upserted,
        count,
        "index build complete"
    );
    Ok((upserted, count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use pathwise_core::store::memory::InMemoryIndex;

    /// Encodes text length and vowel count; enough to tell documents apart.
    struct ShapeEmbedder;

    #[async_trait]
    impl Embedder for ShapeEmbedder {
        fn model_name(&self) -> &str {
            "shape-test"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let vowels = t.chars().filter(|c| "aeiou".contains(*c)).count();
                    vec![t.len() as f32, vowels as f32]
                })
                .collect())
        }
    }

    struct ShortEmbedder;

    #[async_trait]
    impl Embedder for ShortEmbedder {
        fn model_name(&self) -> &str {
            "short-test"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().skip(1).map(|_| vec![0.0, 0.0]).collect())
        }
    }

    fn doc(title: &str, content: &str) -> SourceDocument {
        SourceDocument {
            title: title.to_string(),
            url: "#".to_string(),
            content: content.to_string(),
            source_file: "kb.json".to_string(),
        }
    }

    #[tokio::test]
    async fn test_ids_follow_load_order_across_batches() {
        let docs = vec![
            doc("Rust Book", "ownership"),
            doc("Docker Guide", "containers"),
            doc("SQL Basics", "joins"),
        ];
        let entries = embed_documents(&ShapeEmbedder, &docs, 2).await.unwrap();
        let ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["doc_0_rust_book", "doc_1_docker_guide", "doc_2_sql_basics"]
        );
        assert_eq!(entries[2].content, "joins");
        assert_eq!(entries[2].metadata.title, "SQL Basics");
    }

    #[tokio::test]
    async fn test_vector_count_mismatch_is_an_embedding_error() {
        let docs = vec![doc("A", "a"), doc("B", "b")];
        let err = embed_documents(&ShortEmbedder, &docs, 8).await.unwrap_err();
        assert!(matches!(err, BuildError::Embedding(_)));
    }

    #[tokio::test]
    async fn test_rebuild_overwrites_instead_of_duplicating() {
        let index = InMemoryIndex::new();
        let docs = vec![doc("Rust Book", "ownership"), doc("Docker Guide", "containers")];

        let first = index_documents(&index, "kb", &ShapeEmbedder, DistanceMetric::L2, &docs, 64)
            .await
            .unwrap();
        let second = index_documents(&index, "kb", &ShapeEmbedder, DistanceMetric::L2, &docs, 64)
            .await
            .unwrap();
        assert_eq!(first, (2, 2));
        assert_eq!(second, (2, 2));
    }

    #[tokio::test]
    async fn test_equal_titles_get_distinct_ids() {
        let index = InMemoryIndex::new();
        let docs = vec![doc("Intro", "first"), doc("Intro", "second")];
        let (upserted, count) =
            index_documents(&index, "kb", &ShapeEmbedder, DistanceMetric::L2, &docs, 64)
                .await
                .unwrap();
        assert_eq!(upserted, 2);
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_no_documents_is_fatal() {
        let index = InMemoryIndex::new();
        let err = index_documents(&index, "kb", &ShapeEmbedder, DistanceMetric::L2, &[], 64)
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::NoValidDocuments { .. }));
        assert!(index.collection("kb").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_build_index_with_empty_directory_creates_nothing() {
        let tmp = tempfile::TempDir::new().unwrap();
        let data_dir = tmp.path().join("rag_data");
        std::fs::create_dir(&data_dir).unwrap();

        let mut config = Config::default();
        config.sources.data_dir = data_dir;
        config.index.path = tmp.path().join("index.sqlite");

        let err = build_index_with(&config, Arc::new(ShapeEmbedder))
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::NoInputData(_)));
        assert!(!config.index.path.exists());
    }

    #[tokio::test]
    async fn test_build_index_with_only_invalid_records() {
        let tmp = tempfile::TempDir::new().unwrap();
        let data_dir = tmp.path().join("rag_data");
        std::fs::create_dir(&data_dir).unwrap();
        std::fs::write(data_dir.join("kb.json"), r#"[{"title": "No body"}]"#).unwrap();

        let mut config = Config::default();
        config.sources.data_dir = data_dir;
        config.index.path = tmp.path().join("index.sqlite");

        let err = build_index_with(&config, Arc::new(ShapeEmbedder))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BuildError::NoValidDocuments {
                files: 1,
                rejected: 1
            }
        ));
        assert!(!config.index.path.exists());
    }
}
