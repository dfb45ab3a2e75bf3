//! Long-lived retrieval service over the persisted index.
//!
//! [`RetrievalService::open`] loads the embedding model and opens the
//! index once; every query and every enrichment then shares them. Opening
//! fails if the index was never built, or was built with a different
//! embedding model or distance metric than the one configured now.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use pathwise_core::embedding::Embedder;
use pathwise_core::models::{CollectionInfo, LearningStep, QueryResult};
use pathwise_core::retrieval::{RetrievalError, Retriever, SourceRetriever};
use pathwise_core::store::VectorIndex;

use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::enrich::{enrich_roadmap, EnrichOutcome};
use crate::sqlite_store::SqliteIndex;

pub struct RetrievalService {
    retriever: Retriever,
    index: Arc<SqliteIndex>,
    default_k: usize,
    timeout: Duration,
}

impl RetrievalService {
    /// Open the configured index with the configured embedding provider.
    ///
    /// The index is opened before the model is loaded, so a missing index
    /// fails without paying for model initialization.
    pub async fn open(config: &Config) -> Result<Self> {
        let index = open_index(config).await?;
        let embedder = create_embedder(&config.embedding)
            .await
            .context("failed to initialize embedding provider")?;
        Self::from_parts(config, embedder, index).await
    }

    /// Open the configured index with a caller-supplied embedder.
    pub async fn open_with(config: &Config, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let index = open_index(config).await?;
        Self::from_parts(config, embedder, index).await
    }

    async fn from_parts(
        config: &Config,
        embedder: Arc<dyn Embedder>,
        index: Arc<SqliteIndex>,
    ) -> Result<Self> {
        let retriever = match Retriever::open(
            embedder,
            index.clone(),
            &config.index.collection,
            config.index.metric,
            config.retrieval.relevance_threshold,
        )
        .await
        {
            Ok(retriever) => retriever,
            Err(e) => {
                index.pool().close().await;
                return Err(e.into());
            }
        };

        let info = retriever.collection();
        info!(
            collection = %info.name,
            model = %info.model,
            dims = info.dims,
            metric = info.metric.as_str(),
            "retrieval service ready"
        );

        Ok(Self {
            retriever,
            index,
            default_k: config.retrieval.default_k,
            timeout: Duration::from_secs(config.retrieval.timeout_secs),
        })
    }

    pub fn collection(&self) -> &CollectionInfo {
        self.retriever.collection()
    }

    pub fn default_k(&self) -> usize {
        self.default_k
    }

    /// Number of entries currently in the collection.
    pub async fn count(&self) -> Result<usize> {
        self.index.count(&self.collection().name).await
    }

    /// Relevance-gated query with an optional threshold override.
    pub async fn query(
        &self,
        query: &str,
        k: Option<usize>,
        threshold: Option<f64>,
    ) -> Result<QueryResult, RetrievalError> {
        let k = k.unwrap_or(self.default_k);
        let threshold = threshold.unwrap_or(self.retriever.relevance_threshold());
        self.retriever.query_with_threshold(query, k, threshold).await
    }

    /// Enrich a roadmap, querying `k` (or the default) sources per objective.
    pub async fn enrich(&self, steps: Vec<LearningStep>, k: Option<usize>) -> EnrichOutcome {
        enrich_roadmap(
            &self.retriever,
            steps,
            k.unwrap_or(self.default_k),
            self.timeout,
        )
        .await
    }

    pub async fn close(self) {
        self.index.pool().close().await;
    }
}

async fn open_index(config: &Config) -> Result<Arc<SqliteIndex>> {
    let pool = db::connect(config, false).await?;
    Ok(Arc::new(SqliteIndex::new(pool)))
}

#[async_trait]
impl SourceRetriever for RetrievalService {
    async fn query_sources(&self, query: &str, k: usize) -> Result<QueryResult, RetrievalError> {
        self.retriever.query_sources(query, k).await
    }
}
