//! TOML configuration parsing, environment overrides, and validation.
//!
//! Every section is optional; a missing config file yields the defaults.
//! Selected values can be overridden through `PATHWISE_*` environment
//! variables (a `.env` file is loaded by the CLI before this runs).

use anyhow::{bail, Context, Result};
use pathwise_core::models::DistanceMetric;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourcesConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            include_globs: default_include_globs(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./rag_data")
}
fn default_include_globs() -> Vec<String> {
    vec!["*.json".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default)]
    pub metric: DistanceMetric,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
            collection: default_collection(),
            metric: DistanceMetric::default(),
        }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from("./data/pathwise.sqlite")
}
fn default_collection() -> String {
    "career_sources".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the `ollama` provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub default_k: usize,
    #[serde(default = "default_relevance_threshold")]
    pub relevance_threshold: f64,
    /// Upper bound for a single retrieval during roadmap enrichment.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: default_k(),
            relevance_threshold: default_relevance_threshold(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_k() -> usize {
    2
}
fn default_relevance_threshold() -> f64 {
    1.0
}

/// Read `path` (if it exists), apply environment overrides, and validate.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse config file")?;
        debug!(path = %path.display(), "loaded config file");
        config
    } else {
        info!(path = %path.display(), "config file not found, using defaults");
        Config::default()
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate(&config)?;
    Ok(config)
}

/// Overlay `PATHWISE_*` variables, read through `lookup`.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("PATHWISE_DATA_DIR") {
        config.sources.data_dir = PathBuf::from(v);
    }
    if let Some(v) = lookup("PATHWISE_INDEX_PATH") {
        config.index.path = PathBuf::from(v);
    }
    if let Some(v) = lookup("PATHWISE_COLLECTION") {
        config.index.collection = v;
    }
    if let Some(v) = lookup("PATHWISE_EMBEDDING_MODEL") {
        config.embedding.model = Some(v);
    }
    if let Some(v) = lookup("PATHWISE_DEFAULT_K") {
        config.retrieval.default_k = v
            .parse()
            .with_context(|| format!("PATHWISE_DEFAULT_K is not an integer: '{}'", v))?;
    }
    if let Some(v) = lookup("PATHWISE_RELEVANCE_THRESHOLD") {
        config.retrieval.relevance_threshold = v
            .parse()
            .with_context(|| format!("PATHWISE_RELEVANCE_THRESHOLD is not a number: '{}'", v))?;
    }
    Ok(())
}

pub fn validate(config: &Config) -> Result<()> {
    if config.index.collection.trim().is_empty() {
        bail!("index.collection must not be empty");
    }

    if config.sources.include_globs.is_empty() {
        bail!("sources.include_globs must list at least one pattern");
    }

    if config.retrieval.default_k < 1 {
        bail!("retrieval.default_k must be >= 1");
    }

    let threshold = config.retrieval.relevance_threshold;
    if !threshold.is_finite() || threshold < 0.0 {
        bail!("retrieval.relevance_threshold must be a finite number >= 0");
    }

    if config.retrieval.timeout_secs == 0 {
        bail!("retrieval.timeout_secs must be > 0");
    }

    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    if config.embedding.timeout_secs == 0 {
        bail!("embedding.timeout_secs must be > 0");
    }

    if config.embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }

    match config.embedding.provider.as_str() {
        "local" => {}
        "ollama" => {
            if config.embedding.model.is_none() || config.embedding.dims.is_none() {
                bail!("embedding.model and embedding.dims must be specified when provider is 'ollama'");
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be local or ollama.",
            other
        ),
    }

    Ok(())
}
