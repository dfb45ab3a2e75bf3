//! Embedding provider implementations.
//!
//! Concrete [`Embedder`]s selected by `embedding.provider`:
//! - **[`LocalEmbedder`]**: runs a sentence-embedding model in-process via
//!   fastembed. The model is loaded once and shared; no network calls after
//!   the initial download.
//! - **[`OllamaEmbedder`]**: calls a local Ollama instance's `/api/embed`
//!   endpoint.
//!
//! # Provider Selection
//!
//! Use [`create_embedder`] to instantiate the configured provider. Loading
//! is eager: a provider that cannot initialize fails here, before any
//! index is touched or any query is served.
//!
//! # Retry Strategy
//!
//! The Ollama provider uses exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[cfg(feature = "local-embeddings-fastembed")]
use tracing::info;

use pathwise_core::embedding::{check_dims, Embedder};

use crate::config::EmbeddingConfig;

/// Default local model, the same sentence-transformer family the knowledge
/// base has always been indexed with.
pub const DEFAULT_LOCAL_MODEL: &str = "all-minilm-l6-v2";

/// Create the configured [`Embedder`].
///
/// # Supported Providers
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"local"` | [`LocalEmbedder`] (requires `local-embeddings-fastembed`) |
/// | `"ollama"` | [`OllamaEmbedder`] |
pub async fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalEmbedder::load(config).await?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings-fastembed"),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Check a provider's response against the expected count and shape.
fn check_response(vectors: &[Vec<f32>], expected: usize, dims: usize) -> Result<()> {
    if vectors.len() != expected {
        bail!(
            "embedding provider returned {} vectors for {} inputs",
            vectors.len(),
            expected
        );
    }
    for v in vectors {
        check_dims(v, dims)?;
    }
    Ok(())
}

// ============ Local Provider (fastembed) ============

/// Resolve the model name and dimensionality for the local provider.
pub fn resolve_local_model(config: &EmbeddingConfig) -> (String, usize) {
    let model_name = config
        .model
        .clone()
        .unwrap_or_else(|| DEFAULT_LOCAL_MODEL.to_string());

    let dims = config.dims.unwrap_or(match model_name.as_str() {
        "all-minilm-l6-v2" => 384,
        "bge-small-en-v1.5" => 384,
        "bge-base-en-v1.5" => 768,
        "bge-large-en-v1.5" => 1024,
        "nomic-embed-text-v1" | "nomic-embed-text-v1.5" => 768,
        "multilingual-e5-small" => 384,
        "multilingual-e5-base" => 768,
        "multilingual-e5-large" => 1024,
        _ => 384,
    });

    (model_name, dims)
}

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV1),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1, nomic-embed-text-v1.5, \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
            other
        ),
    }
}

/// In-process embedding model.
///
/// The ONNX session is created once in [`LocalEmbedder::load`] and reused
/// for every call. Inference is CPU-bound, so each call runs on a blocking
/// thread; the mutex serializes access to the session.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalEmbedder {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: Arc<std::sync::Mutex<fastembed::TextEmbedding>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalEmbedder {
    pub async fn load(config: &EmbeddingConfig) -> Result<Self> {
        let (model_name, dims) = resolve_local_model(config);
        let fastembed_model = config_to_fastembed_model(&model_name)?;
        info!(model = %model_name, dims, "loading local embedding model");

        let model = tokio::task::spawn_blocking(move || {
            fastembed::TextEmbedding::try_new(
                fastembed::InitOptions::new(fastembed_model).with_show_download_progress(false),
            )
            .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))
        })
        .await??;

        info!(model = %model_name, "local embedding model ready");
        Ok(Self {
            model_name,
            dims,
            batch_size: config.batch_size,
            model: Arc::new(std::sync::Mutex::new(model)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = Arc::clone(&self.model);
        let batch_size = self.batch_size;
        let inputs = texts.to_vec();

        let vectors = tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| anyhow::anyhow!("local embedding model lock poisoned"))?;
            model
                .embed(inputs, Some(batch_size))
                .map_err(|e| anyhow::anyhow!("Local embedding failed: {}", e))
        })
        .await??;

        check_response(&vectors, texts.len(), self.dims)?;
        Ok(vectors)
    }
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default:
/// `http://localhost:11434`). Requires Ollama to be running with an
/// embedding model pulled (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaEmbedder {
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims,
            url,
            max_retries: config.max_retries,
            client,
        })
    }
}

/// Result of one request to Ollama that did not fail outright.
enum Attempt {
    Embedded(Vec<Vec<f32>>),
    /// Transient failure; the request may be sent again.
    Retry(anyhow::Error),
}

/// 429 and 5xx are transient; any other non-success status is final.
fn is_retryable(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Delay before retry number `attempt` (1-based): 1s doubling up to 32s.
fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(1 << attempt.saturating_sub(1).min(5))
}

impl OllamaEmbedder {
    async fn send_once(&self, body: &serde_json::Value, expected: usize) -> Result<Attempt> {
        let response = match self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                return Ok(Attempt::Retry(anyhow::anyhow!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url,
                    e
                )))
            }
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let err = anyhow::anyhow!("Ollama API error {}: {}", status, text);
            return if is_retryable(status) {
                Ok(Attempt::Retry(err))
            } else {
                Err(err)
            };
        }

        let json: serde_json::Value = response.json().await?;
        let vectors = parse_ollama_response(&json)?;
        check_response(&vectors, expected, self.dims)?;
        Ok(Attempt::Embedded(vectors))
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut attempt = 0;
        loop {
            match self.send_once(&body, texts.len()).await? {
                Attempt::Embedded(vectors) => return Ok(vectors),
                Attempt::Retry(err) if attempt >= self.max_retries => {
                    return Err(err.context(format!(
                        "Ollama embedding failed after {} attempts",
                        attempt + 1
                    )))
                }
                Attempt::Retry(err) => {
                    attempt += 1;
                    let delay = backoff(attempt);
                    warn!(
                        attempt,
                        delay_secs = delay.as_secs(),
                        error = %err,
                        "retrying Ollama embedding"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    let mut result = Vec::with_capacity(embeddings.len());

    for embedding in embeddings {
        let vec: Vec<f32> = embedding
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: embedding is not an array"))?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        result.push(vec);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    #[test]
    fn test_resolve_local_model_defaults() {
        let (name, dims) = resolve_local_model(&EmbeddingConfig::default());
        assert_eq!(name, "all-minilm-l6-v2");
        assert_eq!(dims, 384);
    }

    #[test]
    fn test_resolve_local_model_known_dims() {
        let config = EmbeddingConfig {
            model: Some("bge-base-en-v1.5".to_string()),
            ..EmbeddingConfig::default()
        };
        assert_eq!(resolve_local_model(&config).1, 768);
    }

    #[test]
    fn test_parse_ollama_response() {
        let vectors = parse_ollama_response(&json!({
            "embeddings": [[0.1, 0.2], [0.3, 0.4]]
        }))
        .unwrap();
        assert_eq!(vectors.len(), 2);
        assert!((vectors[1][0] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_parse_ollama_response_missing_field() {
        assert!(parse_ollama_response(&json!({"embedding": []})).is_err());
    }

    #[test]
    fn test_check_response_count_and_dims() {
        assert!(check_response(&[vec![0.0; 2]], 1, 2).is_ok());
        assert!(check_response(&[vec![0.0; 2]], 2, 2).is_err());
        assert!(check_response(&[vec![0.0; 3]], 1, 2).is_err());
    }

    #[test]
    fn test_backoff_doubles_then_caps() {
        let delays: Vec<u64> = (1..=8).map(|a| backoff(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 32, 32]);
        assert!(is_retryable(reqwest::StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(reqwest::StatusCode::BAD_GATEWAY));
        assert!(!is_retryable(reqwest::StatusCode::NOT_FOUND));
    }

    /// Minimal HTTP server answering each connection with the next scripted
    /// `(status, body)`; the last entry repeats. Returns the base URL and a
    /// counter of requests served.
    async fn scripted_server(script: Vec<(u16, &'static str)>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let served = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&served);

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                read_request(&mut socket).await;
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let (status, body) = script[n.min(script.len() - 1)];
                let reply = format!(
                    "HTTP/1.1 {} Scripted\r\nContent-Type: application/json\r\n\
                     Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (url, served)
    }

    /// Read one request: headers, then `Content-Length` bytes of body.
    async fn read_request(socket: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let body_len = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + body_len {
                return;
            }
        }
    }

    fn ollama_at(url: String, max_retries: u32) -> OllamaEmbedder {
        OllamaEmbedder::new(&EmbeddingConfig {
            provider: "ollama".to_string(),
            model: Some("nomic-embed-text".to_string()),
            dims: Some(2),
            url: Some(url),
            max_retries,
            ..EmbeddingConfig::default()
        })
        .unwrap()
    }

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|t| t.to_string()).collect()
    }

    #[tokio::test]
    async fn test_ollama_retries_server_error_then_succeeds() {
        let (url, served) = scripted_server(vec![
            (503, "model loading"),
            (200, r#"{"embeddings": [[0.1, 0.2]]}"#),
        ])
        .await;
        let embedder = ollama_at(url, 3);

        let started = tokio::time::Instant::now();
        let vectors = embedder.embed(&texts(&["rust"])).await.unwrap();
        assert_eq!(vectors, vec![vec![0.1, 0.2]]);
        assert_eq!(served.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_ollama_gives_up_after_max_retries() {
        let (url, served) = scripted_server(vec![(429, "slow down")]).await;
        let embedder = ollama_at(url, 2);

        let err = embedder.embed(&texts(&["rust"])).await.unwrap_err();
        assert_eq!(served.load(Ordering::SeqCst), 3);
        let message = format!("{:#}", err);
        assert!(message.contains("after 3 attempts"));
        assert!(message.contains("429"));
    }

    #[tokio::test]
    async fn test_ollama_client_error_is_not_retried() {
        let (url, served) = scripted_server(vec![(400, "model not found")]).await;
        let embedder = ollama_at(url, 3);

        let err = embedder.embed(&texts(&["rust"])).await.unwrap_err();
        assert_eq!(served.load(Ordering::SeqCst), 1);
        assert!(err.to_string().contains("400"));
        assert!(err.to_string().contains("model not found"));
    }

    #[tokio::test]
    async fn test_ollama_wrong_shape_is_rejected() {
        let (url, served) =
            scripted_server(vec![(200, r#"{"embeddings": [[0.1, 0.2, 0.3]]}"#)]).await;
        let embedder = ollama_at(url, 3);
        assert!(embedder.embed(&texts(&["rust"])).await.is_err());
        assert_eq!(served.load(Ordering::SeqCst), 1);

        let (url, served) = scripted_server(vec![(200, r#"{"embeddings": [[0.1, 0.2]]}"#)]).await;
        let embedder = ollama_at(url, 3);
        let err = embedder.embed(&texts(&["rust", "docker"])).await.unwrap_err();
        assert!(err.to_string().contains("1 vectors for 2 inputs"));
        assert_eq!(served.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_provider() {
        let config = EmbeddingConfig {
            provider: "magic".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(create_embedder(&config).await.is_err());
    }

    #[cfg(not(feature = "local-embeddings-fastembed"))]
    #[tokio::test]
    async fn test_local_provider_needs_fastembed_feature() {
        let err = create_embedder(&EmbeddingConfig::default())
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("local-embeddings-fastembed"));
    }

    #[tokio::test]
    async fn test_ollama_requires_model() {
        let config = EmbeddingConfig {
            provider: "ollama".to_string(),
            dims: Some(768),
            ..EmbeddingConfig::default()
        };
        assert!(create_embedder(&config).await.is_err());
    }
}
