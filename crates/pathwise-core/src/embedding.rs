//! Embedding trait and vector utilities.
//!
//! Defines the [`Embedder`] trait that all embedding backends implement,
//! plus pure helper functions for vector serialization and distance
//! computation.
//!
//! Concrete embedders (local fastembed model, Ollama) live in the
//! `pathwise` app crate.

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::DistanceMetric;

/// Maps text to fixed-length vectors.
///
/// Implementations are expensive to construct (model load) and cheap to
/// call; a single instance is shared across all concurrent queries, so
/// they must be `Send + Sync` and re-entrant.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"all-minilm-l6-v2"`).
    fn model_name(&self) -> &str;

    /// Returns the embedding vector dimensionality (e.g. `384`).
    fn dims(&self) -> usize;

    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let vectors = self.embed(&[text.to_string()]).await?;
        let vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))?;
        check_dims(&vector, self.dims())?;
        Ok(vector)
    }
}

/// Fail unless `vector` has exactly `dims` components.
pub fn check_dims(vector: &[f32], dims: usize) -> Result<()> {
    if vector.len() != dims {
        bail!(
            "embedding has {} dimensions, expected {}",
            vector.len(),
            dims
        );
    }
    Ok(())
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// Each `f32` is stored as 4 bytes in little-endian order, producing
/// a BLOB of `vec.len() × 4` bytes.
///
/// # Example
///
/// ```rust
/// use pathwise_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors or
/// vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Squared Euclidean distance.
///
/// For unit-normalized embeddings this equals `2 - 2·cos(θ)`, so it lies
/// in `[0, 4]`.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Distance between two vectors under `metric`. Smaller is closer.
///
/// Vectors of different lengths are infinitely far apart.
pub fn distance(metric: DistanceMetric, a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return f64::INFINITY;
    }
    match metric {
        DistanceMetric::L2 => squared_l2(a, b) as f64,
        DistanceMetric::Cosine => 1.0 - cosine_similarity(a, b) as f64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        assert_eq!(blob_to_vec(&blob), vec);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_empty() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_l2_identical_is_zero() {
        let v = vec![0.3, -0.4, 0.5];
        assert_eq!(distance(DistanceMetric::L2, &v, &v), 0.0);
    }

    #[test]
    fn test_l2_unit_orthogonal_is_two() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!((distance(DistanceMetric::L2, &a, &b) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_distance_opposite_is_two() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((distance(DistanceMetric::Cosine, &a, &b) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_distance_length_mismatch() {
        assert!(distance(DistanceMetric::L2, &[1.0], &[1.0, 2.0]).is_infinite());
    }

    #[test]
    fn test_check_dims() {
        assert!(check_dims(&[0.0; 3], 3).is_ok());
        let err = check_dims(&[0.0; 2], 3).unwrap_err().to_string();
        assert!(err.contains("expected 3"));
    }
}
