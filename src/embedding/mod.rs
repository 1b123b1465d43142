//! Embedding generation for dense retrieval.
//!
//! Provides the async [`Embedder`] seam with two implementations: an
//! HTTP client for OpenAI-compatible providers (OpenAI, DashScope,
//! custom endpoints) and a deterministic random-indexing fallback for
//! tests and offline operation. [`EmbeddingClient`] wraps any embedder
//! with bounded batching and transient-failure retry.

mod client;
mod fallback;
mod http;

pub use client::EmbeddingClient;
pub use fallback::FallbackEmbedder;
pub use http::HttpEmbedder;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{EmbeddingConfig, EmbeddingProvider};
use crate::error::{EmbedError, Error, Result};

/// Default embedding dimensions for the offline fallback.
pub const DEFAULT_DIMENSIONS: usize = 384;

/// Default maximum batch size per provider call.
pub const DEFAULT_MAX_BATCH: usize = 64;

/// Trait for embedding generators.
///
/// Implementations must be thread-safe (`Send + Sync`); `embed` is the
/// suspension point for all embedding I/O and must return one vector
/// per input text, in input order, each of `dimensions()` length.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the embedding dimensions.
    fn dimensions(&self) -> usize;

    /// Returns the maximum batch size accepted by one call.
    fn max_batch(&self) -> usize {
        DEFAULT_MAX_BATCH
    }

    /// Generates embeddings for a batch of texts.
    ///
    /// # Errors
    ///
    /// Returns [`EmbedError::Transient`] for conditions worth retrying
    /// and [`EmbedError::Fatal`] for terminal provider failures.
    async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbedError>;
}

/// Creates the embedder selected by configuration.
///
/// # Errors
///
/// Returns a configuration error when a provider requires a base URL
/// or API key that is missing.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider {
        EmbeddingProvider::Hash => Ok(Arc::new(FallbackEmbedder::new(config.dimensions))),
        EmbeddingProvider::Openai => Ok(Arc::new(HttpEmbedder::openai(config)?)),
        EmbeddingProvider::Dashscope => Ok(Arc::new(HttpEmbedder::dashscope(config)?)),
        EmbeddingProvider::Custom => {
            let base_url = config.base_url.as_deref().ok_or_else(|| Error::Config {
                message: "custom embedding provider requires base_url".to_string(),
            })?;
            Ok(Arc::new(HttpEmbedder::custom(config, base_url)))
        }
    }
}

/// Computes cosine similarity between two embedding vectors.
///
/// Returns a value between -1.0 (opposite) and 1.0 (identical).
/// Returns 0.0 for mismatched lengths or zero-magnitude vectors.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical() {
        let a = vec![1.0, 0.0, 0.0];
        let sim = cosine_similarity(&a, &a);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_degenerate() {
        assert!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]).abs() < 1e-6);
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).abs() < 1e-6);
    }

    #[test]
    fn test_create_embedder_hash() {
        let config = EmbeddingConfig::default();
        let embedder = create_embedder(&config).unwrap();
        assert_eq!(embedder.dimensions(), 384);
    }

    #[test]
    fn test_create_embedder_custom_requires_base_url() {
        let config = EmbeddingConfig {
            provider: EmbeddingProvider::Custom,
            base_url: None,
            ..Default::default()
        };
        assert!(create_embedder(&config).is_err());
    }
}
