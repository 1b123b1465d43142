//! HTTP embedding provider client.
//!
//! Speaks the OpenAI `/v1/embeddings` wire shape, which DashScope's
//! compatible mode and most self-hosted providers also accept. The
//! provider differences collapse to a base URL and an API key header.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::EmbeddingConfig;
use crate::embedding::Embedder;
use crate::error::{EmbedError, Error, Result};

/// OpenAI API base URL.
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// DashScope OpenAI-compatible base URL.
const DASHSCOPE_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    encoding_format: &'static str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

/// OpenAI-compatible HTTP embedder.
pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    dimensions: usize,
    max_batch: usize,
}

impl HttpEmbedder {
    /// Creates an embedder against the OpenAI API.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the API key is missing.
    pub fn openai(config: &EmbeddingConfig) -> Result<Self> {
        if config.api_key.is_none() {
            return Err(Error::Config {
                message: "openai embedding provider requires an API key".to_string(),
            });
        }
        Ok(Self::with_base_url(config, OPENAI_BASE_URL))
    }

    /// Creates an embedder against DashScope's compatible endpoint.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the API key is missing.
    pub fn dashscope(config: &EmbeddingConfig) -> Result<Self> {
        if config.api_key.is_none() {
            return Err(Error::Config {
                message: "dashscope embedding provider requires an API key".to_string(),
            });
        }
        let base = config.base_url.as_deref().unwrap_or(DASHSCOPE_BASE_URL);
        Ok(Self::with_base_url(config, base))
    }

    /// Creates an embedder against a custom OpenAI-compatible endpoint.
    #[must_use]
    pub fn custom(config: &EmbeddingConfig, base_url: &str) -> Self {
        Self::with_base_url(config, base_url)
    }

    fn with_base_url(config: &EmbeddingConfig, base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            dimensions: config.dimensions,
            max_batch: config.batch_max,
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn max_batch(&self) -> usize {
        self.max_batch
    }

    async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.len() > self.max_batch {
            return Err(EmbedError::BatchTooLarge {
                len: texts.len(),
                max: self.max_batch,
            });
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
            encoding_format: "float",
        };

        let mut builder = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let response = response.error_for_status()?;
        let body: EmbeddingResponse = response.json().await.map_err(|e| EmbedError::Fatal {
            reason: format!("malformed embedding response: {e}"),
        })?;

        if body.data.len() != texts.len() {
            return Err(EmbedError::Fatal {
                reason: format!(
                    "provider returned {} embeddings for {} inputs",
                    body.data.len(),
                    texts.len()
                ),
            });
        }

        // Providers may return out of order; index restores input order
        let mut vectors: Vec<Vec<f32>> = vec![Vec::new(); texts.len()];
        for item in body.data {
            if item.embedding.len() != self.dimensions {
                return Err(EmbedError::DimensionMismatch {
                    expected: self.dimensions,
                    actual: item.embedding.len(),
                });
            }
            if item.index >= vectors.len() {
                return Err(EmbedError::Fatal {
                    reason: format!("embedding index {} out of range", item.index),
                });
            }
            vectors[item.index] = item.embedding;
        }

        Ok(vectors)
    }
}
