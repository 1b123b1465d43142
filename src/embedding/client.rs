//! Batching and retry wrapper around an embedder.
//!
//! Splits arbitrary batches into provider-sized calls and retries
//! transient failures with exponential backoff and full jitter. Fatal
//! failures propagate immediately.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::embedding::Embedder;
use crate::error::EmbedError;

/// Base backoff delay for the first retry.
const BACKOFF_BASE_MS: u64 = 100;

/// Upper bound on a single backoff sleep.
const BACKOFF_CAP_MS: u64 = 10_000;

/// Client wrapper adding bounded batches and transient retry.
#[derive(Clone)]
pub struct EmbeddingClient {
    inner: Arc<dyn Embedder>,
    max_retries: u32,
}

impl EmbeddingClient {
    /// Wraps an embedder with the given retry budget.
    #[must_use]
    pub fn new(inner: Arc<dyn Embedder>, max_retries: u32) -> Self {
        Self { inner, max_retries }
    }

    /// Returns the embedding dimensions.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    /// Embeds any number of texts, splitting into provider-sized calls.
    ///
    /// Output order matches input order. Each provider call is retried
    /// independently on transient failure; a fatal error aborts the
    /// whole batch.
    ///
    /// # Errors
    ///
    /// Returns [`EmbedError::RetriesExhausted`] once the retry budget
    /// for a sub-batch is spent, or the first fatal error encountered.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let max_batch = self.inner.max_batch().max(1);
        let mut vectors = Vec::with_capacity(texts.len());

        for sub in texts.chunks(max_batch) {
            let embedded = self.embed_with_retry(sub).await?;
            vectors.extend(embedded);
        }

        // The contract is one vector per text of the configured length
        if vectors.len() != texts.len() {
            return Err(EmbedError::Fatal {
                reason: format!(
                    "embedder produced {} vectors for {} texts",
                    vectors.len(),
                    texts.len()
                ),
            });
        }
        for vector in &vectors {
            if vector.len() != self.inner.dimensions() {
                return Err(EmbedError::DimensionMismatch {
                    expected: self.inner.dimensions(),
                    actual: vector.len(),
                });
            }
        }

        Ok(vectors)
    }

    /// Embeds one query string.
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vectors = self.embed_batch(std::slice::from_ref(&text.to_string())).await?;
        vectors.pop().ok_or_else(|| EmbedError::Fatal {
            reason: "embedder returned empty batch".to_string(),
        })
    }

    async fn embed_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut attempt = 0;
        loop {
            match self.inner.embed(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = backoff_with_jitter(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient embedding failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) if err.is_transient() => {
                    return Err(EmbedError::RetriesExhausted {
                        attempts: attempt + 1,
                        reason: err.to_string(),
                    });
                }
                Err(err) => {
                    debug!(error = %err, "fatal embedding failure");
                    return Err(err);
                }
            }
        }
    }
}

/// Exponential backoff with full jitter: `random(0..base * 2^attempt)`,
/// capped.
fn backoff_with_jitter(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE_MS.saturating_mul(1_u64 << attempt.min(16));
    let cap = exp.min(BACKOFF_CAP_MS);
    let jittered = rand::rng().random_range(0..=cap);
    Duration::from_millis(jittered)
}
