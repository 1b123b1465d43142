//! Deterministic offline embedder.
//!
//! Serves deployments with no embedding provider configured, and
//! tests. Embeddings are built by random indexing: every distinct
//! token deterministically seeds a dense pseudo-random direction, and
//! a text's embedding is the square-root-frequency weighted sum of its
//! token directions, normalized to unit length. Texts that share
//! tokens share directions, so lexical overlap raises cosine
//! similarity; this is not semantic similarity. Configure a real
//! provider for semantic understanding.

use async_trait::async_trait;
use rayon::prelude::*;
use std::collections::BTreeMap;

use crate::embedding::Embedder;
use crate::error::EmbedError;

/// FNV-1a offset basis (token seed hash).
const FNV_OFFSET: u64 = 0xCBF2_9CE4_8422_2325;

/// FNV-1a prime.
const FNV_PRIME: u64 = 0x0100_0000_01B3;

/// SplitMix64 increment (direction stream).
const SPLITMIX_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;

/// Deterministic random-indexing embedder.
pub struct FallbackEmbedder {
    dimensions: usize,
}

impl FallbackEmbedder {
    /// Creates a new fallback embedder with the specified dimensions.
    #[must_use]
    pub const fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    /// FNV-1a hash of a token, used to seed its direction.
    fn token_seed(token: &str) -> u64 {
        let mut hash = FNV_OFFSET;
        for byte in token.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        hash
    }

    /// Accumulates the token's pseudo-random direction, scaled by
    /// `weight`.
    ///
    /// The direction is the SplitMix64 stream seeded from the token,
    /// mapped to roughly uniform values in `[-1, 1]`. Distinct tokens
    /// get near-orthogonal directions in expectation, so unrelated
    /// texts stay close to orthogonal.
    fn accumulate(embedding: &mut [f32], token: &str, weight: f32) {
        let mut state = Self::token_seed(token);
        for value in embedding.iter_mut() {
            state = state.wrapping_add(SPLITMIX_GAMMA);
            let mut z = state;
            z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
            z ^= z >> 31;
            // Low 24 bits, centered to [-1, 1]
            #[allow(clippy::cast_precision_loss)]
            let unit = (z & 0x00FF_FFFF) as f32 / 8_388_607.5 - 1.0;
            *value += weight * unit;
        }
    }

    /// Builds the unit-length embedding of one text.
    fn embed_text(&self, text: &str) -> Vec<f32> {
        // BTreeMap keeps accumulation order deterministic, which keeps
        // the float sums bit-identical across calls
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            *counts.entry(token.to_lowercase()).or_insert(0) += 1;
        }

        let mut embedding = vec![0.0f32; self.dimensions];
        for (token, count) in &counts {
            #[allow(clippy::cast_precision_loss)]
            let weight = (*count as f32).sqrt();
            Self::accumulate(&mut embedding, token, weight);
        }

        let magnitude: f32 = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut embedding {
                *value /= magnitude;
            }
        }
        embedding
    }
}

#[async_trait]
impl Embedder for FallbackEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        // CPU-bound: parallelize across the batch
        Ok(texts.par_iter().map(|t| self.embed_text(t)).collect())
    }
}
