//! Reranking seam.
//!
//! A reranker rescores the top fused candidates against the query.
//! Production deployments plug a cross-encoder service in behind the
//! trait; the bundled implementation scores lexical term and bigram
//! overlap, which is cheap and deterministic.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::error::Result;

/// Trait for candidate rescoring.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Model or strategy name.
    fn name(&self) -> &str;

    /// Scores each candidate text against the query; higher is better.
    ///
    /// Returns one score per candidate, in input order.
    async fn score(&self, query: &str, candidates: &[String]) -> Result<Vec<f64>>;
}

/// Creates the reranker selected by configuration.
///
/// An empty `rerank_model` disables reranking entirely.
#[must_use]
pub fn create_reranker(config: &RetrievalConfig) -> Option<Arc<dyn Reranker>> {
    if config.rerank_model.is_empty() {
        return None;
    }
    Some(Arc::new(TermOverlapReranker {
        name: config.rerank_model.clone(),
    }))
}

/// Lexical overlap reranker (cross-encoder stand-in).
pub struct TermOverlapReranker {
    name: String,
}

impl TermOverlapReranker {
    /// Creates a reranker with the given display name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    fn terms(text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
            .collect()
    }

    fn bigrams(terms: &[String]) -> HashSet<(String, String)> {
        terms
            .windows(2)
            .map(|w| (w[0].clone(), w[1].clone()))
            .collect()
    }
}

#[async_trait]
impl Reranker for TermOverlapReranker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn score(&self, query: &str, candidates: &[String]) -> Result<Vec<f64>> {
        let query_terms = Self::terms(query);
        let query_set: HashSet<&String> = query_terms.iter().collect();
        let query_bigrams = Self::bigrams(&query_terms);

        let scores = candidates
            .iter()
            .map(|candidate| {
                if query_terms.is_empty() {
                    return 0.0;
                }
                let terms = Self::terms(candidate);
                let matched = terms.iter().filter(|t| query_set.contains(t)).count();
                let bigrams = Self::bigrams(&terms);
                let bigram_matched = bigrams.intersection(&query_bigrams).count();

                #[allow(clippy::cast_precision_loss)]
                {
                    let unigram = matched.min(query_terms.len()) as f64 / query_terms.len() as f64;
                    let bigram = if query_bigrams.is_empty() {
                        0.0
                    } else {
                        bigram_matched as f64 / query_bigrams.len() as f64
                    };
                    unigram * 0.6 + bigram * 0.4
                }
            })
            .collect();
        Ok(scores)
    }
}
