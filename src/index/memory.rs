//! In-memory vector index backend.
//!
//! Brute-force cosine similarity over all nodes and term-frequency
//! lexical scoring with span extraction. The reference backend for
//! tests and small embedded deployments.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::config::IndexManagement;
use crate::core::ChunkNode;
use crate::embedding::cosine_similarity;
use crate::error::IndexError;
use crate::index::{Filter, SearchHit, VectorIndex, term_spans, tokenize};

#[derive(Default)]
struct Inner {
    collection: Option<(String, usize)>,
    nodes: HashMap<String, ChunkNode>,
}

/// In-memory implementation of [`VectorIndex`].
#[derive(Default)]
pub struct MemoryIndex {
    inner: RwLock<Inner>,
}

impl MemoryIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>, IndexError> {
        self.inner.read().map_err(|_| IndexError::Fatal {
            reason: "index lock poisoned".to_string(),
        })
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Inner>, IndexError> {
        self.inner.write().map_err(|_| IndexError::Fatal {
            reason: "index lock poisoned".to_string(),
        })
    }

    /// Lexical score: fraction of query terms present, weighted by
    /// repeat occurrences.
    fn lexical_score(text_tokens: &HashMap<String, usize>, query_terms: &[String]) -> f64 {
        if query_terms.is_empty() {
            return 0.0;
        }
        let mut matched = 0usize;
        let mut tf_bonus = 0.0;
        for term in query_terms {
            if let Some(&count) = text_tokens.get(term) {
                matched += 1;
                #[allow(clippy::cast_precision_loss)]
                {
                    tf_bonus += (count as f64).ln_1p();
                }
            }
        }
        if matched == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let coverage = matched as f64 / query_terms.len() as f64;
        coverage + tf_bonus * 0.01
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn ensure_collection(
        &self,
        name: &str,
        dimensions: usize,
        management: IndexManagement,
    ) -> Result<(), IndexError> {
        if management == IndexManagement::NoValidation {
            return Ok(());
        }
        let mut inner = self.write()?;
        match &inner.collection {
            Some((existing, dims)) if existing == name => {
                if *dims == dimensions {
                    Ok(())
                } else {
                    Err(IndexError::DimensionMismatch {
                        collection: name.to_string(),
                        expected: dimensions,
                        actual: *dims,
                    })
                }
            }
            _ => {
                inner.collection = Some((name.to_string(), dimensions));
                Ok(())
            }
        }
    }

    async fn upsert(&self, nodes: &[ChunkNode]) -> Result<(), IndexError> {
        let mut inner = self.write()?;
        if let Some((_, dims)) = &inner.collection {
            for node in nodes {
                if node.embedding.len() != *dims {
                    return Err(IndexError::Fatal {
                        reason: format!(
                            "node {} embedding has {} dimensions, collection expects {dims}",
                            node.chunk_id,
                            node.embedding.len()
                        ),
                    });
                }
            }
        }
        for node in nodes {
            inner.nodes.insert(node.chunk_id.clone(), node.clone());
        }
        Ok(())
    }

    async fn delete_by_doc(&self, doc_id: &str) -> Result<usize, IndexError> {
        let mut inner = self.write()?;
        let before = inner.nodes.len();
        inner.nodes.retain(|_, node| node.doc_id != doc_id);
        Ok(before - inner.nodes.len())
    }

    async fn delete_by_ids(&self, chunk_ids: &[String]) -> Result<usize, IndexError> {
        let mut inner = self.write()?;
        let mut removed = 0;
        for id in chunk_ids {
            if inner.nodes.remove(id).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn get(&self, chunk_id: &str) -> Result<Option<ChunkNode>, IndexError> {
        Ok(self.read()?.nodes.get(chunk_id).cloned())
    }

    async fn count_by_doc(&self, doc_id: &str) -> Result<usize, IndexError> {
        Ok(self
            .read()?
            .nodes
            .values()
            .filter(|node| node.doc_id == doc_id)
            .count())
    }

    async fn vector_search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchHit>, IndexError> {
        let inner = self.read()?;
        let mut hits: Vec<SearchHit> = inner
            .nodes
            .values()
            .filter(|node| filter.is_none_or(|f| f.matches(node)))
            .map(|node| SearchHit {
                chunk_id: node.chunk_id.clone(),
                doc_id: node.doc_id.clone(),
                score: f64::from(cosine_similarity(query, &node.embedding)),
                spans: Vec::new(),
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }

    async fn lexical_search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchHit>, IndexError> {
        let query_terms = tokenize(query);
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }

        let inner = self.read()?;
        let mut hits: Vec<SearchHit> = Vec::new();
        for node in inner.nodes.values() {
            if !filter.is_none_or(|f| f.matches(node)) {
                continue;
            }
            let mut counts: HashMap<String, usize> = HashMap::new();
            for token in tokenize(&node.text) {
                *counts.entry(token).or_insert(0) += 1;
            }
            let score = Self::lexical_score(&counts, &query_terms);
            if score > 0.0 {
                hits.push(SearchHit {
                    chunk_id: node.chunk_id.clone(),
                    doc_id: node.doc_id.clone(),
                    score,
                    spans: term_spans(&node.text, &query_terms),
                });
            }
        }

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }
}
