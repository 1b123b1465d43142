//! Hybrid retrieval engine.
//!
//! Runs dense and lexical search in parallel, min-max normalizes each
//! list, fuses with configurable weights, deduplicates by chunk id,
//! optionally reranks the head of the list, and returns ranked
//! passages with highlights where the lexical side produced spans.

mod fusion;
mod rerank;

pub use fusion::{fuse, min_max_normalize};
pub use rerank::{Reranker, TermOverlapReranker, create_reranker};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::config::RetrievalConfig;
use crate::core::NodeMetadata;
use crate::embedding::EmbeddingClient;
use crate::error::{Error, Result, RetrievalError};
use crate::index::{Filter, SearchHit, VectorIndex};

/// Queries longer than this are rejected.
pub const MAX_QUERY_BYTES: usize = 8 * 1024;

/// Each side fetches `top_k * CANDIDATE_MULTIPLIER` candidates.
pub const CANDIDATE_MULTIPLIER: usize = 3;

/// Per-query retrieval switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFlags {
    /// Run the dense side.
    pub use_vector: bool,
    /// Run the lexical side.
    pub use_lexical: bool,
    /// Rerank the fused head.
    pub rerank: bool,
}

impl Default for SearchFlags {
    fn default() -> Self {
        Self {
            use_vector: true,
            use_lexical: true,
            rerank: false,
        }
    }
}

/// One ranked passage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    /// Matched chunk id.
    pub chunk_id: String,
    /// Owning document.
    pub doc_id: String,
    /// Chunk text.
    pub text: String,
    /// Node metadata.
    pub metadata: NodeMetadata,
    /// Raw dense score, when the dense side saw the chunk.
    pub vector_score: Option<f64>,
    /// Raw lexical score, when the lexical side saw the chunk.
    pub lexical_score: Option<f64>,
    /// Weighted combination of the normalized scores.
    pub fused_score: f64,
    /// Reranker score, when reranking ran over this result.
    pub rerank_score: Option<f64>,
    /// Snippet around the first lexical match.
    pub highlight: Option<String>,
}

#[derive(Default)]
struct Candidate {
    doc_id: String,
    vector_raw: Option<f64>,
    vector_norm: Option<f64>,
    lexical_raw: Option<f64>,
    lexical_norm: Option<f64>,
    spans: Vec<Range<usize>>,
}

/// Hybrid retriever over an embedder and a vector index.
pub struct HybridRetriever {
    embedder: EmbeddingClient,
    index: Arc<dyn VectorIndex>,
    config: RetrievalConfig,
    reranker: Option<Arc<dyn Reranker>>,
}

impl HybridRetriever {
    /// Creates a retriever; the reranker comes from the configuration.
    #[must_use]
    pub fn new(
        embedder: EmbeddingClient,
        index: Arc<dyn VectorIndex>,
        config: RetrievalConfig,
    ) -> Self {
        let reranker = create_reranker(&config);
        Self {
            embedder,
            index,
            config,
            reranker,
        }
    }

    /// Overrides the reranker (tests, custom cross-encoders).
    #[must_use]
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Executes a hybrid search.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::InvalidQuery`] for empty or overlong
    /// queries. Zero hits yield an empty list, not an error.
    #[instrument(skip_all, fields(top_k = top_k))]
    #[allow(clippy::too_many_lines)]
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&Filter>,
        flags: SearchFlags,
    ) -> Result<Vec<RetrievalResult>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RetrievalError::InvalidQuery {
                reason: "query is empty".to_string(),
            }
            .into());
        }
        if query.len() > MAX_QUERY_BYTES {
            return Err(RetrievalError::InvalidQuery {
                reason: format!("query exceeds {MAX_QUERY_BYTES} bytes"),
            }
            .into());
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let k_side = top_k.saturating_mul(CANDIDATE_MULTIPLIER).max(1);

        // Both sides run concurrently; each is an independent I/O path
        let vector_side = async {
            if !flags.use_vector {
                return Ok::<Vec<SearchHit>, Error>(Vec::new());
            }
            let query_vector = self.embedder.embed_one(query).await?;
            Ok(self
                .index
                .vector_search(&query_vector, k_side, filter)
                .await?)
        };
        let lexical_side = async {
            if !flags.use_lexical {
                return Ok::<Vec<SearchHit>, Error>(Vec::new());
            }
            Ok(self.index.lexical_search(query, k_side, filter).await?)
        };
        let (vector_hits, lexical_hits) = tokio::join!(vector_side, lexical_side);
        let (vector_hits, lexical_hits) = (vector_hits?, lexical_hits?);

        debug!(
            vector_hits = vector_hits.len(),
            lexical_hits = lexical_hits.len(),
            "retrieval candidates gathered"
        );

        // Normalize within each list, then merge per chunk id keeping
        // the max on duplicate hits
        let mut candidates: HashMap<String, Candidate> = HashMap::new();

        let vector_norms = min_max_normalize(
            &vector_hits.iter().map(|h| h.score).collect::<Vec<_>>(),
        );
        for (hit, norm) in vector_hits.into_iter().zip(vector_norms) {
            let entry = candidates.entry(hit.chunk_id).or_default();
            entry.doc_id = hit.doc_id;
            if entry.vector_norm.is_none_or(|v| norm > v) {
                entry.vector_raw = Some(hit.score);
                entry.vector_norm = Some(norm);
            }
        }

        let lexical_norms = min_max_normalize(
            &lexical_hits.iter().map(|h| h.score).collect::<Vec<_>>(),
        );
        for (hit, norm) in lexical_hits.into_iter().zip(lexical_norms) {
            let entry = candidates.entry(hit.chunk_id).or_default();
            entry.doc_id = hit.doc_id;
            if entry.lexical_norm.is_none_or(|v| norm > v) {
                entry.lexical_raw = Some(hit.score);
                entry.lexical_norm = Some(norm);
                entry.spans = hit.spans;
            }
        }

        // Fuse and order; chunk id breaks exact ties deterministically
        let mut ranked: Vec<(String, Candidate, f64)> = candidates
            .into_iter()
            .map(|(chunk_id, candidate)| {
                let fused = fuse(
                    candidate.vector_norm,
                    candidate.lexical_norm,
                    self.config.w_vector,
                    self.config.w_lexical,
                );
                (chunk_id, candidate, fused)
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        let keep = if flags.rerank {
            top_k.max(self.config.rerank_top_n)
        } else {
            top_k
        };
        ranked.truncate(keep);

        // Materialize results from the index
        let mut results = Vec::new();
        for (chunk_id, candidate, fused) in ranked {
            let Some(node) = self.index.get(&chunk_id).await? else {
                // Hit vanished between search and fetch; skip it
                continue;
            };
            let highlight = make_highlight(&node.text, &candidate.spans);
            results.push(RetrievalResult {
                chunk_id,
                doc_id: candidate.doc_id,
                text: node.text,
                metadata: node.metadata,
                vector_score: candidate.vector_raw,
                lexical_score: candidate.lexical_raw,
                fused_score: fused,
                rerank_score: None,
                highlight,
            });
        }

        if flags.rerank {
            self.rerank_head(query, &mut results).await?;
        }

        results.truncate(top_k);
        Ok(results)
    }

    /// Reranks the top `rerank_top_n` results in place.
    async fn rerank_head(&self, query: &str, results: &mut Vec<RetrievalResult>) -> Result<()> {
        let Some(reranker) = &self.reranker else {
            return Ok(());
        };
        let head = self.config.rerank_top_n.min(results.len());
        if head == 0 {
            return Ok(());
        }

        let texts: Vec<String> = results[..head].iter().map(|r| r.text.clone()).collect();
        let scores = reranker.score(query, &texts).await?;
        for (result, score) in results[..head].iter_mut().zip(scores) {
            result.rerank_score = Some(score);
        }

        // Rerank score orders the head; fused score breaks ties
        results[..head].sort_by(|a, b| {
            let a_key = (a.rerank_score.unwrap_or(0.0), a.fused_score);
            let b_key = (b.rerank_score.unwrap_or(0.0), b.fused_score);
            b_key
                .partial_cmp(&a_key)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(())
    }
}

/// Builds a short snippet around the first matched span, wrapping each
/// in-window match in `**`.
fn make_highlight(text: &str, spans: &[Range<usize>]) -> Option<String> {
    const WINDOW: usize = 40;

    let first = spans.first()?;
    let start = floor_char_boundary(text, first.start.saturating_sub(WINDOW));
    let end = ceil_char_boundary(text, (first.end + WINDOW).min(text.len()));

    let mut snippet = String::new();
    if start > 0 {
        snippet.push('…');
    }
    let mut cursor = start;
    for span in spans {
        if span.start < cursor || span.end > end {
            continue;
        }
        snippet.push_str(&text[cursor..span.start]);
        snippet.push_str("**");
        snippet.push_str(&text[span.start..span.end]);
        snippet.push_str("**");
        cursor = span.end;
    }
    snippet.push_str(&text[cursor..end]);
    if end < text.len() {
        snippet.push('…');
    }
    Some(snippet)
}

fn floor_char_boundary(s: &str, mut pos: usize) -> usize {
    pos = pos.min(s.len());
    while pos > 0 && !s.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

fn ceil_char_boundary(s: &str, mut pos: usize) -> usize {
    pos = pos.min(s.len());
    while pos < s.len() && !s.is_char_boundary(pos) {
        pos += 1;
    }
    pos
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexManagement;
    use crate::core::{ChunkNode, NodeMetadata};
    use crate::embedding::FallbackEmbedder;
    use crate::index::MemoryIndex;

    const DIM: usize = 32;

    async fn seeded(texts: &[&str]) -> (EmbeddingClient, Arc<dyn VectorIndex>) {
        let embedder = EmbeddingClient::new(Arc::new(FallbackEmbedder::new(DIM)), 0);
        let index: Arc<dyn VectorIndex> = Arc::new(MemoryIndex::new());
        index
            .ensure_collection("test", DIM, IndexManagement::CreateIfNotExists)
            .await
            .unwrap();

        let mut nodes = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            let mut node =
                ChunkNode::new("doc-1", i, (*text).to_string(), NodeMetadata::default());
            node.embedding = embedder.embed_one(text).await.unwrap();
            nodes.push(node);
        }
        index.upsert(&nodes).await.unwrap();
        (embedder, index)
    }

    fn retriever(
        embedder: EmbeddingClient,
        index: Arc<dyn VectorIndex>,
        config: RetrievalConfig,
    ) -> HybridRetriever {
        HybridRetriever::new(embedder, index, config)
    }

    #[tokio::test]
    async fn test_hybrid_query_scenario() {
        let (embedder, index) = seeded(&[
            "Milvus supports HNSW index",
            "completely unrelated content about cooking",
            "another chunk about gardening techniques",
        ])
        .await;
        let retriever = retriever(embedder, index, RetrievalConfig::default());

        let results = retriever
            .search("HNSW index", 5, None, SearchFlags::default())
            .await
            .unwrap();

        assert!(!results.is_empty());
        assert_eq!(results[0].chunk_id, "doc-1:000000");
        assert!(
            results[0].fused_score >= 0.9,
            "fused score {} below 0.9",
            results[0].fused_score
        );
        assert!(results[0].highlight.is_some());
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let (embedder, index) = seeded(&["content"]).await;
        let retriever = retriever(embedder, index, RetrievalConfig::default());

        let err = retriever
            .search("   ", 5, None, SearchFlags::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Retrieval(RetrievalError::InvalidQuery { .. })
        ));
    }

    #[tokio::test]
    async fn test_overlong_query_rejected() {
        let (embedder, index) = seeded(&["content"]).await;
        let retriever = retriever(embedder, index, RetrievalConfig::default());

        let long = "q".repeat(MAX_QUERY_BYTES + 1);
        assert!(
            retriever
                .search(&long, 5, None, SearchFlags::default())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_zero_hits_is_empty_not_error() {
        let (embedder, index) = seeded(&[]).await;
        let retriever = retriever(embedder, index, RetrievalConfig::default());

        let results = retriever
            .search("anything", 5, None, SearchFlags::default())
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_vector_only_equals_vector_order() {
        let (embedder, index) = seeded(&[
            "rust systems programming language",
            "python scripting language",
            "cooking with cast iron pans",
        ])
        .await;

        let query_vector = embedder.embed_one("systems programming").await.unwrap();
        let raw = index.vector_search(&query_vector, 9, None).await.unwrap();
        let raw_order: Vec<String> = raw.into_iter().map(|h| h.chunk_id).collect();

        let config = RetrievalConfig {
            w_vector: 1.0,
            w_lexical: 0.0,
            ..Default::default()
        };
        let retriever = retriever(embedder, index, config);
        let results = retriever
            .search("systems programming", 3, None, SearchFlags::default())
            .await
            .unwrap();
        let fused_order: Vec<String> = results.into_iter().map(|r| r.chunk_id).collect();

        assert_eq!(fused_order, raw_order[..fused_order.len()]);
    }

    #[tokio::test]
    async fn test_lexical_only_equals_lexical_order() {
        let (embedder, index) = seeded(&[
            "alpha beta gamma",
            "alpha beta",
            "alpha",
        ])
        .await;

        let raw = index.lexical_search("alpha beta gamma", 9, None).await.unwrap();
        let raw_order: Vec<String> = raw.into_iter().map(|h| h.chunk_id).collect();

        let config = RetrievalConfig {
            w_vector: 0.0,
            w_lexical: 1.0,
            ..Default::default()
        };
        let retriever = retriever(embedder, index, config);
        let results = retriever
            .search("alpha beta gamma", 3, None, SearchFlags::default())
            .await
            .unwrap();
        let fused_order: Vec<String> = results.into_iter().map(|r| r.chunk_id).collect();

        assert_eq!(fused_order, raw_order[..fused_order.len()]);
    }

    #[tokio::test]
    async fn test_lexical_disabled_leaves_no_lexical_scores() {
        let (embedder, index) = seeded(&["searchable text here"]).await;
        let retriever = retriever(embedder, index, RetrievalConfig::default());

        let flags = SearchFlags {
            use_lexical: false,
            ..Default::default()
        };
        let results = retriever
            .search("searchable text", 5, None, flags)
            .await
            .unwrap();
        assert!(!results.is_empty());
        assert!(results.iter().all(|r| r.lexical_score.is_none()));
    }

    #[tokio::test]
    async fn test_filter_restricts_results() {
        let embedder = EmbeddingClient::new(Arc::new(FallbackEmbedder::new(DIM)), 0);
        let index: Arc<dyn VectorIndex> = Arc::new(MemoryIndex::new());
        for (doc, ordinal, text) in [
            ("doc-a", 0, "shared topic words"),
            ("doc-b", 0, "shared topic words"),
        ] {
            let mut node =
                ChunkNode::new(doc, ordinal, text.to_string(), NodeMetadata::default());
            node.embedding = embedder.embed_one(text).await.unwrap();
            index.upsert(&[node]).await.unwrap();
        }
        let retriever = retriever(embedder, index, RetrievalConfig::default());

        let filter = Filter::new().equals("doc_id", "doc-b");
        let results = retriever
            .search("shared topic", 5, Some(&filter), SearchFlags::default())
            .await
            .unwrap();
        assert!(!results.is_empty());
        assert!(results.iter().all(|r| r.doc_id == "doc-b"));
    }

    #[tokio::test]
    async fn test_rerank_reorders_head() {
        let (embedder, index) = seeded(&[
            "HNSW index in Milvus",
            "HNSW HNSW HNSW filler text",
            "index of contents",
        ])
        .await;

        let config = RetrievalConfig {
            rerank_model: "term-overlap".to_string(),
            rerank_top_n: 3,
            ..Default::default()
        };
        let retriever = retriever(embedder, index, config);

        let flags = SearchFlags {
            rerank: true,
            ..Default::default()
        };
        let results = retriever
            .search("HNSW index", 3, None, flags)
            .await
            .unwrap();

        assert!(!results.is_empty());
        assert!(results[0].rerank_score.is_some());
        // The chunk containing both query terms wins under the reranker
        assert_eq!(results[0].chunk_id, "doc-1:000000");
        // Head is sorted by rerank score
        for pair in results.windows(2) {
            if let (Some(a), Some(b)) = (pair[0].rerank_score, pair[1].rerank_score) {
                assert!(a >= b);
            }
        }
    }

    #[test]
    fn test_make_highlight() {
        let text = "Milvus supports HNSW index for vector search";
        let spans = vec![16..20, 21..26];
        let highlight = make_highlight(text, &spans).unwrap();
        assert!(highlight.contains("**HNSW**"));
        assert!(highlight.contains("**index**"));

        assert!(make_highlight(text, &[]).is_none());
    }
}
