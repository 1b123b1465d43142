//! Vector index adapter.
//!
//! Defines the async [`VectorIndex`] seam the ingestion pipeline and
//! the retriever talk to, a minimal filter language (equality and
//! inclusion; anything else is refused), and two bundled backends: an
//! in-memory index and a SQLite index with FTS5 lexical search.
//! External engines (Milvus, Elasticsearch, FAISS, Qdrant) plug in
//! behind the same trait.

mod memory;
mod sqlite;

pub use memory::MemoryIndex;
pub use sqlite::SqliteIndex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

use crate::config::{IndexConfig, IndexManagement, VectorStoreType};
use crate::core::ChunkNode;
use crate::error::{Error, IndexError};

/// Minimal metadata filter: equality and inclusion only.
///
/// Fields resolve against `doc_id`, `chunk_id`, `file_type` and the
/// node's `extra` metadata map. Backends must refuse filters they
/// cannot evaluate exactly rather than approximate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    /// Field must equal the value.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub equals: BTreeMap<String, String>,

    /// Field must equal one of the values.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub any_of: BTreeMap<String, Vec<String>>,
}

impl Filter {
    /// Creates an empty filter (matches everything).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires a field to equal a value.
    #[must_use]
    pub fn equals(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.equals.insert(field.into(), value.into());
        self
    }

    /// Requires a field to equal one of the values.
    #[must_use]
    pub fn any_of(mut self, field: impl Into<String>, values: Vec<String>) -> Self {
        self.any_of.insert(field.into(), values);
        self
    }

    /// Returns whether the filter matches everything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.equals.is_empty() && self.any_of.is_empty()
    }

    /// Evaluates the filter against a node.
    #[must_use]
    pub fn matches(&self, node: &ChunkNode) -> bool {
        for (field, value) in &self.equals {
            if node.filter_field(field).as_deref() != Some(value.as_str()) {
                return false;
            }
        }
        for (field, values) in &self.any_of {
            let Some(actual) = node.filter_field(field) else {
                return false;
            };
            if !values.contains(&actual) {
                return false;
            }
        }
        true
    }
}

/// One hit from a vector or lexical search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Matched chunk id.
    pub chunk_id: String,
    /// Owning document.
    pub doc_id: String,
    /// Backend-native score, higher is better.
    pub score: f64,
    /// Byte spans of matched terms (lexical side only).
    pub spans: Vec<Range<usize>>,
}

/// Trait for vector store backends.
///
/// Upserts are idempotent by `chunk_id` and atomic per id; no
/// cross-document transaction is required. All methods are suspension
/// points for index I/O.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Prepares the collection at startup.
    ///
    /// Under [`IndexManagement::CreateIfNotExists`], creates the
    /// collection when missing and fails on dimension mismatch.
    /// [`IndexManagement::NoValidation`] skips all checks.
    async fn ensure_collection(
        &self,
        name: &str,
        dimensions: usize,
        management: IndexManagement,
    ) -> Result<(), IndexError>;

    /// Inserts or replaces nodes by `chunk_id`.
    async fn upsert(&self, nodes: &[ChunkNode]) -> Result<(), IndexError>;

    /// Removes all chunks of a document, returning the count removed.
    async fn delete_by_doc(&self, doc_id: &str) -> Result<usize, IndexError>;

    /// Removes chunks by id, returning the count removed.
    async fn delete_by_ids(&self, chunk_ids: &[String]) -> Result<usize, IndexError>;

    /// Fetches one node by id.
    async fn get(&self, chunk_id: &str) -> Result<Option<ChunkNode>, IndexError>;

    /// Counts persisted chunks of a document.
    async fn count_by_doc(&self, doc_id: &str) -> Result<usize, IndexError>;

    /// Dense similarity search.
    async fn vector_search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchHit>, IndexError>;

    /// Lexical search with match spans where available.
    async fn lexical_search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchHit>, IndexError>;
}

/// Creates the bundled index backend selected by configuration.
///
/// External engines (Milvus, Elasticsearch, FAISS, Qdrant) are consumed
/// through adapters implementing [`VectorIndex`] and must be injected
/// by the caller.
pub fn create_index(config: &IndexConfig) -> crate::error::Result<Arc<dyn VectorIndex>> {
    match config.store_type {
        VectorStoreType::Memory => Ok(Arc::new(MemoryIndex::new())),
        VectorStoreType::Sqlite => {
            let endpoint = config.endpoint.as_deref().unwrap_or(".docpipe/index.db");
            Ok(Arc::new(SqliteIndex::open(endpoint)?))
        }
        other => Err(Error::Config {
            message: format!(
                "vector store {other:?} requires an externally injected adapter"
            ),
        }),
    }
}

/// Lowercase alphanumeric tokens of a text.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Byte spans of case-insensitive term occurrences in text.
pub(crate) fn term_spans(text: &str, terms: &[String]) -> Vec<Range<usize>> {
    let lowered = text.to_lowercase();
    // Lowercasing that changes byte lengths would misalign the spans
    if lowered.len() != text.len() {
        return Vec::new();
    }
    let mut spans = Vec::new();
    for term in terms {
        let mut from = 0;
        while let Some(pos) = lowered[from..].find(term.as_str()) {
            let start = from + pos;
            spans.push(start..start + term.len());
            from = start + term.len().max(1);
            if spans.len() >= 32 {
                break;
            }
        }
    }
    spans.sort_by_key(|r| r.start);
    spans
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FileType, NodeMetadata};

    fn node(doc_id: &str, ordinal: usize) -> ChunkNode {
        let mut meta = NodeMetadata {
            file_type: Some(FileType::Markdown),
            ..Default::default()
        };
        meta.extra
            .insert("datasource".to_string(), "wiki".to_string());
        ChunkNode::new(doc_id, ordinal, format!("text {ordinal}"), meta)
    }

    #[test]
    fn test_empty_filter_matches_all() {
        let filter = Filter::new();
        assert!(filter.is_empty());
        assert!(filter.matches(&node("doc-1", 0)));
    }

    #[test]
    fn test_equals_filter() {
        let filter = Filter::new().equals("doc_id", "doc-1");
        assert!(filter.matches(&node("doc-1", 0)));
        assert!(!filter.matches(&node("doc-2", 0)));
    }

    #[test]
    fn test_any_of_filter() {
        let filter = Filter::new().any_of(
            "doc_id",
            vec!["doc-1".to_string(), "doc-2".to_string()],
        );
        assert!(filter.matches(&node("doc-1", 0)));
        assert!(filter.matches(&node("doc-2", 0)));
        assert!(!filter.matches(&node("doc-3", 0)));
    }

    #[test]
    fn test_metadata_field_filter() {
        let filter = Filter::new().equals("datasource", "wiki");
        assert!(filter.matches(&node("doc-1", 0)));

        let filter = Filter::new().equals("datasource", "crm");
        assert!(!filter.matches(&node("doc-1", 0)));

        let filter = Filter::new().equals("missing_field", "x");
        assert!(!filter.matches(&node("doc-1", 0)));
    }

    #[test]
    fn test_combined_filters_conjunctive() {
        let filter = Filter::new()
            .equals("doc_id", "doc-1")
            .equals("file_type", "md");
        assert!(filter.matches(&node("doc-1", 0)));

        let filter = Filter::new()
            .equals("doc_id", "doc-1")
            .equals("file_type", "pdf");
        assert!(!filter.matches(&node("doc-1", 0)));
    }

    #[test]
    fn test_create_index_bundled_backends() {
        let config = IndexConfig::default();
        assert!(create_index(&config).is_ok());

        let config = IndexConfig {
            store_type: VectorStoreType::Milvus,
            ..Default::default()
        };
        assert!(create_index(&config).is_err());
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("HNSW index, Milvus!"),
            vec!["hnsw", "index", "milvus"]
        );
        assert!(tokenize("  ,.;  ").is_empty());
    }

    #[test]
    fn test_term_spans() {
        let text = "Milvus supports HNSW index";
        let spans = term_spans(text, &["hnsw".to_string(), "index".to_string()]);
        assert_eq!(spans.len(), 2);
        assert_eq!(&text[spans[0].clone()], "HNSW");
        assert_eq!(&text[spans[1].clone()], "index");
    }
}
