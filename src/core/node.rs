//! Chunk node representation.
//!
//! Nodes are passage-sized units of text carrying an embedding and
//! metadata, persisted in the vector index. Node identifiers are derived
//! deterministically from the owning document and the chunk ordinal so
//! that re-ingesting identical bytes produces identical ids.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

use crate::core::FileType;

/// Labeled break point chosen by a chunker, with a split priority.
///
/// When a split point must be chosen, the highest-priority boundary
/// inside the search window wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryKind {
    /// Blank-line separated section break.
    SectionBreak,
    /// Markdown heading.
    Heading,
    /// Fenced code block (atomic, never split).
    CodeBlock,
    /// Table (atomic rows, never split mid-row).
    Table,
    /// Horizontal rule.
    HorizontalRule,
    /// Paragraph break.
    Paragraph,
    /// Block quote.
    Quote,
    /// List item.
    ListItem,
    /// Sentence boundary.
    Sentence,
    /// Raw character boundary; fallback only.
    Character,
}

impl BoundaryKind {
    /// Returns the split priority of this boundary kind.
    #[must_use]
    pub const fn priority(self) -> f32 {
        match self {
            Self::SectionBreak | Self::Heading | Self::CodeBlock | Self::Table => 1.0,
            Self::HorizontalRule => 0.9,
            Self::Paragraph | Self::Quote => 0.8,
            Self::ListItem => 0.7,
            Self::Sentence => 0.5,
            Self::Character => 0.1,
        }
    }

    /// Returns the canonical snake_case name used in node metadata.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SectionBreak => "section_break",
            Self::Heading => "heading",
            Self::CodeBlock => "code_block",
            Self::Table => "table",
            Self::HorizontalRule => "horizontal_rule",
            Self::Paragraph => "paragraph",
            Self::Quote => "quote",
            Self::ListItem => "list_item",
            Self::Sentence => "sentence",
            Self::Character => "character",
        }
    }
}

impl fmt::Display for BoundaryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derives the deterministic chunk id for a document ordinal.
///
/// The zero-padded ordinal keeps lexicographic id order equal to source
/// order, which backends without numeric sort keys rely on.
///
/// # Examples
///
/// ```
/// use docpipe::core::chunk_id;
///
/// assert_eq!(chunk_id("doc-1", 0), "doc-1:000000");
/// assert_eq!(chunk_id("doc-1", 42), "doc-1:000042");
/// ```
#[must_use]
pub fn chunk_id(doc_id: &str, ordinal: usize) -> String {
    format!("{doc_id}:{ordinal:06}")
}

/// Metadata persisted alongside each node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMetadata {
    /// File type of the owning document.
    pub file_type: Option<FileType>,

    /// Ancestor headings for hierarchical chunking, outermost first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub heading_path: Vec<String>,

    /// Boundary kind that closed this chunk.
    pub boundary: Option<BoundaryKind>,

    /// Set when a single atomic block exceeded the chunk size and was
    /// emitted whole.
    #[serde(default)]
    pub oversized: bool,

    /// Byte range in the source text.
    pub byte_range: Option<Range<usize>>,

    /// Additional key/value metadata inherited from the document.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

/// A persisted chunk with its embedding.
///
/// For a given `doc_id`, ordinals are unique and form the contiguous
/// range `[0, node_count)` after a successful ingest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkNode {
    /// Unique id, derived from `doc_id` and `ordinal` via [`chunk_id`].
    pub chunk_id: String,

    /// Owning document.
    pub doc_id: String,

    /// 0-based position within the document.
    pub ordinal: usize,

    /// Normalized chunk text.
    pub text: String,

    /// Embedding vector of the deployment's fixed dimension.
    pub embedding: Vec<f32>,

    /// Node metadata.
    pub metadata: NodeMetadata,

    /// SHA-256 hex digest of `text`.
    pub content_hash: String,
}

impl ChunkNode {
    /// Creates a node with a derived id and computed content hash.
    ///
    /// The embedding starts empty and is filled by the embed stage.
    #[must_use]
    pub fn new(doc_id: &str, ordinal: usize, text: String, metadata: NodeMetadata) -> Self {
        let content_hash = crate::state::hash_text(&text);
        Self {
            chunk_id: chunk_id(doc_id, ordinal),
            doc_id: doc_id.to_string(),
            ordinal,
            text,
            embedding: Vec::new(),
            metadata,
            content_hash,
        }
    }

    /// Returns the size of the chunk text in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.text.len()
    }

    /// Returns a metadata field visible to index filters.
    ///
    /// `doc_id` and `file_type` are first-class fields; everything else
    /// resolves through the `extra` map.
    #[must_use]
    pub fn filter_field(&self, field: &str) -> Option<String> {
        match field {
            "doc_id" => Some(self.doc_id.clone()),
            "chunk_id" => Some(self.chunk_id.clone()),
            "file_type" => self.metadata.file_type.map(|t| t.as_str().to_string()),
            _ => self.metadata.extra.get(field).cloned(),
        }
    }
}
