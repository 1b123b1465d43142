//! Chunker trait definition.
//!
//! Defines the interface for all chunking strategies, enabling
//! pluggable text segmentation approaches.

use std::ops::Range;

use crate::core::{BoundaryKind, Language};
use crate::error::{ChunkingError, Result};

/// A chunk produced by a chunker, before node assembly.
///
/// Ordinals and ids are assigned by the caller; chunkers only report
/// text, source offsets and boundary metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPiece {
    /// Chunk text, including any carried heading context.
    pub text: String,

    /// Byte range of the underlying content in the source text.
    pub byte_range: Range<usize>,

    /// Boundary kind that closed this chunk.
    pub boundary: BoundaryKind,

    /// Ancestor headings, outermost first (markdown chunkers only).
    pub heading_path: Vec<String>,

    /// Set when a single atomic block exceeded the chunk size and was
    /// emitted whole.
    pub oversized: bool,
}

impl ChunkPiece {
    /// Creates a piece with no heading context.
    #[must_use]
    pub const fn new(text: String, byte_range: Range<usize>, boundary: BoundaryKind) -> Self {
        Self {
            text,
            byte_range,
            boundary,
            heading_path: Vec::new(),
            oversized: false,
        }
    }

    /// Returns the size of the piece text in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.text.len()
    }
}

/// Parameters provided to chunkers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkParams {
    /// Target chunk size in characters.
    pub chunk_size: usize,

    /// Overlap between consecutive chunks.
    pub chunk_overlap: usize,

    /// Language for sentence segmentation.
    pub language: Language,

    /// Honor structural boundaries (code fences, tables).
    pub respect_structure: bool,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            chunk_size: super::DEFAULT_CHUNK_SIZE,
            chunk_overlap: super::DEFAULT_OVERLAP,
            language: Language::English,
            respect_structure: true,
        }
    }
}

impl ChunkParams {
    /// Creates params with a custom chunk size and no overlap.
    #[must_use]
    pub fn with_size(chunk_size: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap: 0,
            ..Default::default()
        }
    }

    /// Creates params with custom size and overlap.
    #[must_use]
    pub fn with_size_and_overlap(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
            ..Default::default()
        }
    }

    /// Sets the segmentation language.
    #[must_use]
    pub const fn language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    /// Sets whether structural boundaries are honored.
    #[must_use]
    pub const fn respect_structure(mut self, respect: bool) -> Self {
        self.respect_structure = respect;
        self
    }
}

/// Trait for chunking text into ordered pieces.
///
/// Implementations must be `Send + Sync` and deterministic: the same
/// input and params always produce the same pieces, which the
/// incremental manager and the parallel executor rely on.
///
/// # Examples
///
/// ```
/// use docpipe::chunking::{ChunkParams, Chunker, FixedChunker};
///
/// let chunker = FixedChunker::new();
/// let text = "Hello, world! ".repeat(20);
/// let pieces = chunker
///     .chunk(&text, &ChunkParams::with_size(100))
///     .unwrap();
/// assert!(!pieces.is_empty());
/// ```
pub trait Chunker: Send + Sync {
    /// Chunks the input text into ordered pieces.
    ///
    /// # Errors
    ///
    /// Returns an error if the params are invalid.
    fn chunk(&self, text: &str, params: &ChunkParams) -> Result<Vec<ChunkPiece>>;

    /// Returns the name of the chunking strategy.
    fn name(&self) -> &'static str;

    /// Returns a description of the chunking strategy.
    fn description(&self) -> &'static str {
        "No description available"
    }

    /// Validates params before chunking.
    ///
    /// # Errors
    ///
    /// Returns an error if chunk size is zero, exceeds the maximum, or
    /// overlap is not smaller than the chunk size.
    fn validate(&self, params: &ChunkParams) -> Result<()> {
        if params.chunk_size == 0 {
            return Err(ChunkingError::InvalidConfig {
                reason: "chunk_size must be > 0".to_string(),
            }
            .into());
        }
        if params.chunk_size > super::MAX_CHUNK_SIZE {
            return Err(ChunkingError::ChunkTooLarge {
                size: params.chunk_size,
                max: super::MAX_CHUNK_SIZE,
            }
            .into());
        }
        if params.chunk_overlap >= params.chunk_size {
            return Err(ChunkingError::OverlapTooLarge {
                overlap: params.chunk_overlap,
                size: params.chunk_size,
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MinimalChunker;

    impl Chunker for MinimalChunker {
        fn chunk(&self, _text: &str, _params: &ChunkParams) -> Result<Vec<ChunkPiece>> {
            Ok(vec![])
        }

        fn name(&self) -> &'static str {
            "minimal"
        }
    }

    #[test]
    fn test_params_defaults() {
        let params = ChunkParams::default();
        assert_eq!(params.chunk_size, super::super::DEFAULT_CHUNK_SIZE);
        assert_eq!(params.chunk_overlap, super::super::DEFAULT_OVERLAP);
        assert!(params.respect_structure);
        assert_eq!(params.language, Language::English);
    }

    #[test]
    fn test_params_builder() {
        let params = ChunkParams::with_size_and_overlap(1000, 100)
            .language(Language::Chinese)
            .respect_structure(false);
        assert_eq!(params.chunk_size, 1000);
        assert_eq!(params.chunk_overlap, 100);
        assert_eq!(params.language, Language::Chinese);
        assert!(!params.respect_structure);
    }

    #[test]
    fn test_validate_zero_chunk_size() {
        let params = ChunkParams {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(MinimalChunker.validate(&params).is_err());
    }

    #[test]
    fn test_validate_overlap_too_large() {
        let params = ChunkParams::with_size_and_overlap(50, 100);
        assert!(MinimalChunker.validate(&params).is_err());
    }

    #[test]
    fn test_validate_chunk_too_large() {
        let params = ChunkParams::with_size(super::super::MAX_CHUNK_SIZE + 1);
        assert!(MinimalChunker.validate(&params).is_err());
    }

    #[test]
    fn test_validate_ok() {
        let params = ChunkParams::with_size_and_overlap(100, 10);
        assert!(MinimalChunker.validate(&params).is_ok());
    }

    #[test]
    fn test_default_description() {
        assert_eq!(MinimalChunker.description(), "No description available");
    }

    #[test]
    fn test_piece_size() {
        let piece = ChunkPiece::new(
            "hello".to_string(),
            0..5,
            crate::core::BoundaryKind::Sentence,
        );
        assert_eq!(piece.size(), 5);
        assert!(!piece.oversized);
        assert!(piece.heading_path.is_empty());
    }
}
