//! Fixed-size chunking strategy.
//!
//! Provides simple character-based chunking with configurable size and
//! overlap. Respects UTF-8 character boundaries to avoid splitting
//! multi-byte characters.

use crate::chunking::traits::{ChunkParams, ChunkPiece, Chunker};
use crate::chunking::find_char_boundary;
use crate::core::BoundaryKind;
use crate::error::Result;

/// Fixed-size chunker that splits text at character boundaries.
///
/// The simplest strategy: fixed windows with optional overlap,
/// optionally aligned to the nearest preceding newline.
///
/// # Examples
///
/// ```
/// use docpipe::chunking::{ChunkParams, Chunker, FixedChunker};
///
/// let chunker = FixedChunker::new();
/// let text = "Hello, world! ".repeat(20);
/// let pieces = chunker.chunk(&text, &ChunkParams::with_size(100)).unwrap();
/// for piece in &pieces {
///     assert!(piece.size() <= 100);
/// }
/// ```
#[derive(Debug, Clone)]
pub struct FixedChunker {
    /// Whether to align chunk ends to line boundaries.
    line_aware: bool,
}

impl Default for FixedChunker {
    fn default() -> Self {
        Self::new()
    }
}

impl FixedChunker {
    /// Creates a new fixed chunker with line alignment enabled.
    #[must_use]
    pub const fn new() -> Self {
        Self { line_aware: true }
    }

    /// Sets whether to align chunks to line boundaries.
    #[must_use]
    pub const fn line_aware(mut self, enabled: bool) -> Self {
        self.line_aware = enabled;
        self
    }

    /// Finds a valid chunk boundary respecting UTF-8 and optionally lines.
    fn find_boundary(&self, text: &str, target_pos: usize, chunk_size: usize) -> usize {
        let pos = find_char_boundary(text, target_pos.min(text.len()));

        // If line-aware, look back up to 10% for a newline
        if self.line_aware && pos > 0 && pos < text.len() {
            let search_start = pos.saturating_sub(chunk_size / 10);
            if let Some(newline_offset) = text[search_start..pos].rfind('\n') {
                let newline_pos = search_start + newline_offset + 1;
                if newline_pos > search_start {
                    return newline_pos;
                }
            }
        }

        pos
    }
}

impl Chunker for FixedChunker {
    fn chunk(&self, text: &str, params: &ChunkParams) -> Result<Vec<ChunkPiece>> {
        self.validate(params)?;

        if text.is_empty() {
            return Ok(vec![]);
        }
        if text.len() <= params.chunk_size {
            return Ok(vec![ChunkPiece::new(
                text.to_string(),
                0..text.len(),
                BoundaryKind::Character,
            )]);
        }

        let mut pieces = Vec::new();
        let mut start = 0;

        while start < text.len() {
            let target_end = (start + params.chunk_size).min(text.len());
            let end = if target_end >= text.len() {
                text.len()
            } else {
                self.find_boundary(text, target_end, params.chunk_size)
            };
            // Ensure we make progress
            let end = if end <= start {
                find_char_boundary(text, (start + params.chunk_size).min(text.len()))
            } else {
                end
            };
            let end = if end <= start { text.len() } else { end };

            pieces.push(ChunkPiece::new(
                text[start..end].to_string(),
                start..end,
                BoundaryKind::Character,
            ));

            if end >= text.len() {
                break;
            }

            start = if params.chunk_overlap > 0 {
                let overlap_start =
                    find_char_boundary(text, end.saturating_sub(params.chunk_overlap));
                if overlap_start <= start { end } else { overlap_start }
            } else {
                end
            };
        }

        Ok(pieces)
    }

    fn name(&self) -> &'static str {
        "fixed_size"
    }

    fn description(&self) -> &'static str {
        "Fixed-size character windows with optional line alignment"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_chunker_empty_text() {
        let pieces = FixedChunker::new()
            .chunk("", &ChunkParams::with_size(100))
            .unwrap();
        assert!(pieces.is_empty());
    }

    #[test]
    fn test_fixed_chunker_small_text() {
        let pieces = FixedChunker::new()
            .chunk("hello", &ChunkParams::with_size(100))
            .unwrap();
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].text, "hello");
        assert_eq!(pieces[0].byte_range, 0..5);
    }

    #[test]
    fn test_fixed_chunker_splits_to_size() {
        let text = "abcdefghij".repeat(10);
        let pieces = FixedChunker::new()
            .line_aware(false)
            .chunk(&text, &ChunkParams::with_size(25))
            .unwrap();
        assert!(pieces.len() >= 4);
        for piece in &pieces {
            assert!(piece.size() <= 25);
        }
        // Coverage without overlap
        let total: usize = pieces.iter().map(ChunkPiece::size).sum();
        assert_eq!(total, text.len());
    }

    #[test]
    fn test_fixed_chunker_line_aware() {
        // Lines slightly shorter than the chunk size, so the look-back
        // window (10% of chunk size) always contains the newline
        let line = format!("{}\n", "a".repeat(96));
        let text = line.repeat(4);
        let pieces = FixedChunker::new()
            .chunk(&text, &ChunkParams::with_size(100))
            .unwrap();
        assert!(pieces.len() >= 3);
        // Non-final pieces end after a newline
        for piece in &pieces[..pieces.len() - 1] {
            assert!(piece.text.ends_with('\n'), "piece {:?}", piece.text);
        }
    }

    #[test]
    fn test_fixed_chunker_with_overlap() {
        let text = "x".repeat(100);
        let pieces = FixedChunker::new()
            .line_aware(false)
            .chunk(&text, &ChunkParams::with_size_and_overlap(40, 10))
            .unwrap();
        assert!(pieces.len() > 2);
        for pair in pieces.windows(2) {
            assert!(pair[1].byte_range.start < pair[0].byte_range.end);
        }
    }

    #[test]
    fn test_fixed_chunker_utf8_safety() {
        let text = "世界".repeat(50);
        let pieces = FixedChunker::new()
            .line_aware(false)
            .chunk(&text, &ChunkParams::with_size(25))
            .unwrap();
        for piece in &pieces {
            assert_eq!(&text[piece.byte_range.clone()], piece.text);
        }
    }

    #[test]
    fn test_fixed_chunker_invalid_params() {
        assert!(
            FixedChunker::new()
                .chunk("text", &ChunkParams::with_size(0))
                .is_err()
        );
        assert!(
            FixedChunker::new()
                .chunk("text", &ChunkParams::with_size_and_overlap(10, 10))
                .is_err()
        );
    }

    #[test]
    fn test_fixed_chunker_name() {
        assert_eq!(FixedChunker::new().name(), "fixed_size");
    }
}
