//! Chunking strategies for document ingestion.
//!
//! This module provides a trait-based family of chunkers sharing one
//! boundary-priority model:
//!
//! - **Fixed**: character windows with optional line alignment
//! - **Semantic**: sentence/paragraph aware splitting (also covers the
//!   `sentence` and `paragraph` strategies)
//! - **Markdown**: recursive structural splitting that carries ancestor
//!   headings (also covers `hierarchical` and `table_aware`)
//! - **Code**: splitting at top-level declaration boundaries
//!
//! All chunkers are pure and deterministic over `(text, params)`.

pub mod code;
pub mod fixed;
pub mod markdown;
pub mod semantic;
pub mod traits;

pub use code::CodeChunker;
pub use fixed::FixedChunker;
pub use markdown::MarkdownChunker;
pub use semantic::SemanticChunker;
pub use traits::{ChunkParams, ChunkPiece, Chunker};

use std::ops::Range;
use unicode_segmentation::UnicodeSegmentation;

use crate::core::{ChunkingKind, Language};
use crate::error::ChunkingError;

/// Default chunk size in characters (~250 tokens at 4 chars/token).
pub const DEFAULT_CHUNK_SIZE: usize = 1_000;

/// Default overlap size in characters (for context continuity).
pub const DEFAULT_OVERLAP: usize = 100;

/// Maximum allowed chunk size (50k chars, ~12.5k tokens).
pub const MAX_CHUNK_SIZE: usize = 50_000;

/// Chinese sentence-ending punctuation.
const CHINESE_SENTENCE_ENDERS: &[char] = &['。', '！', '？', '；', '…'];

/// Closing quotes absorbed into the preceding Chinese sentence.
const CHINESE_CLOSING_QUOTES: &[char] = &['」', '』', '”', '’', '"'];

/// Creates the chunker for a strategy.
#[must_use]
pub fn create_chunker(kind: ChunkingKind) -> Box<dyn Chunker> {
    match kind {
        ChunkingKind::FixedSize => Box::new(FixedChunker::new()),
        ChunkingKind::Sentence => Box::new(SemanticChunker::sentences()),
        ChunkingKind::Paragraph => Box::new(SemanticChunker::paragraphs()),
        ChunkingKind::Semantic => Box::new(SemanticChunker::new()),
        ChunkingKind::Hierarchical | ChunkingKind::RecursiveMarkdown => {
            Box::new(MarkdownChunker::new())
        }
        ChunkingKind::TableAware => Box::new(MarkdownChunker::table_aware()),
        ChunkingKind::CodeAware => Box::new(CodeChunker::new()),
    }
}

/// Creates a chunker by strategy name.
///
/// # Errors
///
/// Returns [`ChunkingError::UnknownStrategy`] for unrecognized names.
pub fn create_chunker_by_name(name: &str) -> crate::error::Result<Box<dyn Chunker>> {
    ChunkingKind::parse(name).map_or_else(
        || {
            Err(ChunkingError::UnknownStrategy {
                name: name.to_string(),
            }
            .into())
        },
        |kind| Ok(create_chunker(kind)),
    )
}

/// Lists available chunking strategy names.
#[must_use]
pub fn available_strategies() -> Vec<&'static str> {
    vec![
        "fixed_size",
        "sentence",
        "paragraph",
        "semantic",
        "hierarchical",
        "recursive_markdown",
        "code_aware",
        "table_aware",
    ]
}

/// Finds a valid UTF-8 character boundary at or before the position.
#[must_use]
pub(crate) fn find_char_boundary(s: &str, pos: usize) -> usize {
    if pos >= s.len() {
        return s.len();
    }
    let mut boundary = pos;
    while !s.is_char_boundary(boundary) && boundary > 0 {
        boundary -= 1;
    }
    boundary
}

/// Splits text into sentence byte ranges for the given language.
///
/// Ranges tile the input: the end of one range is the start of the
/// next, and the last range ends at `text.len()`.
#[must_use]
pub fn split_sentences(text: &str, language: Language) -> Vec<Range<usize>> {
    match language {
        Language::English => text
            .split_sentence_bound_indices()
            .map(|(start, s)| start..start + s.len())
            .collect(),
        Language::Chinese => split_sentences_chinese(text),
    }
}

/// Chinese sentence splitting on `。！？；…` with quotation pairing.
fn split_sentences_chinese(text: &str) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        let mut end = None;
        if CHINESE_SENTENCE_ENDERS.contains(&c) {
            let mut candidate = idx + c.len_utf8();
            // Absorb closing quotes so「…。」stays one sentence
            while let Some(&(next_idx, next_c)) = chars.peek() {
                if CHINESE_CLOSING_QUOTES.contains(&next_c) {
                    candidate = next_idx + next_c.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            end = Some(candidate);
        } else if c == '\n' {
            end = Some(idx + 1);
        }

        if let Some(end) = end
            && end > start
        {
            ranges.push(start..end);
            start = end;
        }
    }

    if start < text.len() {
        ranges.push(start..text.len());
    }
    ranges
}

/// Splits text into coarse segment ranges no larger than `segment_size`.
///
/// Segments break at sentence boundaries (paragraph boundaries when
/// `structured`), falling back to character boundaries for single
/// sentences larger than the budget. Used by the parallel executor.
#[must_use]
pub fn split_segments(
    text: &str,
    segment_size: usize,
    language: Language,
    structured: bool,
) -> Vec<Range<usize>> {
    if text.is_empty() || segment_size == 0 {
        return Vec::new();
    }
    if text.len() <= segment_size {
        return vec![0..text.len()];
    }

    let units: Vec<Range<usize>> = if structured {
        split_paragraph_ranges(text)
    } else {
        split_sentences(text, language)
    };

    let mut segments = Vec::new();
    let mut seg_start = 0;
    let mut seg_end = 0;

    for unit in units {
        let unit_len = unit.end - unit.start;
        if seg_end > seg_start && seg_end - seg_start + unit_len > segment_size {
            segments.push(seg_start..seg_end);
            seg_start = seg_end;
        }
        if unit_len > segment_size {
            // Oversized unit: hard-split at character boundaries
            let mut pos = unit.start;
            if seg_end > seg_start {
                segments.push(seg_start..seg_end);
            }
            while pos < unit.end {
                let next = find_char_boundary(text, (pos + segment_size).min(unit.end));
                let next = if next <= pos { unit.end } else { next };
                segments.push(pos..next);
                pos = next;
            }
            seg_start = unit.end;
            seg_end = unit.end;
        } else {
            seg_end = unit.end;
        }
    }

    if seg_end > seg_start {
        segments.push(seg_start..seg_end);
    }
    segments
}

/// Splits text into paragraph ranges on blank lines.
pub(crate) fn split_paragraph_ranges(text: &str) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();
    let mut i = 0;

    while i + 1 < bytes.len() {
        if bytes[i] == b'\n' && bytes[i + 1] == b'\n' {
            let mut end = i + 2;
            // Consume any further blank lines into the same break
            while end < bytes.len() && bytes[end] == b'\n' {
                end += 1;
            }
            ranges.push(start..end);
            start = end;
            i = end;
        } else {
            i += 1;
        }
    }

    if start < text.len() {
        ranges.push(start..text.len());
    }
    ranges
}
