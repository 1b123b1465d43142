//! Semantic chunking strategy.
//!
//! Splits text at sentence and paragraph boundaries, packing units
//! greedily up to the chunk size. Language-aware sentence segmentation
//! uses `unicode-segmentation` for English and the `。！？；…`
//! punctuation set with quotation pairing for Chinese. When structure
//! is respected, fenced code blocks are atomic units that are never
//! split.

use std::ops::Range;

use crate::chunking::traits::{ChunkParams, ChunkPiece, Chunker};
use crate::chunking::{find_char_boundary, split_paragraph_ranges, split_sentences};
use crate::core::BoundaryKind;
use crate::error::Result;

/// Unit granularity for the semantic chunker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Sentences only.
    Sentence,
    /// Paragraphs only.
    Paragraph,
    /// Paragraphs, decomposing oversized ones into sentences.
    Blended,
}

/// A splittable unit of text.
#[derive(Debug, Clone)]
struct Unit {
    range: Range<usize>,
    boundary: BoundaryKind,
    atomic: bool,
}

impl Unit {
    const fn len(&self) -> usize {
        self.range.end - self.range.start
    }
}

/// Sentence/paragraph aware chunker.
///
/// # Examples
///
/// ```
/// use docpipe::chunking::{ChunkParams, Chunker, SemanticChunker};
///
/// let chunker = SemanticChunker::new();
/// let text = "First sentence. Second sentence.\n\nAnother paragraph.";
/// let pieces = chunker.chunk(text, &ChunkParams::with_size(40)).unwrap();
/// assert!(!pieces.is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct SemanticChunker {
    mode: Mode,
}

impl Default for SemanticChunker {
    fn default() -> Self {
        Self::new()
    }
}

impl SemanticChunker {
    /// Creates the blended chunker (paragraphs, sentences inside
    /// oversized paragraphs).
    #[must_use]
    pub const fn new() -> Self {
        Self {
            mode: Mode::Blended,
        }
    }

    /// Creates a sentence-boundary chunker.
    #[must_use]
    pub const fn sentences() -> Self {
        Self {
            mode: Mode::Sentence,
        }
    }

    /// Creates a paragraph-boundary chunker.
    #[must_use]
    pub const fn paragraphs() -> Self {
        Self {
            mode: Mode::Paragraph,
        }
    }

    /// Splits a text region (no fences inside) into units.
    fn region_units(&self, text: &str, region: Range<usize>, params: &ChunkParams) -> Vec<Unit> {
        let slice = &text[region.clone()];
        let mut units = Vec::new();

        match self.mode {
            Mode::Sentence => {
                for r in split_sentences(slice, params.language) {
                    units.push(Unit {
                        range: region.start + r.start..region.start + r.end,
                        boundary: BoundaryKind::Sentence,
                        atomic: false,
                    });
                }
            }
            Mode::Paragraph => {
                for r in split_paragraph_ranges(slice) {
                    units.push(Unit {
                        range: region.start + r.start..region.start + r.end,
                        boundary: BoundaryKind::Paragraph,
                        atomic: false,
                    });
                }
            }
            Mode::Blended => {
                for para in split_paragraph_ranges(slice) {
                    if para.end - para.start > params.chunk_size {
                        let para_slice = &slice[para.clone()];
                        for r in split_sentences(para_slice, params.language) {
                            units.push(Unit {
                                range: region.start + para.start + r.start
                                    ..region.start + para.start + r.end,
                                boundary: BoundaryKind::Sentence,
                                atomic: false,
                            });
                        }
                    } else {
                        units.push(Unit {
                            range: region.start + para.start..region.start + para.end,
                            boundary: BoundaryKind::Paragraph,
                            atomic: false,
                        });
                    }
                }
            }
        }

        units
    }

    /// Splits the text into units, treating fenced code as atomic when
    /// structure is respected.
    fn units(&self, text: &str, params: &ChunkParams) -> Vec<Unit> {
        if !params.respect_structure {
            return self.region_units(text, 0..text.len(), params);
        }

        let mut units = Vec::new();
        let mut region_start = 0;
        let mut fence_start: Option<usize> = None;
        let mut offset = 0;

        for line in text.split_inclusive('\n') {
            let trimmed = line.trim_start();
            let is_fence = trimmed.starts_with("```") || trimmed.starts_with("~~~");
            if is_fence {
                if let Some(start) = fence_start {
                    // Closing fence: emit the whole block as one atomic unit
                    units.push(Unit {
                        range: start..offset + line.len(),
                        boundary: BoundaryKind::CodeBlock,
                        atomic: true,
                    });
                    region_start = offset + line.len();
                    fence_start = None;
                } else {
                    if offset > region_start {
                        units.extend(self.region_units(text, region_start..offset, params));
                    }
                    fence_start = Some(offset);
                }
            }
            offset += line.len();
        }

        // Unclosed fence runs to the end of the text
        if let Some(start) = fence_start {
            units.push(Unit {
                range: start..text.len(),
                boundary: BoundaryKind::CodeBlock,
                atomic: true,
            });
        } else if region_start < text.len() {
            units.extend(self.region_units(text, region_start..text.len(), params));
        }

        units
    }
}

impl Chunker for SemanticChunker {
    fn chunk(&self, text: &str, params: &ChunkParams) -> Result<Vec<ChunkPiece>> {
        self.validate(params)?;

        if text.is_empty() {
            return Ok(vec![]);
        }
        if text.len() <= params.chunk_size {
            return Ok(vec![ChunkPiece::new(
                text.to_string(),
                0..text.len(),
                BoundaryKind::SectionBreak,
            )]);
        }

        let units = self.units(text, params);
        Ok(pack_units(text, &units, params))
    }

    fn name(&self) -> &'static str {
        match self.mode {
            Mode::Sentence => "sentence",
            Mode::Paragraph => "paragraph",
            Mode::Blended => "semantic",
        }
    }

    fn description(&self) -> &'static str {
        "Sentence and paragraph aware chunking with boundary priorities"
    }
}

/// Packs units into pieces no larger than `chunk_size`, emitting
/// oversized atomic units whole and hard-splitting oversized plain
/// units at character boundaries.
fn pack_units(text: &str, units: &[Unit], params: &ChunkParams) -> Vec<ChunkPiece> {
    let mut pieces: Vec<ChunkPiece> = Vec::new();
    let mut i = 0;

    while i < units.len() {
        let unit = &units[i];

        if unit.len() > params.chunk_size {
            if unit.atomic {
                let mut piece = ChunkPiece::new(
                    text[unit.range.clone()].to_string(),
                    unit.range.clone(),
                    unit.boundary,
                );
                piece.oversized = true;
                pieces.push(piece);
            } else {
                hard_split(text, &unit.range, params.chunk_size, &mut pieces);
            }
            i += 1;
            continue;
        }

        // Greedy pack from unit i
        let start_idx = i;
        let mut end_idx = i;
        let mut size = 0;
        while end_idx < units.len() {
            let len = units[end_idx].len();
            if len > params.chunk_size {
                break;
            }
            if size > 0 && size + len > params.chunk_size {
                break;
            }
            size += len;
            end_idx += 1;
        }

        let range = units[start_idx].range.start..units[end_idx - 1].range.end;
        pieces.push(ChunkPiece::new(
            text[range.clone()].to_string(),
            range,
            units[end_idx - 1].boundary,
        ));

        if end_idx >= units.len() {
            break;
        }

        // Overlap: restart from the trailing units of this chunk that
        // fit within chunk_overlap
        i = if params.chunk_overlap > 0 {
            let mut k = end_idx;
            let mut overlap = 0;
            while k > start_idx + 1 {
                let len = units[k - 1].len();
                if overlap + len > params.chunk_overlap {
                    break;
                }
                overlap += len;
                k -= 1;
            }
            if k < end_idx { k } else { end_idx }
        } else {
            end_idx
        };
    }

    pieces
}

/// Hard-splits an oversized non-atomic range at character boundaries.
fn hard_split(text: &str, range: &Range<usize>, chunk_size: usize, pieces: &mut Vec<ChunkPiece>) {
    let mut pos = range.start;
    while pos < range.end {
        let next = find_char_boundary(text, (pos + chunk_size).min(range.end));
        let next = if next <= pos { range.end } else { next };
        pieces.push(ChunkPiece::new(
            text[pos..next].to_string(),
            pos..next,
            BoundaryKind::Character,
        ));
        pos = next;
    }
}
