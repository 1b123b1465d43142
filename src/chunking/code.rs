//! Code-aware chunking strategy.
//!
//! Splits source code at top-level declaration boundaries (functions,
//! classes, impl blocks) detected with language-agnostic patterns, and
//! packs whole declarations up to the chunk size. A single declaration
//! larger than the chunk size is emitted whole with `oversized` set so
//! code is never cut mid-body.

use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;

use crate::chunking::traits::{ChunkParams, ChunkPiece, Chunker};
use crate::core::BoundaryKind;
use crate::error::Result;

/// Top-level declaration openers across common languages.
fn decl_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?x)^(
                (pub(\([^)]*\))?\s+)?(async\s+)?(unsafe\s+)?fn\s+\w+   # Rust
              | (pub\s+)?(struct|enum|trait|impl|mod)\s+               # Rust items
              | (async\s+)?def\s+\w+                                   # Python
              | class\s+\w+                                            # Python/Java/C++
              | (export\s+)?(async\s+)?function\s*\w*                  # JavaScript
              | (public|private|protected|static)\s+                   # Java/C\#
              | func\s+\w*                                             # Go
              | namespace\s+\w+                                        # C++
            )",
        )
        .expect("valid regex")
    })
}

/// A top-level code block.
#[derive(Debug, Clone)]
struct CodeBlock {
    range: Range<usize>,
}

/// Code chunker that respects declaration boundaries.
///
/// # Examples
///
/// ```
/// use docpipe::chunking::{ChunkParams, Chunker, CodeChunker};
///
/// let code = "fn one() {\n    body();\n}\n\nfn two() {\n    body();\n}\n";
/// let pieces = CodeChunker::new()
///     .chunk(code, &ChunkParams::with_size(30))
///     .unwrap();
/// assert_eq!(pieces.len(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct CodeChunker {
    _private: (),
}

impl CodeChunker {
    /// Creates a new code chunker.
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }

    /// Splits code into top-level blocks.
    ///
    /// A new block starts at a non-indented line that either opens a
    /// declaration or follows a blank line.
    fn split_blocks(text: &str) -> Vec<CodeBlock> {
        let mut blocks = Vec::new();
        let mut start = 0;
        let mut offset = 0;
        let mut prev_blank = false;

        for line in text.split_inclusive('\n') {
            let content = line.trim_end_matches('\n');
            let is_blank = content.trim().is_empty();
            let top_level = !content.starts_with(' ') && !content.starts_with('\t');

            let opens_block = !is_blank
                && top_level
                && offset > start
                && (prev_blank || decl_re().is_match(content));

            if opens_block {
                blocks.push(CodeBlock {
                    range: start..offset,
                });
                start = offset;
            }

            prev_blank = is_blank;
            offset += line.len();
        }

        if offset > start {
            blocks.push(CodeBlock {
                range: start..offset,
            });
        }
        blocks
    }
}

impl Chunker for CodeChunker {
    fn chunk(&self, text: &str, params: &ChunkParams) -> Result<Vec<ChunkPiece>> {
        self.validate(params)?;

        if text.is_empty() {
            return Ok(vec![]);
        }
        if text.len() <= params.chunk_size {
            return Ok(vec![ChunkPiece::new(
                text.to_string(),
                0..text.len(),
                BoundaryKind::CodeBlock,
            )]);
        }

        let blocks = Self::split_blocks(text);
        let mut pieces: Vec<ChunkPiece> = Vec::new();
        let mut start: Option<usize> = None;
        let mut end = 0;

        let flush = |start: &mut Option<usize>, end: usize, pieces: &mut Vec<ChunkPiece>| {
            if let Some(s) = start.take()
                && end > s
            {
                pieces.push(ChunkPiece::new(
                    text[s..end].to_string(),
                    s..end,
                    BoundaryKind::CodeBlock,
                ));
            }
        };

        for block in &blocks {
            let len = block.range.end - block.range.start;

            if len > params.chunk_size {
                // Indivisible declaration: emit whole, flagged
                flush(&mut start, end, &mut pieces);
                let mut piece = ChunkPiece::new(
                    text[block.range.clone()].to_string(),
                    block.range.clone(),
                    BoundaryKind::CodeBlock,
                );
                piece.oversized = true;
                pieces.push(piece);
                continue;
            }

            match start {
                Some(s) if end - s + len > params.chunk_size => {
                    flush(&mut start, end, &mut pieces);
                    start = Some(block.range.start);
                }
                None => start = Some(block.range.start),
                Some(_) => {}
            }
            end = block.range.end;
        }
        flush(&mut start, end, &mut pieces);

        Ok(pieces)
    }

    fn name(&self) -> &'static str {
        "code_aware"
    }

    fn description(&self) -> &'static str {
        "Code chunking at top-level declaration boundaries"
    }
}
