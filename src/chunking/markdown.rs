//! Recursive markdown chunking strategy.
//!
//! Scans CommonMark-style structure line by line (ATX headings, fenced
//! code, pipe tables, block quotes, lists, horizontal rules) and emits
//! one chunk per content block, carrying the ancestor heading lines as
//! context and recording them in `heading_path`. Fenced code blocks are
//! atomic; tables split between rows only; oversized paragraphs fall
//! back to sentence packing. When a block is split into several pieces,
//! adjacent pieces overlap by up to `chunk_overlap`, restarting at the
//! trailing sentences or lines of the previous piece; block boundaries
//! reset the overlap, with the carried heading context providing
//! continuity across them.

use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;

use crate::chunking::traits::{ChunkParams, ChunkPiece, Chunker};
use crate::chunking::{find_char_boundary, split_sentences};
use crate::core::BoundaryKind;
use crate::error::Result;

fn heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(#{1,6})\s+(.*?)\s*#*\s*$").expect("valid regex"))
}

fn rule_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(-{3,}|\*{3,}|_{3,})\s*$").expect("valid regex"))
}

fn ordered_item_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+[.)]\s").expect("valid regex"))
}

/// Structural block kinds recognized by the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Heading(usize),
    Code,
    Table,
    Rule,
    Quote,
    List,
    Paragraph,
}

#[derive(Debug, Clone)]
struct Block {
    kind: BlockKind,
    range: Range<usize>,
}

/// Markdown-aware chunker that carries ancestor headings.
///
/// # Examples
///
/// ```
/// use docpipe::chunking::{ChunkParams, Chunker, MarkdownChunker};
///
/// let text = "# Title\n\npara one.\n\npara two.";
/// let pieces = MarkdownChunker::new()
///     .chunk(text, &ChunkParams::with_size(40))
///     .unwrap();
/// assert_eq!(pieces.len(), 2);
/// assert_eq!(pieces[0].text, "# Title\n\npara one.");
/// assert_eq!(pieces[1].text, "# Title\n\npara two.");
/// ```
#[derive(Debug, Clone, Default)]
pub struct MarkdownChunker {
    _private: (),
}

impl MarkdownChunker {
    /// Creates a new markdown chunker.
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }

    /// Creates the table-aware variant.
    ///
    /// Tables are row-safe in every markdown chunker; this constructor
    /// exists so tabular documents read naturally at call sites.
    #[must_use]
    pub const fn table_aware() -> Self {
        Self::new()
    }

    /// Scans the text into structural blocks.
    #[allow(clippy::too_many_lines)]
    fn scan_blocks(text: &str) -> Vec<Block> {
        let mut blocks = Vec::new();
        let mut offset = 0;

        // Current open run of same-kind lines (table/quote/list/paragraph)
        let mut run: Option<(BlockKind, usize)> = None;
        // Open fence: (start offset, marker)
        let mut fence: Option<(usize, &str)> = None;

        let close_run = |run: &mut Option<(BlockKind, usize)>, end: usize, out: &mut Vec<Block>| {
            if let Some((kind, start)) = run.take()
                && end > start
            {
                out.push(Block {
                    kind,
                    range: start..end,
                });
            }
        };

        for line in text.split_inclusive('\n') {
            let line_end = offset + line.len();
            let trimmed = line.trim_end_matches('\n').trim_start();

            if let Some((start, marker)) = fence {
                if trimmed.starts_with(marker) {
                    blocks.push(Block {
                        kind: BlockKind::Code,
                        range: start..line_end,
                    });
                    fence = None;
                }
                offset = line_end;
                continue;
            }

            if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
                close_run(&mut run, offset, &mut blocks);
                let marker = if trimmed.starts_with("```") { "```" } else { "~~~" };
                fence = Some((offset, marker));
                offset = line_end;
                continue;
            }

            if trimmed.is_empty() {
                close_run(&mut run, offset, &mut blocks);
                offset = line_end;
                continue;
            }

            if heading_re().is_match(trimmed) {
                close_run(&mut run, offset, &mut blocks);
                let level = trimmed.chars().take_while(|&c| c == '#').count();
                blocks.push(Block {
                    kind: BlockKind::Heading(level),
                    range: offset..line_end,
                });
                offset = line_end;
                continue;
            }

            if rule_re().is_match(trimmed) {
                close_run(&mut run, offset, &mut blocks);
                blocks.push(Block {
                    kind: BlockKind::Rule,
                    range: offset..line_end,
                });
                offset = line_end;
                continue;
            }

            let line_kind = if trimmed.starts_with('|') {
                BlockKind::Table
            } else if trimmed.starts_with('>') {
                BlockKind::Quote
            } else if trimmed.starts_with("- ")
                || trimmed.starts_with("* ")
                || trimmed.starts_with("+ ")
                || ordered_item_re().is_match(trimmed)
            {
                BlockKind::List
            } else {
                BlockKind::Paragraph
            };

            match run {
                Some((kind, _)) if kind == line_kind => {}
                Some(_) => {
                    close_run(&mut run, offset, &mut blocks);
                    run = Some((line_kind, offset));
                }
                None => run = Some((line_kind, offset)),
            }

            offset = line_end;
        }

        if let Some((start, _)) = fence {
            blocks.push(Block {
                kind: BlockKind::Code,
                range: start..text.len(),
            });
        }
        close_run(&mut run, text.len(), &mut blocks);

        blocks
    }
}

/// Heading context carried into each emitted piece.
struct HeadingStack {
    /// (level, display text, raw line without trailing newline)
    entries: Vec<(usize, String, String)>,
}

impl HeadingStack {
    const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    fn push(&mut self, level: usize, raw_line: &str) {
        while self
            .entries
            .last()
            .is_some_and(|(l, _, _)| *l >= level)
        {
            self.entries.pop();
        }
        let raw = raw_line.trim_end_matches('\n').to_string();
        let text = heading_re()
            .captures(raw.trim_start())
            .and_then(|c| c.get(2))
            .map_or_else(String::new, |m| m.as_str().to_string());
        self.entries.push((level, text, raw));
    }

    /// Raw heading lines joined for chunk context, with trailing blank line.
    fn prefix(&self) -> String {
        if self.entries.is_empty() {
            return String::new();
        }
        let mut prefix = String::new();
        for (_, _, raw) in &self.entries {
            prefix.push_str(raw);
            prefix.push_str("\n\n");
        }
        prefix
    }

    fn path(&self) -> Vec<String> {
        self.entries.iter().map(|(_, t, _)| t.clone()).collect()
    }
}

impl Chunker for MarkdownChunker {
    #[allow(clippy::too_many_lines)]
    fn chunk(&self, text: &str, params: &ChunkParams) -> Result<Vec<ChunkPiece>> {
        self.validate(params)?;

        if text.is_empty() {
            return Ok(vec![]);
        }

        let blocks = Self::scan_blocks(text);
        let mut headings = HeadingStack::new();
        let mut pieces = Vec::new();

        for block in &blocks {
            match block.kind {
                BlockKind::Heading(level) => {
                    headings.push(level, &text[block.range.clone()]);
                }
                BlockKind::Rule => {
                    // Section separator, no content of its own
                }
                BlockKind::Code => {
                    let prefix = headings.prefix();
                    let body = text[block.range.clone()].trim_end_matches('\n');
                    let mut piece = ChunkPiece::new(
                        format!("{prefix}{body}"),
                        block.range.clone(),
                        BoundaryKind::CodeBlock,
                    );
                    piece.heading_path = headings.path();
                    piece.oversized = piece.text.len() > params.chunk_size;
                    pieces.push(piece);
                }
                BlockKind::Table => {
                    emit_line_packed(
                        text,
                        block,
                        &headings,
                        params,
                        BoundaryKind::Table,
                        &mut pieces,
                    );
                }
                BlockKind::Quote => {
                    emit_line_packed(
                        text,
                        block,
                        &headings,
                        params,
                        BoundaryKind::Quote,
                        &mut pieces,
                    );
                }
                BlockKind::List => {
                    emit_line_packed(
                        text,
                        block,
                        &headings,
                        params,
                        BoundaryKind::ListItem,
                        &mut pieces,
                    );
                }
                BlockKind::Paragraph => {
                    emit_paragraph(text, block, &headings, params, &mut pieces);
                }
            }
        }

        Ok(pieces)
    }

    fn name(&self) -> &'static str {
        "recursive_markdown"
    }

    fn description(&self) -> &'static str {
        "Recursive markdown chunking that carries ancestor headings"
    }
}

/// Emits a piece with heading context.
fn emit_piece(
    body: &str,
    range: Range<usize>,
    headings: &HeadingStack,
    boundary: BoundaryKind,
    pieces: &mut Vec<ChunkPiece>,
) {
    let prefix = headings.prefix();
    let body = body.trim_end_matches('\n');
    if body.is_empty() {
        return;
    }
    let mut piece = ChunkPiece::new(format!("{prefix}{body}"), range, boundary);
    piece.heading_path = headings.path();
    pieces.push(piece);
}

/// One packed run of contiguous units (unit indices, end exclusive).
struct Packed {
    start: usize,
    end: usize,
    oversized: bool,
}

/// Greedily packs contiguous unit ranges into groups no larger than
/// `budget`. A single unit over the budget forms its own group with
/// `oversized` set. When `overlap > 0`, each group restarts at the
/// trailing units of the previous one that fit within the overlap.
fn pack_with_overlap(units: &[Range<usize>], budget: usize, overlap: usize) -> Vec<Packed> {
    let mut groups = Vec::new();
    let mut i = 0;

    while i < units.len() {
        if units[i].end - units[i].start > budget {
            groups.push(Packed {
                start: i,
                end: i + 1,
                oversized: true,
            });
            i += 1;
            continue;
        }

        let start_idx = i;
        let mut end_idx = i;
        let mut size = 0;
        while end_idx < units.len() {
            let len = units[end_idx].end - units[end_idx].start;
            if len > budget || (size > 0 && size + len > budget) {
                break;
            }
            size += len;
            end_idx += 1;
        }
        groups.push(Packed {
            start: start_idx,
            end: end_idx,
            oversized: false,
        });

        if end_idx >= units.len() {
            break;
        }

        // Restart at the trailing units that fit within the overlap
        i = if overlap > 0 {
            let mut k = end_idx;
            let mut carried = 0;
            while k > start_idx + 1 {
                let len = units[k - 1].end - units[k - 1].start;
                if carried + len > overlap {
                    break;
                }
                carried += len;
                k -= 1;
            }
            if k < end_idx { k } else { end_idx }
        } else {
            end_idx
        };
    }

    groups
}

/// Emits a paragraph block, falling back to sentence packing when the
/// paragraph plus heading context exceeds the chunk size. Adjacent
/// sentence-packed pieces overlap by up to `chunk_overlap`; a single
/// sentence over the budget is split at character boundaries.
fn emit_paragraph(
    text: &str,
    block: &Block,
    headings: &HeadingStack,
    params: &ChunkParams,
    pieces: &mut Vec<ChunkPiece>,
) {
    let prefix_len = headings.prefix().len();
    let body = &text[block.range.clone()];

    if prefix_len + body.trim_end_matches('\n').len() <= params.chunk_size {
        emit_piece(
            body,
            block.range.clone(),
            headings,
            BoundaryKind::Paragraph,
            pieces,
        );
        return;
    }

    let budget = params.chunk_size.saturating_sub(prefix_len).max(1);
    let overlap = params.chunk_overlap.min(budget.saturating_sub(1));
    let sentences = split_sentences(body, params.language);

    for group in pack_with_overlap(&sentences, budget, overlap) {
        let range = sentences[group.start].start..sentences[group.end - 1].end;
        if group.oversized {
            let mut pos = range.start;
            while pos < range.end {
                let next = find_char_boundary(body, (pos + budget).min(range.end));
                let next = if next <= pos { range.end } else { next };
                emit_piece(
                    &body[pos..next],
                    block.range.start + pos..block.range.start + next,
                    headings,
                    BoundaryKind::Character,
                    pieces,
                );
                pos = next;
            }
        } else {
            emit_piece(
                &body[range.clone()],
                block.range.start + range.start..block.range.start + range.end,
                headings,
                BoundaryKind::Sentence,
                pieces,
            );
        }
    }
}

/// Emits a line-run block (table/quote/list), packing whole lines and
/// never splitting inside one. Adjacent pieces overlap by up to
/// `chunk_overlap` in whole lines; a single line larger than the
/// budget is emitted alone with `oversized` set.
fn emit_line_packed(
    text: &str,
    block: &Block,
    headings: &HeadingStack,
    params: &ChunkParams,
    boundary: BoundaryKind,
    pieces: &mut Vec<ChunkPiece>,
) {
    let prefix_len = headings.prefix().len();
    let budget = params.chunk_size.saturating_sub(prefix_len).max(1);
    let overlap = params.chunk_overlap.min(budget.saturating_sub(1));
    let body = &text[block.range.clone()];

    let mut lines: Vec<Range<usize>> = Vec::new();
    let mut offset = 0;
    for line in body.split_inclusive('\n') {
        lines.push(offset..offset + line.len());
        offset += line.len();
    }

    for group in pack_with_overlap(&lines, budget, overlap) {
        let range = lines[group.start].start..lines[group.end - 1].end;
        let absolute = block.range.start + range.start..block.range.start + range.end;
        if group.oversized {
            let prefix = headings.prefix();
            let mut piece = ChunkPiece::new(
                format!("{prefix}{}", body[range].trim_end_matches('\n')),
                absolute,
                boundary,
            );
            piece.heading_path = headings.path();
            piece.oversized = true;
            pieces.push(piece);
        } else {
            emit_piece(&body[range], absolute, headings, boundary, pieces);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heading_carried_into_paragraphs() {
        let text = "# Title\n\npara one.\n\npara two.";
        let pieces = MarkdownChunker::new()
            .chunk(text, &ChunkParams::with_size(40))
            .unwrap();

        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0].text, "# Title\n\npara one.");
        assert_eq!(pieces[1].text, "# Title\n\npara two.");
        assert_eq!(pieces[0].heading_path, vec!["Title".to_string()]);
        assert_eq!(pieces[0].boundary, BoundaryKind::Paragraph);
    }

    #[test]
    fn test_nested_heading_path() {
        let text = "# A\n\n## B\n\ncontent here.\n\n## C\n\nother content.";
        let pieces = MarkdownChunker::new()
            .chunk(text, &ChunkParams::with_size(100))
            .unwrap();

        assert_eq!(pieces.len(), 2);
        assert_eq!(
            pieces[0].heading_path,
            vec!["A".to_string(), "B".to_string()]
        );
        assert!(pieces[0].text.starts_with("# A\n\n## B\n\n"));
        // Sibling heading replaces the previous one at its level
        assert_eq!(
            pieces[1].heading_path,
            vec!["A".to_string(), "C".to_string()]
        );
    }

    #[test]
    fn test_oversized_code_block_never_split() {
        let body = "x".repeat(2000);
        let text = format!("```\n{body}\n```");
        let pieces = MarkdownChunker::new()
            .chunk(&text, &ChunkParams::with_size(500))
            .unwrap();

        assert_eq!(pieces.len(), 1);
        assert!(pieces[0].oversized);
        assert_eq!(pieces[0].boundary, BoundaryKind::CodeBlock);
        assert!(pieces[0].text.contains(&body));
    }

    #[test]
    fn test_small_code_block_not_oversized() {
        let text = "```\nlet x = 1;\n```\n";
        let pieces = MarkdownChunker::new()
            .chunk(text, &ChunkParams::with_size(500))
            .unwrap();
        assert_eq!(pieces.len(), 1);
        assert!(!pieces[0].oversized);
    }

    #[test]
    fn test_table_rows_never_split() {
        let mut text = String::from("| a | b |\n|---|---|\n");
        for i in 0..20 {
            text.push_str(&format!("| row {i} | value {i} |\n"));
        }
        let pieces = MarkdownChunker::new()
            .chunk(&text, &ChunkParams::with_size(80))
            .unwrap();

        assert!(pieces.len() > 1);
        for piece in &pieces {
            assert_eq!(piece.boundary, BoundaryKind::Table);
            // Every line inside a piece is a complete row
            for line in piece.text.lines() {
                assert!(line.starts_with('|'), "split row: {line:?}");
                assert!(line.trim_end().ends_with('|'), "split row: {line:?}");
            }
        }
    }

    #[test]
    fn test_oversized_table_row_emitted_alone() {
        let wide_row = format!("| {} |", "w".repeat(300));
        let text = format!("| a |\n{wide_row}\n| b |\n");
        let pieces = MarkdownChunker::new()
            .chunk(&text, &ChunkParams::with_size(100))
            .unwrap();

        let oversized: Vec<_> = pieces.iter().filter(|p| p.oversized).collect();
        assert_eq!(oversized.len(), 1);
        assert!(oversized[0].text.contains("www"));
    }

    #[test]
    fn test_list_items_packed() {
        let mut text = String::from("# List\n\n");
        for i in 0..12 {
            text.push_str(&format!("- item number {i}\n"));
        }
        let pieces = MarkdownChunker::new()
            .chunk(&text, &ChunkParams::with_size(80))
            .unwrap();

        assert!(pieces.len() > 1);
        for piece in &pieces {
            assert_eq!(piece.boundary, BoundaryKind::ListItem);
            assert!(piece.text.starts_with("# List\n\n"));
        }
    }

    #[test]
    fn test_quote_block() {
        let text = "> quoted line one\n> quoted line two\n";
        let pieces = MarkdownChunker::new()
            .chunk(text, &ChunkParams::with_size(100))
            .unwrap();
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].boundary, BoundaryKind::Quote);
    }

    #[test]
    fn test_horizontal_rule_skipped() {
        let text = "para one.\n\n---\n\npara two.";
        let pieces = MarkdownChunker::new()
            .chunk(text, &ChunkParams::with_size(100))
            .unwrap();
        assert_eq!(pieces.len(), 2);
        assert!(pieces.iter().all(|p| !p.text.contains("---")));
    }

    #[test]
    fn test_preamble_without_heading() {
        let text = "preamble text.\n\n# Later\n\nsection text.";
        let pieces = MarkdownChunker::new()
            .chunk(text, &ChunkParams::with_size(100))
            .unwrap();
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0].text, "preamble text.");
        assert!(pieces[0].heading_path.is_empty());
    }

    #[test]
    fn test_large_paragraph_sentence_packed() {
        let para = "A sentence goes right here. ".repeat(20);
        let text = format!("# H\n\n{para}");
        let pieces = MarkdownChunker::new()
            .chunk(&text, &ChunkParams::with_size(150))
            .unwrap();

        assert!(pieces.len() > 1);
        for piece in &pieces {
            assert!(piece.text.len() <= 150);
            assert_eq!(piece.boundary, BoundaryKind::Sentence);
            assert!(piece.text.starts_with("# H\n\n"));
        }
    }

    #[test]
    fn test_paragraph_overlap_shares_trailing_sentences() {
        let para = "A sentence goes right here. ".repeat(20);
        let pieces = MarkdownChunker::new()
            .chunk(&para, &ChunkParams::with_size_and_overlap(120, 40))
            .unwrap();

        assert!(pieces.len() > 2);
        for pair in pieces.windows(2) {
            // The next piece starts inside the previous one
            assert!(
                pair[1].byte_range.start < pair[0].byte_range.end,
                "no overlap between {:?} and {:?}",
                pair[0].byte_range,
                pair[1].byte_range
            );
        }
        // Overlap stays within the configured bound
        for pair in pieces.windows(2) {
            assert!(pair[0].byte_range.end - pair[1].byte_range.start <= 40);
        }
        // Coverage still reaches the end of the paragraph
        assert_eq!(pieces.last().unwrap().byte_range.end, para.len());
    }

    #[test]
    fn test_list_overlap_carries_trailing_lines() {
        let mut text = String::new();
        for i in 0..12 {
            text.push_str(&format!("- item number {i}\n"));
        }
        let pieces = MarkdownChunker::new()
            .chunk(&text, &ChunkParams::with_size_and_overlap(80, 20))
            .unwrap();

        assert!(pieces.len() > 1);
        for pair in pieces.windows(2) {
            assert!(pair[1].byte_range.start < pair[0].byte_range.end);
            // Overlap is whole lines: the carried text starts a row
            let carried = &text[pair[1].byte_range.start..pair[0].byte_range.end];
            assert!(carried.starts_with("- "), "carried mid-line: {carried:?}");
        }
    }

    #[test]
    fn test_zero_overlap_pieces_disjoint() {
        let para = "A sentence goes right here. ".repeat(20);
        let pieces = MarkdownChunker::new()
            .chunk(&para, &ChunkParams::with_size(120))
            .unwrap();
        for pair in pieces.windows(2) {
            assert_eq!(pair[0].byte_range.end, pair[1].byte_range.start);
        }
    }

    #[test]
    fn test_oversized_sentence_hard_split() {
        // One unbroken "sentence" far over the chunk size
        let text = "x".repeat(600);
        let pieces = MarkdownChunker::new()
            .chunk(&text, &ChunkParams::with_size(100))
            .unwrap();

        assert_eq!(pieces.len(), 6);
        for piece in &pieces {
            assert!(piece.size() <= 100);
            assert_eq!(piece.boundary, BoundaryKind::Character);
            assert!(!piece.oversized);
        }
        assert_eq!(pieces.last().unwrap().byte_range.end, 600);
    }

    #[test]
    fn test_byte_ranges_point_at_content() {
        let text = "# Title\n\npara one.\n\npara two.";
        let pieces = MarkdownChunker::new()
            .chunk(text, &ChunkParams::with_size(40))
            .unwrap();
        // Ranges cover the paragraph bodies, not the heading prefix
        assert_eq!(&text[pieces[0].byte_range.clone()], "para one.\n");
        assert_eq!(&text[pieces[1].byte_range.clone()], "para two.");
    }

    #[test]
    fn test_empty_input() {
        let pieces = MarkdownChunker::new()
            .chunk("", &ChunkParams::with_size(40))
            .unwrap();
        assert!(pieces.is_empty());
    }

    #[test]
    fn test_heading_only_document() {
        let pieces = MarkdownChunker::new()
            .chunk("# Just a title\n", &ChunkParams::with_size(40))
            .unwrap();
        assert!(pieces.is_empty());
    }

    #[test]
    fn test_determinism() {
        let text = "# A\n\npara.\n\n```\ncode\n```\n\n- one\n- two\n";
        let params = ChunkParams::with_size(60);
        let a = MarkdownChunker::new().chunk(text, &params).unwrap();
        let b = MarkdownChunker::new().chunk(text, &params).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_table_aware_alias() {
        assert_eq!(MarkdownChunker::table_aware().name(), "recursive_markdown");
    }
}
