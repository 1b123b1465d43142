//! Document analysis and processing-plan selection.
//!
//! Inspects a document's structure (headings, tables, code fences,
//! language, token volume), classifies its complexity and picks the
//! chunking strategy, chunk sizing, and execution flags the pipeline
//! engine will follow.

use std::path::Path;

use tracing::debug;

use crate::chunking::split_sentences;
use crate::config::Config;
use crate::core::{
    ChunkingKind, Complexity, DocumentFeatures, FileType, Language, ProcessingPlan,
};
use crate::error::{Result, ValidationError};
use crate::io::FileReader;

/// Documents below this size with no structure are LOW complexity.
const LOW_SIZE_BYTES: u64 = 32 * 1024;

/// Documents at or above this size are HIGH complexity.
const HIGH_SIZE_BYTES: u64 = 256 * 1024;

/// Token estimate at or above which a document is HIGH complexity.
const HIGH_TOKENS: usize = 100_000;

/// Average sentence length that triggers the overlap bump.
const LONG_SENTENCE_LEN: usize = 120;

/// Minimum printable-character ratio for fallback text extraction.
const MIN_PRINTABLE_RATIO: f32 = 0.8;

/// Adaptive analyzer and strategy selector.
pub struct DocumentAnalyzer {
    config: Config,
}

impl DocumentAnalyzer {
    /// Creates an analyzer with the given configuration.
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }

    /// Analyzes a file on disk.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnsupportedFileType`] when the type is
    /// unknown and fallback text extraction fails.
    pub fn analyze_path(&self, path: &Path) -> Result<(DocumentFeatures, ProcessingPlan)> {
        let reader = FileReader::open(path)?;
        let file_type = FileType::from_path(path);
        let text = self.extract_text(path, file_type, &reader)?;
        Ok(self.analyze_text(file_type, &text, reader.size()))
    }

    /// Extracts text, applying the lossy fallback for unknown types.
    pub fn extract_text(
        &self,
        path: &Path,
        file_type: FileType,
        reader: &FileReader,
    ) -> Result<String> {
        let text = match file_type {
            FileType::Other => {
                let text = reader.read_to_string_lossy()?;
                if printable_ratio(&text) < MIN_PRINTABLE_RATIO {
                    return Err(ValidationError::UnsupportedFileType {
                        path: path.display().to_string(),
                    }
                    .into());
                }
                text
            }
            _ => reader.read_to_string_lossy()?,
        };
        Ok(text)
    }

    /// Analyzes extracted text and produces features plus a plan.
    #[must_use]
    pub fn analyze_text(
        &self,
        file_type: FileType,
        text: &str,
        size_bytes: u64,
    ) -> (DocumentFeatures, ProcessingPlan) {
        let features = extract_features(text);
        let complexity = classify_complexity(&features, size_bytes);
        let chunking = choose_chunking(file_type, &features);
        let (chunk_size, mut chunk_overlap) = chunk_sizing(file_type, complexity);

        // Long sentences need more continuity between chunks
        if features.avg_sentence_len > LONG_SENTENCE_LEN {
            chunk_overlap = chunk_overlap.saturating_mul(3) / 2;
        }

        let use_parallel = self.config.parallel.enabled
            && (size_bytes >= self.config.parallel.threshold_bytes
                || features.estimated_tokens >= self.config.parallel.threshold_tokens);

        let convert_to_markdown = matches!(
            file_type,
            FileType::Pdf | FileType::Docx | FileType::Html
        ) && complexity >= Complexity::Medium;

        let plan = ProcessingPlan {
            convert_to_markdown,
            chunking,
            chunk_size,
            chunk_overlap,
            respect_structure: self.config.chunking.respect_markdown,
            language: features.language,
            use_parallel,
            segment_size: self.config.parallel.segment_size,
            use_incremental: self.config.incremental.enabled,
            allow_partial: self.config.parallel.allow_partial,
            datasource_name: String::from("default"),
        };

        debug!(
            file_type = %file_type,
            %complexity,
            chunking = %plan.chunking,
            chunk_size,
            use_parallel,
            "analysis complete"
        );

        (features, plan)
    }
}

/// Extracts structural features from text.
#[must_use]
pub fn extract_features(text: &str) -> DocumentFeatures {
    let mut heading_depth = 0usize;
    let mut has_tables = false;
    let mut has_code = false;
    let mut has_images = false;

    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with('#') {
            let depth = trimmed.chars().take_while(|&c| c == '#').count();
            if depth <= 6 && trimmed.chars().nth(depth) == Some(' ') {
                heading_depth = heading_depth.max(depth);
            }
        }
        if trimmed.starts_with('|') {
            has_tables = true;
        }
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            has_code = true;
        }
        if trimmed.contains("![") {
            has_images = true;
        }
    }

    let total_chars = text.chars().count();
    let non_ws = text.chars().filter(|c| !c.is_whitespace()).count();
    #[allow(clippy::cast_precision_loss)]
    let text_density = if total_chars == 0 {
        0.0
    } else {
        non_ws as f32 / total_chars as f32
    };

    let language = detect_language(text);
    let sentences = split_sentences(text, language);
    let avg_sentence_len = if sentences.is_empty() {
        0
    } else {
        sentences.iter().map(|r| r.end - r.start).sum::<usize>() / sentences.len()
    };

    DocumentFeatures {
        page_count: total_chars.div_ceil(3_000).max(1),
        text_density,
        has_tables,
        has_code,
        has_images,
        heading_depth,
        language,
        estimated_tokens: total_chars.div_ceil(4),
        avg_sentence_len,
    }
}

/// Detects the segmentation language from the CJK character ratio.
#[must_use]
pub fn detect_language(text: &str) -> Language {
    let sample: Vec<char> = text.chars().take(4_000).collect();
    if sample.is_empty() {
        return Language::English;
    }
    let cjk = sample
        .iter()
        .filter(|c| matches!(**c, '\u{4E00}'..='\u{9FFF}' | '\u{3000}'..='\u{303F}'))
        .count();
    #[allow(clippy::cast_precision_loss)]
    if cjk as f32 / sample.len() as f32 > 0.3 {
        Language::Chinese
    } else {
        Language::English
    }
}

/// Classifies complexity from size, structure and token volume.
#[must_use]
pub fn classify_complexity(features: &DocumentFeatures, size_bytes: u64) -> Complexity {
    if size_bytes >= HIGH_SIZE_BYTES
        || features.estimated_tokens >= HIGH_TOKENS
        || (features.has_tables && features.has_code && features.heading_depth >= 2)
    {
        return Complexity::High;
    }
    let structurally_flat =
        features.heading_depth == 0 && !features.has_tables && !features.has_code;
    if size_bytes < LOW_SIZE_BYTES && structurally_flat {
        Complexity::Low
    } else {
        Complexity::Medium
    }
}

/// Chooses the chunking strategy for a file type and its features.
#[must_use]
pub fn choose_chunking(file_type: FileType, features: &DocumentFeatures) -> ChunkingKind {
    match file_type {
        FileType::Markdown => ChunkingKind::RecursiveMarkdown,
        FileType::Code => ChunkingKind::CodeAware,
        FileType::Table => ChunkingKind::TableAware,
        _ if features.heading_depth >= 2 => ChunkingKind::Hierarchical,
        _ => ChunkingKind::Semantic,
    }
}

/// Chunk size and overlap keyed by file type and complexity.
#[must_use]
pub fn chunk_sizing(file_type: FileType, complexity: Complexity) -> (usize, usize) {
    match (file_type, complexity) {
        (FileType::Markdown, Complexity::Low) => (800, 80),
        (FileType::Markdown, Complexity::Medium) => (1_000, 100),
        (FileType::Markdown, Complexity::High) => (1_200, 150),
        (FileType::Code, Complexity::Low) => (1_200, 100),
        (FileType::Code, Complexity::Medium) => (1_600, 100),
        (FileType::Code, Complexity::High) => (2_000, 150),
        (FileType::Table, _) => (1_000, 0),
        (_, Complexity::Low) => (600, 80),
        (_, Complexity::Medium) => (1_000, 120),
        (_, Complexity::High) => (1_500, 200),
    }
}

/// Ratio of printable (non-control, non-replacement) characters.
fn printable_ratio(text: &str) -> f32 {
    let total = text.chars().count();
    if total == 0 {
        return 0.0;
    }
    let printable = text
        .chars()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .filter(|c| *c != '\u{FFFD}')
        .count();
    #[allow(clippy::cast_precision_loss)]
    {
        printable as f32 / total as f32
    }
}
