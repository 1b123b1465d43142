//! Processing plans produced by the analyzer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Document complexity classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Complexity {
    /// Small, structurally flat documents.
    Low,
    /// Default classification.
    Medium,
    /// Large or structurally rich documents.
    High,
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => f.write_str("LOW"),
            Self::Medium => f.write_str("MEDIUM"),
            Self::High => f.write_str("HIGH"),
        }
    }
}

/// Language used for sentence segmentation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Latin-script sentence rules.
    #[default]
    English,
    /// Chinese punctuation set `。！？；…` with quotation pairing.
    Chinese,
}

/// Chunking strategy selected for a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkingKind {
    /// Character windows with optional line alignment.
    FixedSize,
    /// Sentence-boundary splitting.
    Sentence,
    /// Paragraph-boundary splitting.
    Paragraph,
    /// Sentence/paragraph aware splitting with boundary priorities.
    Semantic,
    /// Markdown-aware splitting that carries ancestor headings.
    Hierarchical,
    /// Recursive markdown splitting by structural boundaries.
    RecursiveMarkdown,
    /// Splitting at top-level code declarations.
    CodeAware,
    /// Row-preserving splitting for tabular content.
    TableAware,
}

impl ChunkingKind {
    /// Returns the canonical snake_case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FixedSize => "fixed_size",
            Self::Sentence => "sentence",
            Self::Paragraph => "paragraph",
            Self::Semantic => "semantic",
            Self::Hierarchical => "hierarchical",
            Self::RecursiveMarkdown => "recursive_markdown",
            Self::CodeAware => "code_aware",
            Self::TableAware => "table_aware",
        }
    }

    /// Parses a strategy name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "fixed" | "fixed_size" => Some(Self::FixedSize),
            "sentence" => Some(Self::Sentence),
            "paragraph" => Some(Self::Paragraph),
            "semantic" => Some(Self::Semantic),
            "hierarchical" => Some(Self::Hierarchical),
            "recursive_markdown" | "markdown" => Some(Self::RecursiveMarkdown),
            "code" | "code_aware" => Some(Self::CodeAware),
            "table" | "table_aware" => Some(Self::TableAware),
            _ => None,
        }
    }
}

impl fmt::Display for ChunkingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structural features extracted by the analyzer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentFeatures {
    /// Estimated page count (by character volume).
    pub page_count: usize,
    /// Fraction of non-whitespace characters.
    pub text_density: f32,
    /// Pipe tables detected.
    pub has_tables: bool,
    /// Fenced code blocks detected.
    pub has_code: bool,
    /// Image references detected.
    pub has_images: bool,
    /// Deepest heading level observed (0 when none).
    pub heading_depth: usize,
    /// Detected language for sentence segmentation.
    pub language: Language,
    /// Token estimate (chars / 4).
    pub estimated_tokens: usize,
    /// Average sentence length in characters.
    pub avg_sentence_len: usize,
}

/// Processing plan chosen for a document.
///
/// Produced by the analyzer, optionally adjusted by caller overrides,
/// and consumed by the pipeline engine and the segmented executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingPlan {
    /// Convert to markdown before chunking (pdf/docx/html).
    pub convert_to_markdown: bool,

    /// Chunking strategy.
    pub chunking: ChunkingKind,

    /// Target chunk size in characters.
    pub chunk_size: usize,

    /// Overlap between consecutive chunks in characters.
    pub chunk_overlap: usize,

    /// Honor structural boundaries (code fences, tables, headings).
    pub respect_structure: bool,

    /// Language for sentence segmentation.
    pub language: Language,

    /// Fan out into segments processed concurrently.
    pub use_parallel: bool,

    /// Target segment size in bytes for the parallel path.
    pub segment_size: usize,

    /// Attempt delta detection against the previous ingest.
    pub use_incremental: bool,

    /// Keep succeeded segments when one fails, instead of rolling back.
    pub allow_partial: bool,

    /// Datasource label stored in node metadata.
    pub datasource_name: String,
}

impl Default for ProcessingPlan {
    fn default() -> Self {
        Self {
            convert_to_markdown: false,
            chunking: ChunkingKind::Semantic,
            chunk_size: crate::chunking::DEFAULT_CHUNK_SIZE,
            chunk_overlap: crate::chunking::DEFAULT_OVERLAP,
            respect_structure: true,
            language: Language::English,
            use_parallel: false,
            segment_size: 1024 * 1024,
            use_incremental: true,
            allow_partial: false,
            datasource_name: String::from("default"),
        }
    }
}

/// Caller overrides applied on top of the analyzer's plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanOverrides {
    /// Override the chunking strategy.
    pub chunking: Option<ChunkingKind>,
    /// Override the chunk size.
    pub chunk_size: Option<usize>,
    /// Override the chunk overlap.
    pub chunk_overlap: Option<usize>,
    /// Force or forbid the parallel path.
    pub use_parallel: Option<bool>,
    /// Force or forbid incremental detection.
    pub use_incremental: Option<bool>,
    /// Opt in to partial completion.
    pub allow_partial: Option<bool>,
}

impl PlanOverrides {
    /// Applies the overrides to a plan.
    pub fn apply(&self, plan: &mut ProcessingPlan) {
        if let Some(kind) = self.chunking {
            plan.chunking = kind;
        }
        if let Some(size) = self.chunk_size {
            plan.chunk_size = size;
        }
        if let Some(overlap) = self.chunk_overlap {
            plan.chunk_overlap = overlap;
        }
        if let Some(parallel) = self.use_parallel {
            plan.use_parallel = parallel;
        }
        if let Some(incremental) = self.use_incremental {
            plan.use_incremental = incremental;
        }
        if let Some(partial) = self.allow_partial {
            plan.allow_partial = partial;
        }
    }
}
