//! Typed processing context passed between pipeline stages.
//!
//! The context is owned by exactly one stage at a time (exclusive
//! handoff); there is no concurrent mutation. Fields are typed and
//! optional rather than living in a string-keyed map.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::broker::CancelFlag;
use crate::chunking::ChunkPiece;
use crate::core::{ChunkNode, Document, ProcessingPlan};
use crate::error::Result;
use crate::incremental::DeltaApplied;

/// Result of a pipeline run, carried in the context and stored as the
/// ingest task's result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StageOutcome {
    /// No stage has completed yet.
    Pending,
    /// Source bytes match the previous ingest; nothing was done.
    Unchanged,
    /// Full serial ingest completed.
    Indexed {
        /// Chunks persisted.
        node_count: usize,
    },
    /// Incremental update applied.
    IncrementalApplied {
        /// Fraction of chunks that changed.
        delta_ratio: f64,
        /// Counters from the partial apply.
        applied: DeltaApplied,
        /// Total chunks after the update.
        node_count: usize,
    },
    /// Parallel segmented ingest completed.
    ParallelCompleted {
        /// Segments dispatched.
        segments: usize,
        /// Chunks persisted.
        node_count: usize,
        /// Whether some segments were kept under `allow_partial`.
        partial: bool,
    },
}

/// Wall-clock timing of one stage.
#[derive(Debug, Clone)]
pub struct StageTiming {
    /// Stage name.
    pub stage: &'static str,
    /// Elapsed time.
    pub elapsed: Duration,
}

/// Mutable state carried through the pipeline stages.
pub struct ProcessingContext {
    /// Document being processed.
    pub document: Document,

    /// Plan selected by the analyzer (plus overrides).
    pub plan: ProcessingPlan,

    /// Raw source bytes.
    pub raw: Vec<u8>,

    /// Extracted text.
    pub text: String,

    /// Markdown-normalized text, when the normalize stage ran.
    pub normalized: Option<String>,

    /// Chunker output.
    pub pieces: Vec<ChunkPiece>,

    /// Assembled nodes (embedded after the embed stage).
    pub nodes: Vec<ChunkNode>,

    /// SHA-256 of the raw bytes.
    pub file_hash: String,

    /// Ordinal a failing stage wants attached to its error.
    pub failing_ordinal: Option<usize>,

    /// Stage result.
    pub outcome: StageOutcome,

    /// Per-stage timings.
    pub timings: Vec<StageTiming>,

    cancel: Option<Arc<CancelFlag>>,
}

impl ProcessingContext {
    /// Creates a context for one ingest attempt.
    #[must_use]
    pub fn new(
        document: Document,
        plan: ProcessingPlan,
        raw: Vec<u8>,
        text: String,
        cancel: Option<Arc<CancelFlag>>,
    ) -> Self {
        let file_hash = crate::state::hash_bytes(&raw);
        Self {
            document,
            plan,
            raw,
            text,
            normalized: None,
            pieces: Vec::new(),
            nodes: Vec::new(),
            file_hash,
            failing_ordinal: None,
            outcome: StageOutcome::Pending,
            timings: Vec::new(),
            cancel,
        }
    }

    /// Returns the text later stages should consume.
    #[must_use]
    pub fn effective_text(&self) -> &str {
        self.normalized.as_deref().unwrap_or(&self.text)
    }

    /// Checks cooperative cancellation.
    ///
    /// Called before each I/O call and between chunk batches.
    pub fn checkpoint(&self) -> Result<()> {
        if let Some(cancel) = &self.cancel {
            cancel.check().map_err(crate::error::Error::from)?;
        }
        Ok(())
    }

    /// Returns the cancellation flag for delegation to the executor.
    #[must_use]
    pub fn cancel_flag(&self) -> Option<Arc<CancelFlag>> {
        self.cancel.clone()
    }

    /// Records the ordinal for error attribution, then returns the
    /// error unchanged.
    pub fn fail_at<E>(&mut self, ordinal: usize, err: E) -> crate::error::Error
    where
        E: Into<crate::error::Error>,
    {
        self.failing_ordinal = Some(ordinal);
        err.into()
    }
}

impl std::fmt::Debug for ProcessingContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingContext")
            .field("doc_id", &self.document.doc_id)
            .field("plan", &self.plan.chunking)
            .field("text_len", &self.text.len())
            .field("pieces", &self.pieces.len())
            .field("nodes", &self.nodes.len())
            .field("outcome", &self.outcome)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> ProcessingContext {
        ProcessingContext::new(
            Document::new("doc-1", "a.md"),
            ProcessingPlan::default(),
            b"hello".to_vec(),
            "hello".to_string(),
            None,
        )
    }

    #[test]
    fn test_file_hash_computed() {
        let ctx = context();
        assert_eq!(ctx.file_hash, crate::state::hash_bytes(b"hello"));
        assert_eq!(ctx.outcome, StageOutcome::Pending);
    }

    #[test]
    fn test_effective_text_prefers_normalized() {
        let mut ctx = context();
        assert_eq!(ctx.effective_text(), "hello");
        ctx.normalized = Some("normalized".to_string());
        assert_eq!(ctx.effective_text(), "normalized");
    }

    #[test]
    fn test_checkpoint_without_flag() {
        let ctx = context();
        assert!(ctx.checkpoint().is_ok());
    }

    #[test]
    fn test_fail_at_records_ordinal() {
        let mut ctx = context();
        let err = ctx.fail_at(
            7,
            crate::error::EmbedError::Fatal {
                reason: "x".to_string(),
            },
        );
        assert_eq!(ctx.failing_ordinal, Some(7));
        assert!(matches!(err, crate::error::Error::Embed(_)));
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = StageOutcome::Indexed { node_count: 3 };
        let json = serde_json::to_string(&outcome).unwrap();
        let back: StageOutcome = serde_json::from_str(&json).unwrap();
        assert_eq!(back, outcome);
    }
}
