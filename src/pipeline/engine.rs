//! Pipeline engine.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, instrument};

use crate::broker::TaskBroker;
use crate::config::Config;
use crate::core::{Document, DocumentStatus, FileType, ProcessingPlan};
use crate::embedding::EmbeddingClient;
use crate::error::{Error, PipelineError, Result};
use crate::executor::SegmentExecutor;
use crate::incremental::{DeltaDecision, IncrementalManager};
use crate::index::VectorIndex;
use crate::pipeline::context::{ProcessingContext, StageOutcome, StageTiming};
use crate::pipeline::processors::{
    ChunkProcessor, EmbedProcessor, FinalizeProcessor, IndexProcessor,
    MarkdownNormalizeProcessor, ValidateProcessor,
};
use crate::pipeline::registry::ProcessorRegistry;
use crate::state::{DocumentState, StateStore};

/// Composes processors into per-document pipelines and runs them.
pub struct PipelineEngine {
    registry: ProcessorRegistry,
    state: Arc<dyn StateStore>,
    index: Arc<dyn VectorIndex>,
    embedder: EmbeddingClient,
    executor: SegmentExecutor,
    incremental: IncrementalManager,
    incremental_enabled: bool,
}

impl PipelineEngine {
    /// Creates an engine with the default processor registry.
    #[must_use]
    pub fn new(
        config: &Config,
        state: Arc<dyn StateStore>,
        index: Arc<dyn VectorIndex>,
        embedder: EmbeddingClient,
        broker: TaskBroker,
    ) -> Self {
        let executor = SegmentExecutor::new(broker, embedder.clone(), Arc::clone(&index));
        let registry = default_registry(&state, &index, &embedder);
        Self {
            registry,
            state,
            index,
            embedder,
            executor,
            incremental: IncrementalManager::new(config.incremental.force_reprocess_threshold),
            incremental_enabled: config.incremental.enabled,
        }
    }

    /// Mutable access to the processor registry for extensions.
    pub fn registry_mut(&mut self) -> &mut ProcessorRegistry {
        &mut self.registry
    }

    /// Runs the pipeline for one document.
    ///
    /// The caller holds the per-document lock; the engine mutates the
    /// document record and writes ingest state on success. On failure
    /// the caller records the terminal status.
    #[instrument(skip_all, fields(doc_id = %document.doc_id))]
    pub async fn run(
        &self,
        document: Document,
        plan: ProcessingPlan,
        raw: Vec<u8>,
        text: String,
        cancel: Option<Arc<crate::broker::CancelFlag>>,
    ) -> Result<StageOutcome> {
        let mut ctx = ProcessingContext::new(document, plan, raw, text, cancel);

        let prior = if ctx.plan.use_incremental && self.incremental_enabled {
            self.state.load_state(&ctx.document.doc_id)?
        } else {
            None
        };

        // File-hash short-circuit: identical bytes, nothing to do
        if let Some(prior) = &prior
            && prior.file_hash == ctx.file_hash
        {
            info!(doc_id = %ctx.document.doc_id, "source unchanged");
            ctx.document.status = DocumentStatus::Completed;
            ctx.document.node_count = prior.chunk_count();
            ctx.document.error = None;
            self.state.put_document(&ctx.document)?;
            return Ok(StageOutcome::Unchanged);
        }

        self.run_stage("validate", &mut ctx).await?;
        if ctx.plan.convert_to_markdown {
            self.run_stage("normalize", &mut ctx).await?;
        }

        if ctx.plan.use_parallel {
            return self.run_parallel(&mut ctx).await;
        }

        self.run_stage("chunk", &mut ctx).await?;

        if let Some(prior) = prior {
            if let Some(outcome) = self.try_incremental(&mut ctx, &prior).await? {
                return Ok(outcome);
            }
        }

        self.run_stage("embed", &mut ctx).await?;
        self.run_stage("index", &mut ctx).await?;
        self.run_stage("finalize", &mut ctx).await?;
        Ok(ctx.outcome.clone())
    }

    /// Delegates to the segmented executor and finalizes its report.
    async fn run_parallel(&self, ctx: &mut ProcessingContext) -> Result<StageOutcome> {
        let report = self
            .executor
            .run(
                &ctx.document,
                ctx.effective_text(),
                &ctx.plan,
                ctx.cancel_flag(),
            )
            .await?;

        let status = if report.partial {
            DocumentStatus::Partial
        } else {
            DocumentStatus::Completed
        };
        let error = report.partial.then(|| {
            format!(
                "partial ingest: segments {:?} missing",
                report.failed_segments
            )
        });

        let node_count = report.chunk_ids.len();
        self.write_state(
            &mut ctx.document,
            &ctx.file_hash,
            report.chunk_ids,
            report.chunk_hashes,
            status,
            error,
        )?;

        Ok(StageOutcome::ParallelCompleted {
            segments: report.segments,
            node_count,
            partial: report.partial,
        })
    }

    /// Attempts the incremental path; `None` means full reprocess.
    async fn try_incremental(
        &self,
        ctx: &mut ProcessingContext,
        prior: &DocumentState,
    ) -> Result<Option<StageOutcome>> {
        let new_hashes: Vec<String> = ctx.nodes.iter().map(|n| n.content_hash.clone()).collect();

        match self.incremental.decide(prior, &new_hashes) {
            DeltaDecision::Unchanged => {
                // Same chunks from different bytes (formatting-only
                // edit): refresh the stored file hash
                let chunk_ids = prior.chunk_ids.clone();
                let chunk_hashes = prior.chunk_hashes.clone();
                self.write_state(
                    &mut ctx.document,
                    &ctx.file_hash,
                    chunk_ids,
                    chunk_hashes,
                    DocumentStatus::Completed,
                    None,
                )?;
                Ok(Some(StageOutcome::Unchanged))
            }
            DeltaDecision::Partial(delta_plan) => {
                ctx.checkpoint()?;
                let applied = self
                    .incremental
                    .apply(
                        &delta_plan,
                        &mut ctx.nodes,
                        &self.embedder,
                        &self.index,
                        prior,
                    )
                    .await;
                let applied = applied.map_err(|e| stage_error("incremental", e, ctx))?;

                let chunk_ids = ctx.nodes.iter().map(|n| n.chunk_id.clone()).collect();
                let chunk_hashes = ctx.nodes.iter().map(|n| n.content_hash.clone()).collect();
                let node_count = ctx.nodes.len();
                self.write_state(
                    &mut ctx.document,
                    &ctx.file_hash,
                    chunk_ids,
                    chunk_hashes,
                    DocumentStatus::Completed,
                    None,
                )?;

                Ok(Some(StageOutcome::IncrementalApplied {
                    delta_ratio: delta_plan.delta_ratio,
                    applied,
                    node_count,
                }))
            }
            DeltaDecision::FullReprocess { delta_ratio } => {
                info!(
                    doc_id = %ctx.document.doc_id,
                    delta_ratio,
                    "delta too large, reprocessing in full"
                );
                Ok(None)
            }
        }
    }

    /// Runs one registered stage with timing and error attribution.
    async fn run_stage(&self, stage: &'static str, ctx: &mut ProcessingContext) -> Result<()> {
        let processor = self.registry.create(stage, ctx.document.file_type)?;
        let started = Instant::now();
        let result = processor.run(ctx).await;
        ctx.timings.push(StageTiming {
            stage,
            elapsed: started.elapsed(),
        });
        result.map_err(|e| stage_error(stage, e, ctx))
    }

    /// Writes ingest state and the document record for a completed (or
    /// partial) ingest that bypassed the finalize processor.
    fn write_state(
        &self,
        document: &mut Document,
        file_hash: &str,
        chunk_ids: Vec<String>,
        chunk_hashes: Vec<String>,
        status: DocumentStatus,
        error: Option<String>,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        document.status = status;
        document.node_count = chunk_ids.len();
        document.last_processed_at = Some(now);
        document.error = error;

        self.state.save_state(&DocumentState {
            doc_id: document.doc_id.clone(),
            file_hash: file_hash.to_string(),
            chunk_hashes,
            chunk_ids,
            last_processed_at: now,
            metadata_snapshot: document.metadata.clone(),
        })?;
        self.state.put_document(document)?;
        Ok(())
    }
}

/// Wraps a stage failure, preserving cancellation semantics.
fn stage_error(stage: &'static str, err: Error, ctx: &mut ProcessingContext) -> Error {
    if err.is_canceled() {
        return err;
    }
    Error::Pipeline(PipelineError::Stage {
        stage,
        ordinal: ctx.failing_ordinal.take(),
        source: Box::new(err),
    })
}

/// Builds the default processor registry.
fn default_registry(
    state: &Arc<dyn StateStore>,
    index: &Arc<dyn VectorIndex>,
    embedder: &EmbeddingClient,
) -> ProcessorRegistry {
    let mut registry = ProcessorRegistry::new();

    registry.register("validate", None, || Arc::new(ValidateProcessor));
    registry.register(
        "normalize",
        Some(vec![FileType::Pdf, FileType::Docx, FileType::Html]),
        || Arc::new(MarkdownNormalizeProcessor),
    );
    registry.register("chunk", None, || Arc::new(ChunkProcessor));

    let embed_client = embedder.clone();
    registry.register("embed", None, move || {
        Arc::new(EmbedProcessor::new(embed_client.clone()))
    });

    let index_dep = Arc::clone(index);
    registry.register("index", None, move || {
        Arc::new(IndexProcessor::new(Arc::clone(&index_dep)))
    });

    let state_dep = Arc::clone(state);
    registry.register("finalize", None, move || {
        Arc::new(FinalizeProcessor::new(Arc::clone(&state_dep)))
    });

    registry
}
