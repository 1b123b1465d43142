//! Parallel segmented execution.
//!
//! Splits a large document into coarse segments, dispatches one task
//! per segment through the broker, and joins the results with a
//! dependent merge task. Each segment task runs the minimal
//! chunk → embed → upsert sub-pipeline for its slice; global chunk
//! ordinals are `ordinal_base + local_ordinal`, so segment tasks
//! commute with respect to the index and may finish in any order.
//!
//! On a segment failure the executor cancels outstanding segment
//! tasks, rolls back the partial writes of succeeded segments by id,
//! and surfaces the failure; with `allow_partial` the succeeded
//! segments are kept and the gaps recorded.

use futures_util::stream::{FuturesUnordered, StreamExt};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::broker::{CancelFlag, TaskBroker, TaskContext, TaskOptions, TaskState, queues};
use crate::chunking::{ChunkParams, create_chunker, split_segments};
use crate::core::{ChunkNode, ChunkingKind, Document, NodeMetadata, ProcessingPlan, Segment, chunk_id};
use crate::embedding::EmbeddingClient;
use crate::error::{Error, PipelineError, Result};
use crate::index::VectorIndex;

/// Embedding batch size inside a segment task.
const SEGMENT_BATCH: usize = 32;

/// What one segment task reports back through the result store.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SegmentTaskResult {
    segment_id: usize,
    ordinal_base: usize,
    count: usize,
    chunk_ids: Vec<String>,
    chunk_hashes: Vec<String>,
}

/// Aggregate of a completed (or partially completed) segmented ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentReport {
    /// Segments dispatched.
    pub segments: usize,
    /// Persisted chunk ids in source order.
    pub chunk_ids: Vec<String>,
    /// Content hashes in source order.
    pub chunk_hashes: Vec<String>,
    /// Whether failed segments were tolerated.
    pub partial: bool,
    /// Segment ids that did not complete (partial mode only).
    pub failed_segments: Vec<usize>,
}

impl SegmentReport {
    /// Total persisted chunks.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.chunk_ids.len()
    }
}

/// Fans a document out into segment tasks and merges the results.
pub struct SegmentExecutor {
    broker: TaskBroker,
    embedder: EmbeddingClient,
    index: Arc<dyn VectorIndex>,
}

impl SegmentExecutor {
    /// Creates an executor.
    #[must_use]
    pub fn new(broker: TaskBroker, embedder: EmbeddingClient, index: Arc<dyn VectorIndex>) -> Self {
        Self {
            broker,
            embedder,
            index,
        }
    }

    /// Runs the segmented ingest for one document.
    #[instrument(skip_all, fields(doc_id = %document.doc_id))]
    #[allow(clippy::too_many_lines)]
    pub async fn run(
        &self,
        document: &Document,
        text: &str,
        plan: &ProcessingPlan,
        cancel: Option<Arc<CancelFlag>>,
    ) -> Result<SegmentReport> {
        let structured = matches!(
            plan.chunking,
            ChunkingKind::RecursiveMarkdown | ChunkingKind::Hierarchical | ChunkingKind::TableAware
        );
        let ranges = split_segments(text, plan.segment_size, plan.language, structured);
        if ranges.is_empty() {
            return Ok(SegmentReport {
                segments: 0,
                chunk_ids: Vec::new(),
                chunk_hashes: Vec::new(),
                partial: false,
                failed_segments: Vec::new(),
            });
        }

        // Count chunks per segment up front so every segment knows its
        // ordinal base without coordinating with the others. Chunking
        // is deterministic; the worker repeats it on its own slice.
        let params = chunk_params(plan);
        let counts: Vec<usize> = ranges
            .par_iter()
            .map(|range| {
                create_chunker(plan.chunking)
                    .chunk(&text[range.clone()], &params)
                    .map(|pieces| pieces.len())
            })
            .collect::<Result<Vec<_>>>()?;

        let mut ordinal_base = 0;
        let mut segments = Vec::with_capacity(ranges.len());
        for (segment_id, (range, count)) in ranges.iter().zip(&counts).enumerate() {
            segments.push(Arc::new(Segment {
                segment_id,
                doc_id: document.doc_id.clone(),
                ordinal_base,
                text: text[range.clone()].to_string(),
                byte_range: range.clone(),
            }));
            ordinal_base += count;
        }
        let total_chunks = ordinal_base;
        let total_segments = segments.len();

        info!(
            segments = total_segments,
            total_chunks,
            segment_size = plan.segment_size,
            "dispatching segment tasks"
        );

        // Dispatch
        let opts = self.broker.default_options();
        let plan = Arc::new(plan.clone());
        let document = Arc::new(document.clone());
        let mut segment_ids = Vec::with_capacity(total_segments);
        for segment in &segments {
            segment_ids.push(self.submit_segment(
                Arc::clone(segment),
                Arc::clone(&document),
                Arc::clone(&plan),
                cancel.clone(),
                opts,
            ));
        }

        // Join body validates contiguity and aggregates
        let broker = self.broker.clone();
        let group_for_merge = segment_ids.clone();
        let merge_id = self.broker.chord(
            segment_ids.clone(),
            &format!("merge:{}", document.doc_id),
            queues::DOCUMENT_MERGING,
            opts,
            move |_ctx, _outcome| {
                let broker = broker.clone();
                let ids = group_for_merge.clone();
                async move { merge_results(&broker, &ids).await }
            },
        );

        // Cancel outstanding segments as soon as one fails
        self.watch_and_cancel(&segment_ids, cancel.as_deref()).await;

        let merge_record = self
            .broker
            .wait(&merge_id)
            .await
            .map_err(Error::from)?;

        if merge_record.state == TaskState::Succeeded {
            let report: SegmentReport = self.broker.result(&merge_id).map_err(Error::from)?;
            if report.node_count() != total_chunks {
                return Err(PipelineError::OrdinalGap {
                    expected: total_chunks,
                    found: report.node_count(),
                }
                .into());
            }
            return Ok(report);
        }

        // Group failed or was canceled: collect what did complete
        let segment_spans: Vec<(usize, usize)> = segments
            .iter()
            .zip(&counts)
            .map(|(segment, &count)| (segment.ordinal_base, count))
            .collect();
        self.handle_failure(
            &document,
            &segment_ids,
            &segment_spans,
            plan.allow_partial,
            cancel.as_deref(),
        )
        .await
    }

    fn submit_segment(
        &self,
        segment: Arc<Segment>,
        document: Arc<Document>,
        plan: Arc<ProcessingPlan>,
        parent_cancel: Option<Arc<CancelFlag>>,
        opts: TaskOptions,
    ) -> String {
        let embedder = self.embedder.clone();
        let index = Arc::clone(&self.index);
        let name = format!("segment:{}:{}", segment.doc_id, segment.segment_id);

        self.broker
            .submit(&name, queues::DOCUMENT_SEGMENT, opts, move |ctx| {
                let segment = Arc::clone(&segment);
                let document = Arc::clone(&document);
                let plan = Arc::clone(&plan);
                let embedder = embedder.clone();
                let index = Arc::clone(&index);
                let parent_cancel = parent_cancel.clone();
                async move {
                    process_segment(
                        &segment,
                        &document,
                        &plan,
                        &embedder,
                        &index,
                        &ctx,
                        parent_cancel.as_deref(),
                    )
                    .await
                }
            })
    }

    /// Waits for segment tasks, canceling the rest on first failure.
    async fn watch_and_cancel(&self, segment_ids: &[String], cancel: Option<&CancelFlag>) {
        let mut pending: FuturesUnordered<_> = segment_ids
            .iter()
            .cloned()
            .map(|id| {
                let broker = self.broker.clone();
                async move { broker.wait(&id).await }
            })
            .collect();

        let mut canceling = false;
        while let Some(result) = pending.next().await {
            let failed = match result {
                Ok(record) => record.state != TaskState::Succeeded,
                Err(_) => true,
            };
            let doc_canceled = cancel.is_some_and(CancelFlag::is_canceled);
            if (failed || doc_canceled) && !canceling {
                canceling = true;
                for id in segment_ids {
                    let _ = self.broker.cancel(id);
                }
            }
        }
    }

    /// Rollback or partial-keep after a failed group.
    ///
    /// `segment_spans` holds `(ordinal_base, count)` per segment so
    /// chunk ids of half-written segments can be derived without their
    /// results.
    async fn handle_failure(
        &self,
        document: &Document,
        segment_ids: &[String],
        segment_spans: &[(usize, usize)],
        allow_partial: bool,
        cancel: Option<&CancelFlag>,
    ) -> Result<SegmentReport> {
        let total_segments = segment_ids.len();
        let mut succeeded: Vec<SegmentTaskResult> = Vec::new();
        let mut failed_segments = Vec::new();
        let mut counts: HashMap<TaskState, usize> = HashMap::new();
        let mut first_failure: Option<String> = None;

        for (segment_id, task_id) in segment_ids.iter().enumerate() {
            let record = self.broker.status(task_id).map_err(Error::from)?;
            *counts.entry(record.state).or_insert(0) += 1;
            if record.state == TaskState::Succeeded {
                if let Ok(result) = self.broker.result::<SegmentTaskResult>(task_id) {
                    succeeded.push(result);
                    continue;
                }
            }
            failed_segments.push(segment_id);
            if first_failure.is_none() {
                first_failure = record.error;
            }
        }

        let summary = format!(
            "{} succeeded, {} failed, {} canceled",
            counts.get(&TaskState::Succeeded).copied().unwrap_or(0),
            counts.get(&TaskState::Failed).copied().unwrap_or(0),
            counts.get(&TaskState::Canceled).copied().unwrap_or(0),
        );

        let doc_canceled = cancel.is_some_and(CancelFlag::is_canceled);
        if doc_canceled || !allow_partial {
            // Best-effort rollback. Succeeded segments reported their
            // ids; for interrupted segments the ids are derived from
            // the segment spans, covering half-written batches.
            // Idempotent upserts make retried ingests safe either way.
            let mut rollback_ids: Vec<String> = succeeded
                .iter()
                .flat_map(|r| r.chunk_ids.iter().cloned())
                .collect();
            for &segment_id in &failed_segments {
                if let Some(&(base, count)) = segment_spans.get(segment_id) {
                    rollback_ids
                        .extend((base..base + count).map(|i| chunk_id(&document.doc_id, i)));
                }
            }
            if !rollback_ids.is_empty() {
                match self.index.delete_by_ids(&rollback_ids).await {
                    Ok(removed) => {
                        info!(doc_id = %document.doc_id, removed, "rolled back partial writes");
                    }
                    Err(e) => {
                        warn!(doc_id = %document.doc_id, error = %e, "rollback incomplete");
                    }
                }
            }

            if doc_canceled {
                return Err(PipelineError::Canceled.into());
            }
            return Err(PipelineError::SegmentFailed {
                segment: failed_segments.first().copied().unwrap_or(0),
                total: total_segments,
                reason: format!(
                    "{} (group: {summary})",
                    first_failure.unwrap_or_else(|| "unknown failure".to_string())
                ),
            }
            .into());
        }

        // Partial completion: keep succeeded segments, clean up the
        // half-written remains of the failed ones, record gaps
        let mut gap_ids = Vec::new();
        for &segment_id in &failed_segments {
            if let Some(&(base, count)) = segment_spans.get(segment_id) {
                gap_ids.extend((base..base + count).map(|i| chunk_id(&document.doc_id, i)));
            }
        }
        if !gap_ids.is_empty() {
            let _ = self.index.delete_by_ids(&gap_ids).await;
        }

        succeeded.sort_by_key(|r| r.segment_id);
        let report = SegmentReport {
            segments: total_segments,
            chunk_ids: succeeded
                .iter()
                .flat_map(|r| r.chunk_ids.iter().cloned())
                .collect(),
            chunk_hashes: succeeded
                .iter()
                .flat_map(|r| r.chunk_hashes.iter().cloned())
                .collect(),
            partial: true,
            failed_segments,
        };
        warn!(
            doc_id = %document.doc_id,
            gaps = ?report.failed_segments,
            "keeping partial ingest ({summary})"
        );
        Ok(report)
    }
}

/// The minimal sub-pipeline one segment task runs.
async fn process_segment(
    segment: &Segment,
    document: &Document,
    plan: &ProcessingPlan,
    embedder: &EmbeddingClient,
    index: &Arc<dyn VectorIndex>,
    ctx: &TaskContext,
    parent_cancel: Option<&CancelFlag>,
) -> Result<SegmentTaskResult> {
    let checkpoint = |ctx: &TaskContext| -> Result<()> {
        ctx.checkpoint().map_err(Error::from)?;
        if let Some(parent) = parent_cancel {
            parent.check().map_err(Error::from)?;
        }
        Ok(())
    };

    checkpoint(ctx)?;

    // Chunk (deterministic recomputation of the split-phase counts)
    let chunker = create_chunker(plan.chunking);
    let pieces = chunker.chunk(&segment.text, &chunk_params(plan))?;

    // Assemble nodes with global ordinals
    let mut nodes: Vec<ChunkNode> = pieces
        .into_iter()
        .enumerate()
        .map(|(local, piece)| {
            let mut extra = document.metadata.clone();
            extra.insert("datasource".to_string(), plan.datasource_name.clone());
            let metadata = NodeMetadata {
                file_type: Some(document.file_type),
                heading_path: piece.heading_path,
                boundary: Some(piece.boundary),
                oversized: piece.oversized,
                byte_range: Some(
                    segment.byte_range.start + piece.byte_range.start
                        ..segment.byte_range.start + piece.byte_range.end,
                ),
                extra,
            };
            ChunkNode::new(
                &segment.doc_id,
                segment.ordinal_base + local,
                piece.text,
                metadata,
            )
        })
        .collect();

    // Embed and upsert in batches, honoring soft cancel between chunks
    let mut start = 0;
    while start < nodes.len() {
        checkpoint(ctx)?;
        let end = (start + SEGMENT_BATCH).min(nodes.len());
        let texts: Vec<String> = nodes[start..end].iter().map(|n| n.text.clone()).collect();
        let embeddings = embedder.embed_batch(&texts).await.map_err(Error::from)?;
        for (node, embedding) in nodes[start..end].iter_mut().zip(embeddings) {
            node.embedding = embedding;
        }

        checkpoint(ctx)?;
        index.upsert(&nodes[start..end]).await?;
        start = end;
    }

    Ok(SegmentTaskResult {
        segment_id: segment.segment_id,
        ordinal_base: segment.ordinal_base,
        count: nodes.len(),
        chunk_ids: nodes.iter().map(|n| n.chunk_id.clone()).collect(),
        chunk_hashes: nodes.iter().map(|n| n.content_hash.clone()).collect(),
    })
}

/// Aggregates segment results and validates ordinal contiguity.
async fn merge_results(broker: &TaskBroker, segment_task_ids: &[String]) -> Result<SegmentReport> {
    let mut results: Vec<SegmentTaskResult> = Vec::with_capacity(segment_task_ids.len());
    for task_id in segment_task_ids {
        results.push(broker.result(task_id).map_err(Error::from)?);
    }
    results.sort_by_key(|r| r.segment_id);

    // Segment bases must tile [0, total) with no gaps
    let mut expected_base = 0;
    for result in &results {
        if result.ordinal_base != expected_base {
            return Err(PipelineError::OrdinalGap {
                expected: expected_base,
                found: result.ordinal_base,
            }
            .into());
        }
        expected_base += result.count;
    }

    Ok(SegmentReport {
        segments: results.len(),
        chunk_ids: results
            .iter()
            .flat_map(|r| r.chunk_ids.iter().cloned())
            .collect(),
        chunk_hashes: results
            .iter()
            .flat_map(|r| r.chunk_hashes.iter().cloned())
            .collect(),
        partial: false,
        failed_segments: Vec::new(),
    })
}

fn chunk_params(plan: &ProcessingPlan) -> ChunkParams {
    ChunkParams {
        chunk_size: plan.chunk_size,
        chunk_overlap: plan.chunk_overlap,
        language: plan.language,
        respect_structure: plan.respect_structure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerConfig;
    use crate::core::chunk_id;
    use crate::embedding::{Embedder, FallbackEmbedder};
    use crate::error::EmbedError;
    use crate::index::MemoryIndex;
    use async_trait::async_trait;

    /// Embedder that fails fatally on texts containing a marker.
    struct PoisonEmbedder {
        inner: FallbackEmbedder,
        marker: &'static str,
    }

    #[async_trait]
    impl Embedder for PoisonEmbedder {
        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }

        async fn embed(
            &self,
            texts: &[String],
        ) -> std::result::Result<Vec<Vec<f32>>, EmbedError> {
            if texts.iter().any(|t| t.contains(self.marker)) {
                return Err(EmbedError::Fatal {
                    reason: "poisoned batch".to_string(),
                });
            }
            self.inner.embed(texts).await
        }
    }

    fn executor_with(embedder: Arc<dyn Embedder>) -> (SegmentExecutor, Arc<dyn VectorIndex>) {
        let broker = TaskBroker::new(BrokerConfig {
            worker_count: 4,
            max_retries: 0,
            task_soft_time_limit: 30,
            task_time_limit: 60,
            ..Default::default()
        });
        let index: Arc<dyn VectorIndex> = Arc::new(MemoryIndex::new());
        let executor = SegmentExecutor::new(
            broker,
            EmbeddingClient::new(embedder, 0),
            Arc::clone(&index),
        );
        (executor, index)
    }

    fn plan(segment_size: usize, chunk_size: usize) -> ProcessingPlan {
        ProcessingPlan {
            chunking: ChunkingKind::Sentence,
            chunk_size,
            chunk_overlap: 0,
            use_parallel: true,
            segment_size,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_parallel_ingest_contiguous_ordinals() {
        let (executor, index) = executor_with(Arc::new(FallbackEmbedder::new(8)));
        let text = "A short sentence here. ".repeat(200); // ~4600 bytes
        let document = Document::new("doc-1", "big.txt");
        let plan = plan(1_000, 120);

        let report = executor.run(&document, &text, &plan, None).await.unwrap();
        assert!(report.segments >= 4);
        assert!(!report.partial);

        // node_count equals the sum of per-segment counts and the
        // index agrees
        let count = index.count_by_doc("doc-1").await.unwrap();
        assert_eq!(count, report.node_count());

        // Ordinals are contiguous: every derived id exists
        for ordinal in 0..report.node_count() {
            let node = index.get(&chunk_id("doc-1", ordinal)).await.unwrap();
            assert!(node.is_some(), "missing ordinal {ordinal}");
        }

        // Ids in the report are in source order
        let expected: Vec<String> = (0..report.node_count())
            .map(|i| chunk_id("doc-1", i))
            .collect();
        assert_eq!(report.chunk_ids, expected);
    }

    #[tokio::test]
    async fn test_segment_failure_rolls_back() {
        let (executor, index) = executor_with(Arc::new(PoisonEmbedder {
            inner: FallbackEmbedder::new(8),
            marker: "POISON",
        }));

        // 10 segments; the marker lands mid-document
        let mut text = String::new();
        for i in 0..10 {
            let filler = format!("Sentence number {i} repeats itself. ").repeat(30);
            if i == 5 {
                text.push_str("This sentence carries POISON for the embedder. ");
            }
            text.push_str(&filler);
        }

        let document = Document::new("doc-new", "big.txt");
        let plan = plan(1_100, 150);

        let err = executor.run(&document, &text, &plan, None).await.unwrap_err();
        let Error::Pipeline(PipelineError::SegmentFailed { total, reason, .. }) = err else {
            unreachable!("expected segment failure, got other error");
        };
        assert!(total >= 5);
        assert!(reason.contains("succeeded"));

        // Rollback atomicity: nothing of the new document survives
        assert_eq!(index.count_by_doc("doc-new").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_segment_failure_allow_partial_keeps_rest() {
        let (executor, index) = executor_with(Arc::new(PoisonEmbedder {
            inner: FallbackEmbedder::new(8),
            marker: "POISON",
        }));

        let mut text = String::new();
        for i in 0..6 {
            if i == 2 {
                text.push_str("POISON sentence lives here. ");
            }
            text.push_str(&format!("Sentence number {i} repeats. ").repeat(40));
        }

        let document = Document::new("doc-p", "big.txt");
        let mut plan = plan(1_100, 150);
        plan.allow_partial = true;

        let report = executor.run(&document, &text, &plan, None).await.unwrap();
        assert!(report.partial);
        assert!(!report.failed_segments.is_empty());
        assert!(report.node_count() > 0);
        assert_eq!(
            index.count_by_doc("doc-p").await.unwrap(),
            report.node_count()
        );
    }

    #[tokio::test]
    async fn test_small_text_single_segment() {
        let (executor, index) = executor_with(Arc::new(FallbackEmbedder::new(8)));
        let text = "Tiny document.";
        let document = Document::new("doc-s", "s.txt");
        let plan = plan(1_000, 100);

        let report = executor.run(&document, text, &plan, None).await.unwrap();
        assert_eq!(report.segments, 1);
        assert_eq!(report.node_count(), 1);
        assert_eq!(index.count_by_doc("doc-s").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_document_cancel_rolls_back() {
        let (executor, index) = executor_with(Arc::new(FallbackEmbedder::new(8)));
        let text = "A sentence that repeats for a while. ".repeat(400);
        let document = Document::new("doc-c", "c.txt");
        let plan = plan(1_000, 120);

        let cancel = Arc::new(CancelFlag::default());
        cancel.cancel();

        let err = executor
            .run(&document, &text, &plan, Some(cancel))
            .await
            .unwrap_err();
        assert!(err.is_canceled());
        assert_eq!(index.count_by_doc("doc-c").await.unwrap(), 0);
    }
}
