//! Built-in pipeline processors.
//!
//! Stage order is Validate → (optional) MarkdownNormalize → Chunk →
//! Embed → Index → Finalize. Each processor is registered by name in
//! the default registry and declares the file types it supports.

use async_trait::async_trait;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::debug;

use crate::chunking::{ChunkParams, create_chunker};
use crate::core::{ChunkNode, DocumentStatus, FileType, NodeMetadata};
use crate::embedding::EmbeddingClient;
use crate::error::{Result, ValidationError};
use crate::index::VectorIndex;
use crate::pipeline::registry::Processor;
use crate::pipeline::{ProcessingContext, StageOutcome};
use crate::state::{DocumentState, StateStore};

/// Validates the extracted document before any processing.
pub struct ValidateProcessor;

#[async_trait]
impl Processor for ValidateProcessor {
    fn name(&self) -> &'static str {
        "validate"
    }

    async fn run(&self, ctx: &mut ProcessingContext) -> Result<()> {
        if ctx.text.trim().is_empty() {
            return Err(ValidationError::EmptyDocument {
                doc_id: ctx.document.doc_id.clone(),
            }
            .into());
        }
        if ctx.plan.chunk_size == 0 {
            return Err(ValidationError::Malformed {
                reason: "plan has zero chunk size".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

fn html_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]+>").expect("valid regex"))
}

fn blank_runs_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").expect("valid regex"))
}

/// Normalizes converted formats toward markdown-ish plain text.
///
/// Real format conversion (PDF, DOCX) happens in external converters
/// before ingestion; this stage cleans up what they produce: line
/// endings, control characters, excess blank lines, and residual HTML
/// markup.
pub struct MarkdownNormalizeProcessor;

#[async_trait]
impl Processor for MarkdownNormalizeProcessor {
    fn name(&self) -> &'static str {
        "normalize"
    }

    async fn run(&self, ctx: &mut ProcessingContext) -> Result<()> {
        let mut text = ctx.text.replace("\r\n", "\n").replace('\r', "\n");

        if ctx.document.file_type == FileType::Html {
            text = html_tag_re().replace_all(&text, " ").into_owned();
            for (entity, ch) in [
                ("&amp;", "&"),
                ("&lt;", "<"),
                ("&gt;", ">"),
                ("&quot;", "\""),
                ("&#39;", "'"),
                ("&nbsp;", " "),
            ] {
                text = text.replace(entity, ch);
            }
        }

        text.retain(|c| c == '\n' || c == '\t' || !c.is_control());
        let text = blank_runs_re().replace_all(&text, "\n\n").into_owned();

        ctx.normalized = Some(text);
        Ok(())
    }
}

/// Chunks the effective text and assembles unembedded nodes.
pub struct ChunkProcessor;

#[async_trait]
impl Processor for ChunkProcessor {
    fn name(&self) -> &'static str {
        "chunk"
    }

    async fn run(&self, ctx: &mut ProcessingContext) -> Result<()> {
        let chunker = create_chunker(ctx.plan.chunking);
        let params = ChunkParams {
            chunk_size: ctx.plan.chunk_size,
            chunk_overlap: ctx.plan.chunk_overlap,
            language: ctx.plan.language,
            respect_structure: ctx.plan.respect_structure,
        };

        let pieces = chunker.chunk(ctx.effective_text(), &params)?;
        ctx.nodes = assemble_nodes(ctx, &pieces);
        ctx.pieces = pieces;

        debug!(
            doc_id = %ctx.document.doc_id,
            strategy = chunker.name(),
            chunks = ctx.nodes.len(),
            "chunking complete"
        );
        Ok(())
    }
}

/// Builds nodes from chunker output, carrying document metadata.
pub fn assemble_nodes(
    ctx: &ProcessingContext,
    pieces: &[crate::chunking::ChunkPiece],
) -> Vec<ChunkNode> {
    pieces
        .iter()
        .enumerate()
        .map(|(ordinal, piece)| {
            let mut extra = ctx.document.metadata.clone();
            extra.insert(
                "datasource".to_string(),
                ctx.plan.datasource_name.clone(),
            );
            let metadata = NodeMetadata {
                file_type: Some(ctx.document.file_type),
                heading_path: piece.heading_path.clone(),
                boundary: Some(piece.boundary),
                oversized: piece.oversized,
                byte_range: Some(piece.byte_range.clone()),
                extra,
            };
            ChunkNode::new(&ctx.document.doc_id, ordinal, piece.text.clone(), metadata)
        })
        .collect()
}

/// Embeds assembled nodes in provider-sized batches.
pub struct EmbedProcessor {
    embedder: EmbeddingClient,
}

impl EmbedProcessor {
    /// Creates the processor around an embedding client.
    #[must_use]
    pub const fn new(embedder: EmbeddingClient) -> Self {
        Self { embedder }
    }
}

#[async_trait]
impl Processor for EmbedProcessor {
    fn name(&self) -> &'static str {
        "embed"
    }

    async fn run(&self, ctx: &mut ProcessingContext) -> Result<()> {
        let batch_size = 32;
        let mut start = 0;
        while start < ctx.nodes.len() {
            ctx.checkpoint()?;
            let end = (start + batch_size).min(ctx.nodes.len());
            let texts: Vec<String> = ctx.nodes[start..end]
                .iter()
                .map(|n| n.text.clone())
                .collect();

            let embeddings = match self.embedder.embed_batch(&texts).await {
                Ok(embeddings) => embeddings,
                Err(err) => return Err(ctx.fail_at(start, err)),
            };
            for (node, embedding) in ctx.nodes[start..end].iter_mut().zip(embeddings) {
                node.embedding = embedding;
            }
            start = end;
        }
        Ok(())
    }
}

/// Persists nodes into the vector index.
pub struct IndexProcessor {
    index: Arc<dyn VectorIndex>,
}

impl IndexProcessor {
    /// Creates the processor around an index adapter.
    #[must_use]
    pub fn new(index: Arc<dyn VectorIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl Processor for IndexProcessor {
    fn name(&self) -> &'static str {
        "index"
    }

    async fn run(&self, ctx: &mut ProcessingContext) -> Result<()> {
        ctx.checkpoint()?;
        // Full reprocess: clear any previous version first so stale
        // chunks beyond the new count cannot survive
        self.index.delete_by_doc(&ctx.document.doc_id).await?;
        self.index.upsert(&ctx.nodes).await?;
        Ok(())
    }
}

/// Writes the ingest state and completes the document record.
pub struct FinalizeProcessor {
    state: Arc<dyn StateStore>,
}

impl FinalizeProcessor {
    /// Creates the processor around a state store.
    #[must_use]
    pub fn new(state: Arc<dyn StateStore>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl Processor for FinalizeProcessor {
    fn name(&self) -> &'static str {
        "finalize"
    }

    async fn run(&self, ctx: &mut ProcessingContext) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let state = DocumentState {
            doc_id: ctx.document.doc_id.clone(),
            file_hash: ctx.file_hash.clone(),
            chunk_hashes: ctx.nodes.iter().map(|n| n.content_hash.clone()).collect(),
            chunk_ids: ctx.nodes.iter().map(|n| n.chunk_id.clone()).collect(),
            last_processed_at: now,
            metadata_snapshot: ctx.document.metadata.clone(),
        };
        self.state.save_state(&state)?;

        ctx.document.status = DocumentStatus::Completed;
        ctx.document.node_count = ctx.nodes.len();
        ctx.document.last_processed_at = Some(now);
        ctx.document.error = None;
        self.state.put_document(&ctx.document)?;

        ctx.outcome = StageOutcome::Indexed {
            node_count: ctx.nodes.len(),
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Document, ProcessingPlan};
    use crate::embedding::FallbackEmbedder;
    use crate::index::MemoryIndex;
    use crate::state::MemoryStateStore;

    fn context(text: &str) -> ProcessingContext {
        ProcessingContext::new(
            Document::new("doc-1", "a.md"),
            ProcessingPlan::default(),
            text.as_bytes().to_vec(),
            text.to_string(),
            None,
        )
    }

    #[tokio::test]
    async fn test_validate_rejects_empty() {
        let mut ctx = context("   \n ");
        let err = ValidateProcessor.run(&mut ctx).await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Validation(ValidationError::EmptyDocument { .. })
        ));
    }

    #[tokio::test]
    async fn test_validate_accepts_content() {
        let mut ctx = context("real content");
        assert!(ValidateProcessor.run(&mut ctx).await.is_ok());
    }

    #[tokio::test]
    async fn test_normalize_line_endings_and_blanks() {
        let mut ctx = context("a\r\nb\r\n\n\n\n\nc");
        MarkdownNormalizeProcessor.run(&mut ctx).await.unwrap();
        assert_eq!(ctx.normalized.as_deref(), Some("a\nb\n\nc"));
    }

    #[tokio::test]
    async fn test_normalize_strips_html() {
        let mut ctx = context("<p>Hello &amp; <b>world</b></p>");
        ctx.document.file_type = FileType::Html;
        MarkdownNormalizeProcessor.run(&mut ctx).await.unwrap();
        let normalized = ctx.normalized.unwrap();
        assert!(!normalized.contains('<'));
        assert!(normalized.contains("Hello &"));
    }

    #[tokio::test]
    async fn test_chunk_builds_nodes() {
        let mut ctx = context("# Title\n\npara one.\n\npara two.");
        ctx.plan.chunk_size = 40;
        ctx.plan.chunk_overlap = 0;
        ChunkProcessor.run(&mut ctx).await.unwrap();

        assert_eq!(ctx.nodes.len(), 2);
        assert_eq!(ctx.nodes[0].ordinal, 0);
        assert_eq!(ctx.nodes[1].ordinal, 1);
        assert_eq!(ctx.nodes[0].chunk_id, "doc-1:000000");
        assert_eq!(
            ctx.nodes[0].metadata.extra.get("datasource").map(String::as_str),
            Some("default")
        );
        assert!(ctx.nodes.iter().all(|n| n.embedding.is_empty()));
    }

    #[tokio::test]
    async fn test_embed_fills_all_nodes() {
        let mut ctx = context("# Title\n\npara one.\n\npara two.");
        ctx.plan.chunk_size = 40;
        ctx.plan.chunk_overlap = 0;
        ChunkProcessor.run(&mut ctx).await.unwrap();

        let embedder = EmbeddingClient::new(Arc::new(FallbackEmbedder::new(16)), 0);
        EmbedProcessor::new(embedder).run(&mut ctx).await.unwrap();

        assert!(ctx.nodes.iter().all(|n| n.embedding.len() == 16));
    }

    #[tokio::test]
    async fn test_index_replaces_previous_version() {
        let index: Arc<dyn VectorIndex> = Arc::new(MemoryIndex::new());
        let embedder = EmbeddingClient::new(Arc::new(FallbackEmbedder::new(8)), 0);

        // First version: 3 chunks
        let mut ctx = context("one.\n\ntwo.\n\nthree.");
        ctx.plan.chunk_size = 8;
        ctx.plan.chunk_overlap = 0;
        ChunkProcessor.run(&mut ctx).await.unwrap();
        EmbedProcessor::new(embedder.clone()).run(&mut ctx).await.unwrap();
        IndexProcessor::new(Arc::clone(&index)).run(&mut ctx).await.unwrap();
        let first_count = index.count_by_doc("doc-1").await.unwrap();
        assert!(first_count >= 2);

        // Second version: 1 chunk; stale chunks must not survive
        let mut ctx = context("only.");
        ctx.plan.chunk_size = 100;
        ctx.plan.chunk_overlap = 0;
        ChunkProcessor.run(&mut ctx).await.unwrap();
        EmbedProcessor::new(embedder).run(&mut ctx).await.unwrap();
        IndexProcessor::new(Arc::clone(&index)).run(&mut ctx).await.unwrap();
        assert_eq!(index.count_by_doc("doc-1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_finalize_writes_state_and_document() {
        let state: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        state.put_document(&Document::new("doc-1", "a.md")).unwrap();

        let mut ctx = context("# Title\n\npara one.\n\npara two.");
        ctx.plan.chunk_size = 40;
        ctx.plan.chunk_overlap = 0;
        ChunkProcessor.run(&mut ctx).await.unwrap();
        FinalizeProcessor::new(Arc::clone(&state))
            .run(&mut ctx)
            .await
            .unwrap();

        let doc = state.get_document("doc-1").unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Completed);
        assert_eq!(doc.node_count, 2);
        assert!(doc.last_processed_at.is_some());

        let saved = state.load_state("doc-1").unwrap().unwrap();
        assert_eq!(saved.chunk_ids.len(), 2);
        assert_eq!(saved.chunk_hashes.len(), 2);
        assert_eq!(saved.file_hash, ctx.file_hash);

        assert_eq!(ctx.outcome, StageOutcome::Indexed { node_count: 2 });
    }
}
