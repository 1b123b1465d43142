//! Command execution.
//!
//! Builds a service over the SQLite state store and SQLite index so
//! ingested documents survive between invocations, runs the requested
//! command, and renders the result in the selected output format.

use anyhow::Context as _;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use crate::cli::parser::{Cli, Commands, OutputFormat};
use crate::config::Config;
use crate::core::{ChunkingKind, PlanOverrides};
use crate::index::{Filter, SqliteIndex};
use crate::retrieval::SearchFlags;
use crate::service::IngestService;
use crate::state::SqliteStateStore;

/// Executes a parsed CLI invocation and returns the rendered output.
pub async fn execute(cli: &Cli) -> anyhow::Result<String> {
    let config = Config::from_env();
    let state = Arc::new(
        SqliteStateStore::open(&cli.db)
            .with_context(|| format!("opening state database {}", cli.db.display()))?,
    );
    let index = Arc::new(
        SqliteIndex::open(&cli.index)
            .with_context(|| format!("opening index database {}", cli.index.display()))?,
    );
    let embedder = crate::embedding::create_embedder(&config.embedding)?;

    let service = IngestService::new(config, state, index, embedder)?;
    service.startup().await?;

    let output = match &cli.command {
        Commands::Ingest {
            path,
            doc_id,
            chunk_size,
            chunk_overlap,
            strategy,
            parallel,
            meta,
        } => {
            let doc_id = doc_id.clone().unwrap_or_else(|| {
                path.file_stem()
                    .map_or_else(|| "document".to_string(), |s| s.to_string_lossy().to_string())
            });
            let metadata: BTreeMap<String, String> = meta.iter().cloned().collect();
            let overrides = PlanOverrides {
                chunking: strategy
                    .as_deref()
                    .and_then(ChunkingKind::parse),
                chunk_size: *chunk_size,
                chunk_overlap: *chunk_overlap,
                use_parallel: parallel.then_some(true),
                ..Default::default()
            };
            if let Some(name) = strategy
                && ChunkingKind::parse(name).is_none()
            {
                anyhow::bail!("unknown chunking strategy: {name}");
            }

            let task_id = service.ingest(&doc_id, path, metadata, Some(overrides))?;
            let record = service.wait_for_task(&task_id).await?;
            // Let the supervisor settle the terminal status
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            let document = service.status(&doc_id)?;

            match cli.format {
                OutputFormat::Json => {
                    serde_json::to_string_pretty(&document).context("rendering json")?
                }
                OutputFormat::Text => format!(
                    "{}: {} ({} chunks, task {})",
                    document.doc_id, document.status, document.node_count, record.task_id
                ),
            }
        }

        Commands::Analyze { path } => {
            let (features, plan) = service.analyze(path)?;
            match cli.format {
                OutputFormat::Json => serde_json::to_string_pretty(&serde_json::json!({
                    "features": features,
                    "plan": plan,
                }))
                .context("rendering json")?,
                OutputFormat::Text => format!(
                    "chunking={} chunk_size={} overlap={} parallel={} tokens≈{} headings={}",
                    plan.chunking,
                    plan.chunk_size,
                    plan.chunk_overlap,
                    plan.use_parallel,
                    features.estimated_tokens,
                    features.heading_depth,
                ),
            }
        }

        Commands::Status { doc_id } => {
            let document = service.status(doc_id)?;
            match cli.format {
                OutputFormat::Json => {
                    serde_json::to_string_pretty(&document).context("rendering json")?
                }
                OutputFormat::Text => format!(
                    "{}: {} ({} chunks){}",
                    document.doc_id,
                    document.status,
                    document.node_count,
                    document
                        .error
                        .as_deref()
                        .map(|e| format!("\n  error: {e}"))
                        .unwrap_or_default(),
                ),
            }
        }

        Commands::List => {
            let documents = service.list()?;
            match cli.format {
                OutputFormat::Json => {
                    serde_json::to_string_pretty(&documents).context("rendering json")?
                }
                OutputFormat::Text => {
                    let mut out = String::new();
                    for doc in &documents {
                        let _ = writeln!(
                            out,
                            "{}\t{}\t{} chunks",
                            doc.doc_id, doc.status, doc.node_count
                        );
                    }
                    out
                }
            }
        }

        Commands::Search {
            query,
            top_k,
            no_vector,
            no_lexical,
            rerank,
            doc_id,
        } => {
            let flags = SearchFlags {
                use_vector: !no_vector,
                use_lexical: !no_lexical,
                rerank: *rerank,
            };
            let filter = doc_id
                .as_ref()
                .map(|id| Filter::new().equals("doc_id", id.clone()));
            let results = service
                .search(query, *top_k, filter.as_ref(), flags)
                .await?;

            match cli.format {
                OutputFormat::Json => {
                    serde_json::to_string_pretty(&results).context("rendering json")?
                }
                OutputFormat::Text => {
                    let mut out = String::new();
                    for (rank, result) in results.iter().enumerate() {
                        let preview = result
                            .highlight
                            .clone()
                            .unwrap_or_else(|| preview_of(&result.text, 80));
                        let _ = writeln!(
                            out,
                            "{:>2}. [{:.3}] {} {}",
                            rank + 1,
                            result.fused_score,
                            result.chunk_id,
                            preview.replace('\n', " "),
                        );
                    }
                    if out.is_empty() {
                        out.push_str("no results\n");
                    }
                    out
                }
            }
        }

        Commands::Delete { doc_id } => {
            let removed = service.delete(doc_id).await?;
            format!("deleted {doc_id} ({removed} chunks)")
        }
    };

    service.shutdown().await;
    Ok(output)
}

/// First `max_len` characters of text at a char boundary.
fn preview_of(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        return text.to_string();
    }
    let mut end = max_len;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}
