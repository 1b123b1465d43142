//! CLI argument definitions.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Output format for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// JSON for programmatic consumption.
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => f.write_str("text"),
            Self::Json => f.write_str("json"),
        }
    }
}

/// Document ingestion and hybrid retrieval engine.
#[derive(Debug, Parser)]
#[command(name = "docpipe", version, about)]
pub struct Cli {
    /// State database path.
    #[arg(long, global = true, default_value = ".docpipe/state.db", env = "DOCPIPE_DB")]
    pub db: PathBuf,

    /// Index database path.
    #[arg(
        long,
        global = true,
        default_value = ".docpipe/index.db",
        env = "DOCPIPE_INDEX"
    )]
    pub index: PathBuf,

    /// Output format.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Subcommand.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Ingest a document into the index.
    Ingest {
        /// Path to the source file.
        path: PathBuf,

        /// Document id; defaults to the file stem.
        #[arg(long)]
        doc_id: Option<String>,

        /// Override the chunk size.
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Override the chunk overlap.
        #[arg(long)]
        chunk_overlap: Option<usize>,

        /// Override the chunking strategy.
        #[arg(long)]
        strategy: Option<String>,

        /// Force the parallel segmented path.
        #[arg(long)]
        parallel: bool,

        /// Metadata entries as key=value.
        #[arg(long = "meta", value_parser = parse_key_val)]
        meta: Vec<(String, String)>,
    },

    /// Analyze a document and print the selected plan.
    Analyze {
        /// Path to the source file.
        path: PathBuf,
    },

    /// Show a document's status.
    Status {
        /// Document id.
        doc_id: String,
    },

    /// List all documents.
    List,

    /// Hybrid search over the index.
    Search {
        /// Query text.
        query: String,

        /// Number of results.
        #[arg(long, default_value_t = 5)]
        top_k: usize,

        /// Disable the dense side.
        #[arg(long)]
        no_vector: bool,

        /// Disable the lexical side.
        #[arg(long)]
        no_lexical: bool,

        /// Rerank the fused head.
        #[arg(long)]
        rerank: bool,

        /// Restrict to one document.
        #[arg(long)]
        doc_id: Option<String>,
    },

    /// Delete a document and its chunks.
    Delete {
        /// Document id.
        doc_id: String,
    },
}

/// Parses a `key=value` pair.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("invalid key=value pair: {s}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ingest() {
        let cli = Cli::parse_from([
            "docpipe", "ingest", "guide.md", "--doc-id", "g1", "--chunk-size", "500", "--meta",
            "title=Guide",
        ]);
        let Commands::Ingest {
            path,
            doc_id,
            chunk_size,
            meta,
            ..
        } = cli.command
        else {
            unreachable!("expected ingest command");
        };
        assert_eq!(path, PathBuf::from("guide.md"));
        assert_eq!(doc_id.as_deref(), Some("g1"));
        assert_eq!(chunk_size, Some(500));
        assert_eq!(meta, vec![("title".to_string(), "Guide".to_string())]);
    }

    #[test]
    fn test_parse_search_defaults() {
        let cli = Cli::parse_from(["docpipe", "search", "HNSW index"]);
        let Commands::Search {
            query,
            top_k,
            no_vector,
            rerank,
            ..
        } = cli.command
        else {
            unreachable!("expected search command");
        };
        assert_eq!(query, "HNSW index");
        assert_eq!(top_k, 5);
        assert!(!no_vector);
        assert!(!rerank);
    }

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("a=b").unwrap(),
            ("a".to_string(), "b".to_string())
        );
        assert!(parse_key_val("nope").is_err());
    }

    #[test]
    fn test_global_format_flag() {
        let cli = Cli::parse_from(["docpipe", "--format", "json", "list"]);
        assert_eq!(cli.format, OutputFormat::Json);
    }
}
