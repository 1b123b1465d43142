//! Configuration for the ingestion and retrieval engine.
//!
//! Every recognized option has a typed field with a serde default, so a
//! partial JSON document or environment overlay yields a fully formed
//! configuration. `Config::validate` rejects inconsistent combinations
//! (weights outside `[0, 1]`, zero dimensions) before startup.

use serde::{Deserialize, Serialize};

use crate::core::ChunkingKind;
use crate::error::{Error, Result};

/// Embedding provider selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// OpenAI `/v1/embeddings`.
    Openai,
    /// DashScope text-embedding endpoint.
    Dashscope,
    /// OpenAI-compatible endpoint at a custom base URL.
    Custom,
    /// Deterministic hash embedder; offline and test use.
    #[default]
    Hash,
}

/// Vector store backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorStoreType {
    /// Bundled in-memory backend.
    #[default]
    Memory,
    /// Bundled SQLite backend (brute-force cosine + FTS5 lexical).
    Sqlite,
    /// External Milvus deployment.
    Milvus,
    /// External Elasticsearch deployment.
    Elasticsearch,
    /// External FAISS service.
    Faiss,
    /// External Qdrant deployment.
    Qdrant,
}

/// Collection bootstrap behavior at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexManagement {
    /// Create the collection when missing and validate its dimension.
    #[default]
    CreateIfNotExists,
    /// Trust the deployment; skip checks.
    NoValidation,
}

/// Embedding service options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Provider selection.
    pub provider: EmbeddingProvider,
    /// Model name passed to the provider.
    pub model: String,
    /// Embedding dimension; must match the index dimension.
    pub dimensions: usize,
    /// Maximum texts per provider call.
    pub batch_max: usize,
    /// Provider base URL (custom/dashscope).
    pub base_url: Option<String>,
    /// API key; read from the environment in deployments.
    pub api_key: Option<String>,
    /// Maximum retry attempts for transient failures.
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Hash,
            model: String::from("text-embedding-3-small"),
            dimensions: 384,
            batch_max: 64,
            base_url: None,
            api_key: None,
            max_retries: 3,
        }
    }
}

/// Vector store options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Backend selection.
    pub store_type: VectorStoreType,
    /// Connection endpoint for external backends.
    pub endpoint: Option<String>,
    /// Collection name.
    pub collection: String,
    /// Bootstrap behavior.
    pub management: IndexManagement,
    /// Drop and recreate the collection at startup.
    pub overwrite: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            store_type: VectorStoreType::Memory,
            endpoint: None,
            collection: String::from("documents"),
            management: IndexManagement::CreateIfNotExists,
            overwrite: false,
        }
    }
}

/// Chunking defaults applied when the analyzer has no stronger signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Target chunk size in characters.
    pub chunk_size: usize,
    /// Overlap between consecutive chunks.
    pub chunk_overlap: usize,
    /// Default strategy when the analyzer is bypassed.
    pub chunking_type: ChunkingKind,
    /// Honor markdown structure (fences, tables, headings).
    pub respect_markdown: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: crate::chunking::DEFAULT_CHUNK_SIZE,
            chunk_overlap: crate::chunking::DEFAULT_OVERLAP,
            chunking_type: ChunkingKind::Semantic,
            respect_markdown: true,
        }
    }
}

/// Segment splitting strategy for the parallel path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentStrategy {
    /// Byte windows at character boundaries.
    FixedSize,
    /// Sentence-boundary segmentation.
    #[default]
    Sentence,
    /// Paragraph-boundary segmentation.
    Paragraph,
    /// Structural boundaries for markdown-like input.
    Semantic,
}

/// Parallel/segmented execution options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelConfig {
    /// Enable the segmented executor.
    pub enabled: bool,
    /// Worker cap for segment tasks.
    pub max_workers: usize,
    /// Target segment size in bytes.
    pub segment_size: usize,
    /// Document size that triggers the parallel path.
    pub threshold_bytes: u64,
    /// Token estimate that triggers the parallel path.
    pub threshold_tokens: usize,
    /// Segment splitting strategy.
    pub strategy: SegmentStrategy,
    /// Keep succeeded segments when one fails.
    pub allow_partial: bool,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_workers: default_worker_count(),
            segment_size: 1024 * 1024,
            threshold_bytes: 1024 * 1024,
            threshold_tokens: 200_000,
            strategy: SegmentStrategy::Sentence,
            allow_partial: false,
        }
    }
}

/// Incremental update options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IncrementalConfig {
    /// Enable delta detection on re-ingest.
    pub enabled: bool,
    /// Delta ratio at or above which the whole document is reprocessed.
    pub force_reprocess_threshold: f64,
}

impl Default for IncrementalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            force_reprocess_threshold: 0.5,
        }
    }
}

/// Hybrid retrieval options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Weight of the normalized vector score.
    pub w_vector: f64,
    /// Weight of the normalized lexical score.
    pub w_lexical: f64,
    /// Reranker model name; empty disables reranking.
    pub rerank_model: String,
    /// Candidates passed to the reranker.
    pub rerank_top_n: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            w_vector: 0.7,
            w_lexical: 0.3,
            rerank_model: String::new(),
            rerank_top_n: 20,
        }
    }
}

/// Task broker options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker endpoint; unused by the in-process broker.
    pub broker_url: Option<String>,
    /// Result backend endpoint; unused by the in-process broker.
    pub result_backend_url: Option<String>,
    /// Hard per-task time limit in seconds.
    pub task_time_limit: u64,
    /// Soft per-task time limit in seconds.
    pub task_soft_time_limit: u64,
    /// Maximum retry attempts per task.
    pub max_retries: u32,
    /// Worker concurrency per queue.
    pub worker_count: usize,
    /// Seconds task results stay retrievable.
    pub result_ttl_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            broker_url: None,
            result_backend_url: None,
            task_time_limit: 600,
            task_soft_time_limit: 540,
            max_retries: 3,
            worker_count: default_worker_count(),
            result_ttl_secs: 3600,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Embedding service options.
    pub embedding: EmbeddingConfig,
    /// Vector store options.
    pub index: IndexConfig,
    /// Chunking defaults.
    pub chunking: ChunkingConfig,
    /// Parallel execution options.
    pub parallel: ParallelConfig,
    /// Incremental update options.
    pub incremental: IncrementalConfig,
    /// Retrieval options.
    pub retrieval: RetrievalConfig,
    /// Broker options.
    pub broker: BrokerConfig,
}

impl Config {
    /// Loads configuration from the environment on top of defaults.
    ///
    /// Recognized variables mirror the field names
    /// (`EMBEDDING_PROVIDER`, `EMBED_MODEL`, `EMBED_DIM`,
    /// `EMBED_BATCH_MAX`, `VECTOR_STORE_TYPE`, `COLLECTION`,
    /// `CHUNK_SIZE`, `CHUNK_OVERLAP`, `CHUNKING_TYPE`,
    /// `PARALLEL_ENABLED`, `PARALLEL_MAX_WORKERS`,
    /// `PARALLEL_CHUNK_SIZE`, `INCREMENTAL_ENABLED`,
    /// `FORCE_REPROCESS_THRESHOLD`, `W_VECTOR`, `W_LEXICAL`,
    /// `RERANK_MODEL`, `RERANK_TOP_N`, `TASK_TIME_LIMIT`,
    /// `TASK_SOFT_TIME_LIMIT`). Unparseable values are ignored.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("EMBEDDING_PROVIDER") {
            config.embedding.provider = match v.to_ascii_lowercase().as_str() {
                "openai" => EmbeddingProvider::Openai,
                "dashscope" => EmbeddingProvider::Dashscope,
                "custom" => EmbeddingProvider::Custom,
                _ => EmbeddingProvider::Hash,
            };
        }
        if let Ok(v) = std::env::var("EMBED_MODEL") {
            config.embedding.model = v;
        }
        if let Ok(v) = env_parse::<usize>("EMBED_DIM") {
            config.embedding.dimensions = v;
        }
        if let Ok(v) = env_parse::<usize>("EMBED_BATCH_MAX") {
            config.embedding.batch_max = v;
        }
        if let Ok(v) = std::env::var("EMBED_API_KEY") {
            config.embedding.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("EMBED_BASE_URL") {
            config.embedding.base_url = Some(v);
        }

        if let Ok(v) = std::env::var("VECTOR_STORE_TYPE") {
            config.index.store_type = match v.to_ascii_lowercase().as_str() {
                "sqlite" => VectorStoreType::Sqlite,
                "milvus" => VectorStoreType::Milvus,
                "elasticsearch" => VectorStoreType::Elasticsearch,
                "faiss" => VectorStoreType::Faiss,
                "qdrant" => VectorStoreType::Qdrant,
                _ => VectorStoreType::Memory,
            };
        }
        if let Ok(v) = std::env::var("COLLECTION") {
            config.index.collection = v;
        }

        if let Ok(v) = env_parse::<usize>("CHUNK_SIZE") {
            config.chunking.chunk_size = v;
        }
        if let Ok(v) = env_parse::<usize>("CHUNK_OVERLAP") {
            config.chunking.chunk_overlap = v;
        }
        if let Ok(v) = std::env::var("CHUNKING_TYPE")
            && let Some(kind) = ChunkingKind::parse(&v)
        {
            config.chunking.chunking_type = kind;
        }

        if let Ok(v) = env_parse::<bool>("PARALLEL_ENABLED") {
            config.parallel.enabled = v;
        }
        if let Ok(v) = env_parse::<usize>("PARALLEL_MAX_WORKERS") {
            config.parallel.max_workers = v;
        }
        if let Ok(v) = env_parse::<usize>("PARALLEL_CHUNK_SIZE") {
            config.parallel.segment_size = v;
        }

        if let Ok(v) = env_parse::<bool>("INCREMENTAL_ENABLED") {
            config.incremental.enabled = v;
        }
        if let Ok(v) = env_parse::<f64>("FORCE_REPROCESS_THRESHOLD") {
            config.incremental.force_reprocess_threshold = v;
        }

        if let Ok(v) = env_parse::<f64>("W_VECTOR") {
            config.retrieval.w_vector = v;
        }
        if let Ok(v) = env_parse::<f64>("W_LEXICAL") {
            config.retrieval.w_lexical = v;
        }
        if let Ok(v) = std::env::var("RERANK_MODEL") {
            config.retrieval.rerank_model = v;
        }
        if let Ok(v) = env_parse::<usize>("RERANK_TOP_N") {
            config.retrieval.rerank_top_n = v;
        }

        if let Ok(v) = env_parse::<u64>("TASK_TIME_LIMIT") {
            config.broker.task_time_limit = v;
        }
        if let Ok(v) = env_parse::<u64>("TASK_SOFT_TIME_LIMIT") {
            config.broker.task_soft_time_limit = v;
        }

        config
    }

    /// Validates cross-field consistency.
    pub fn validate(&self) -> Result<()> {
        if self.embedding.dimensions == 0 {
            return Err(Error::Config {
                message: "embedding dimensions must be > 0".to_string(),
            });
        }
        if self.embedding.batch_max == 0 {
            return Err(Error::Config {
                message: "embedding batch_max must be > 0".to_string(),
            });
        }
        for (name, w) in [
            ("w_vector", self.retrieval.w_vector),
            ("w_lexical", self.retrieval.w_lexical),
        ] {
            if !(0.0..=1.0).contains(&w) {
                return Err(Error::Config {
                    message: format!("{name} must be within [0, 1], got {w}"),
                });
            }
        }
        let threshold = self.incremental.force_reprocess_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(Error::Config {
                message: format!(
                    "force_reprocess_threshold must be within [0, 1], got {threshold}"
                ),
            });
        }
        if self.broker.task_soft_time_limit > self.broker.task_time_limit {
            return Err(Error::Config {
                message: "soft time limit must not exceed the hard time limit".to_string(),
            });
        }
        if self.parallel.segment_size == 0 {
            return Err(Error::Config {
                message: "segment_size must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

/// Worker pool size: CPU count capped at 8.
fn default_worker_count() -> usize {
    std::thread::available_parallelism().map_or(4, |n| n.get().min(8))
}

fn env_parse<T: std::str::FromStr>(key: &str) -> std::result::Result<T, ()> {
    std::env::var(key)
        .map_err(|_| ())
        .and_then(|v| v.parse::<T>().map_err(|_| ()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.embedding.dimensions, 384);
        assert_eq!(config.retrieval.w_vector, 0.7);
        assert_eq!(config.retrieval.w_lexical, 0.3);
        assert_eq!(config.incremental.force_reprocess_threshold, 0.5);
    }

    #[test]
    fn test_validate_rejects_zero_dimensions() {
        let mut config = Config::default();
        config.embedding.dimensions = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_weights() {
        let mut config = Config::default();
        config.retrieval.w_vector = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.retrieval.w_lexical = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let mut config = Config::default();
        config.incremental.force_reprocess_threshold = 1.2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_time_limits() {
        let mut config = Config::default();
        config.broker.task_soft_time_limit = config.broker.task_time_limit + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"retrieval": {"w_vector": 0.5, "w_lexical": 0.5}}"#).unwrap();
        assert_eq!(config.retrieval.w_vector, 0.5);
        assert_eq!(config.embedding.dimensions, 384);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_worker_count_bounded() {
        let n = default_worker_count();
        assert!(n >= 1);
        assert!(n <= 8);
    }
}
