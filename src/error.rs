//! Error types for docpipe operations.
//!
//! This module provides the error hierarchy using `thiserror` for all
//! ingestion, chunking, embedding, indexing, broker and retrieval
//! operations. Errors that may succeed on retry report `is_transient()`
//! so retry loops can distinguish them from terminal failures.

use thiserror::Error;

/// Result type alias for docpipe operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for docpipe operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Document validation errors (unsupported type, empty input).
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Chunking errors (text segmentation).
    #[error("chunking error: {0}")]
    Chunking(#[from] ChunkingError),

    /// Embedding generation errors.
    #[error("embedding error: {0}")]
    Embed(#[from] EmbedError),

    /// Vector index errors.
    #[error("index error: {0}")]
    Index(#[from] IndexError),

    /// Document/state store errors.
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// Task broker errors.
    #[error("task error: {0}")]
    Task(#[from] TaskError),

    /// Pipeline execution errors.
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Retrieval errors.
    #[error("retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    /// I/O errors (file operations).
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Configuration errors.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },
}

impl Error {
    /// Returns whether this error may succeed on retry.
    ///
    /// Transient errors cover network and quota conditions on the
    /// embedding service, vector store and broker. Everything else is
    /// terminal for the current attempt.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Embed(e) => e.is_transient(),
            Self::Index(e) => e.is_transient(),
            Self::State(e) => e.is_transient(),
            Self::Task(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Returns whether this error is a cooperative cancellation.
    #[must_use]
    pub const fn is_canceled(&self) -> bool {
        matches!(
            self,
            Self::Task(TaskError::Canceled) | Self::Pipeline(PipelineError::Canceled)
        )
    }
}

/// Validation errors for document intake.
///
/// These are reported to the caller without retry.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// File type could not be determined and fallback text extraction failed.
    #[error("unsupported file type: {path}")]
    UnsupportedFileType {
        /// Path of the offending file.
        path: String,
    },

    /// Document contains no extractable text.
    #[error("empty document: {doc_id}")]
    EmptyDocument {
        /// Document identifier.
        doc_id: String,
    },

    /// Input is structurally malformed.
    #[error("malformed input: {reason}")]
    Malformed {
        /// Description of the malformation.
        reason: String,
    },
}

/// Chunking-specific errors for text segmentation.
#[derive(Error, Debug)]
pub enum ChunkingError {
    /// Invalid chunk configuration.
    #[error("invalid chunk configuration: {reason}")]
    InvalidConfig {
        /// Reason the configuration is invalid.
        reason: String,
    },

    /// Overlap exceeds chunk size.
    #[error("overlap {overlap} must be less than chunk size {size}")]
    OverlapTooLarge {
        /// Overlap size.
        overlap: usize,
        /// Chunk size.
        size: usize,
    },

    /// Chunk size exceeds maximum allowed.
    #[error("chunk size {size} exceeds maximum {max}")]
    ChunkTooLarge {
        /// Requested chunk size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Unknown chunking strategy name.
    #[error("unknown chunking strategy: {name}")]
    UnknownStrategy {
        /// Name of the unknown strategy.
        name: String,
    },

    /// Regex compilation error.
    #[error("regex error: {0}")]
    Regex(String),
}

/// Embedding service errors.
///
/// The transient/fatal split drives the retry policy: transient errors
/// are retried with exponential backoff, fatal errors fail the pipeline.
#[derive(Error, Debug)]
pub enum EmbedError {
    /// Network or quota condition; retry with backoff.
    #[error("transient embedding failure: {reason}")]
    Transient {
        /// Description of the failure.
        reason: String,
    },

    /// Terminal provider failure; no retry.
    #[error("fatal embedding failure: {reason}")]
    Fatal {
        /// Description of the failure.
        reason: String,
    },

    /// Provider returned vectors of the wrong dimension.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Configured dimension.
        expected: usize,
        /// Dimension returned by the provider.
        actual: usize,
    },

    /// Batch exceeds the provider limit.
    #[error("batch of {len} texts exceeds provider maximum {max}")]
    BatchTooLarge {
        /// Number of texts submitted.
        len: usize,
        /// Provider maximum.
        max: usize,
    },

    /// Retries exhausted on a transient failure.
    #[error("embedding retries exhausted after {attempts} attempts: {reason}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Last transient failure.
        reason: String,
    },
}

impl EmbedError {
    /// Returns whether this error may succeed on retry.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Vector index errors.
#[derive(Error, Debug)]
pub enum IndexError {
    /// Network or availability condition; retry with backoff.
    #[error("transient index failure: {reason}")]
    Transient {
        /// Description of the failure.
        reason: String,
    },

    /// Schema violation or other terminal backend failure.
    #[error("fatal index failure: {reason}")]
    Fatal {
        /// Description of the failure.
        reason: String,
    },

    /// Collection dimension does not match the configured embedder.
    #[error("collection {collection} has dimension {actual}, expected {expected}")]
    DimensionMismatch {
        /// Collection name.
        collection: String,
        /// Configured dimension.
        expected: usize,
        /// Collection dimension.
        actual: usize,
    },

    /// Collection missing and index management forbids creation.
    #[error("collection not found: {collection}")]
    CollectionNotFound {
        /// Collection name.
        collection: String,
    },

    /// Filter uses operators the backend does not support.
    ///
    /// Unsupported filters are refused rather than silently approximated.
    #[error("unsupported filter: {reason}")]
    UnsupportedFilter {
        /// Description of the unsupported construct.
        reason: String,
    },
}

impl IndexError {
    /// Returns whether this error may succeed on retry.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Document/state store errors.
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection or query error.
    #[error("database error: {0}")]
    Database(String),

    /// Document not found by id.
    #[error("document not found: {doc_id}")]
    DocumentNotFound {
        /// Document identifier that was not found.
        doc_id: String,
    },

    /// Another ingest of the same document is in flight.
    ///
    /// Retryable by the caller once the holder completes.
    #[error("document busy: {doc_id}")]
    DocumentBusy {
        /// Document identifier whose lock is held.
        doc_id: String,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StateError {
    /// Returns whether this error may succeed on retry.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::DocumentBusy { .. })
    }
}

/// Task broker errors.
#[derive(Error, Debug)]
pub enum TaskError {
    /// Task not found by id.
    #[error("task not found: {task_id}")]
    NotFound {
        /// Task identifier.
        task_id: String,
    },

    /// Task handler failed.
    #[error("task failed: {message}")]
    Failed {
        /// Failure description from the handler.
        message: String,
    },

    /// Soft time limit reached; raised cooperatively inside the handler.
    #[error("soft time limit exceeded after {limit_secs}s")]
    SoftTimeout {
        /// Configured soft limit in seconds.
        limit_secs: u64,
    },

    /// Hard time limit reached; the task was aborted.
    #[error("hard time limit exceeded after {limit_secs}s")]
    HardTimeout {
        /// Configured hard limit in seconds.
        limit_secs: u64,
    },

    /// Cooperative cancellation observed by the handler.
    #[error("task canceled")]
    Canceled,

    /// Broker transport failure; retry with backoff.
    #[error("transient broker failure: {reason}")]
    Transient {
        /// Description of the failure.
        reason: String,
    },

    /// Task result has expired or was never stored.
    #[error("result not available for task: {task_id}")]
    ResultUnavailable {
        /// Task identifier.
        task_id: String,
    },
}

impl TaskError {
    /// Returns whether this error may succeed on retry.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::SoftTimeout { .. })
    }
}

/// Pipeline execution errors.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A stage failed; carries the stage name and offending ordinal when known.
    #[error("stage {stage} failed{}: {source}", ordinal.map_or_else(String::new, |o| format!(" at chunk {o}")))]
    Stage {
        /// Name of the failing stage.
        stage: &'static str,
        /// Chunk or segment ordinal where the failure occurred.
        ordinal: Option<usize>,
        /// Underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// A segment task failed after retries.
    #[error("segment {segment} of {total} failed: {reason}")]
    SegmentFailed {
        /// Zero-based segment ordinal.
        segment: usize,
        /// Total number of segments.
        total: usize,
        /// Failure description.
        reason: String,
    },

    /// Merged segment ordinals do not tile the document.
    #[error("ordinals not contiguous: expected {expected} chunks, found {found}")]
    OrdinalGap {
        /// Expected chunk count.
        expected: usize,
        /// Observed chunk count.
        found: usize,
    },

    /// No processor registered for the file type.
    #[error("no processor registered for stage {stage} and file type {file_type}")]
    NoProcessor {
        /// Stage name.
        stage: &'static str,
        /// File type in question.
        file_type: String,
    },

    /// Cooperative cancellation.
    #[error("pipeline canceled")]
    Canceled,
}

/// Retrieval errors.
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// Query is empty or exceeds the length limit.
    #[error("invalid query: {reason}")]
    InvalidQuery {
        /// Why the query was rejected.
        reason: String,
    },
}

/// I/O-specific errors for file operations.
#[derive(Error, Debug)]
pub enum IoError {
    /// File not found.
    #[error("file not found: {path}")]
    FileNotFound {
        /// Path to the file that was not found.
        path: String,
    },

    /// Failed to read file.
    #[error("failed to read file: {path}: {reason}")]
    ReadFailed {
        /// Path to the file.
        path: String,
        /// Reason for failure.
        reason: String,
    },

    /// Memory mapping error.
    #[error("memory mapping failed: {path}: {reason}")]
    MmapFailed {
        /// Path to the file.
        path: String,
        /// Reason for failure.
        reason: String,
    },

    /// Generic I/O error wrapper.
    #[error("I/O error: {0}")]
    Generic(String),
}

// Implement From traits for standard library and dependency errors

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(IoError::Generic(err.to_string()))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::State(StateError::Database(err.to_string()))
    }
}

impl From<rusqlite::Error> for StateError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<regex::Error> for ChunkingError {
    fn from(err: regex::Error) -> Self {
        Self::Regex(err.to_string())
    }
}

impl From<reqwest::Error> for EmbedError {
    fn from(err: reqwest::Error) -> Self {
        // Connection-level and 5xx/429 failures are worth retrying;
        // everything else (4xx, decode) is terminal.
        let transient = err.is_timeout()
            || err.is_connect()
            || err.status().is_some_and(|s| {
                s.is_server_error() || s == reqwest::StatusCode::TOO_MANY_REQUESTS
            });
        if transient {
            Self::Transient {
                reason: err.to_string(),
            }
        } else {
            Self::Fatal {
                reason: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Config {
            message: "bad weights".to_string(),
        };
        assert_eq!(err.to_string(), "configuration error: bad weights");
    }

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::UnsupportedFileType {
            path: "a.bin".to_string(),
        };
        assert_eq!(err.to_string(), "unsupported file type: a.bin");

        let err = ValidationError::EmptyDocument {
            doc_id: "doc-1".to_string(),
        };
        assert_eq!(err.to_string(), "empty document: doc-1");
    }

    #[test]
    fn test_chunking_error_display() {
        let err = ChunkingError::OverlapTooLarge {
            overlap: 100,
            size: 50,
        };
        assert_eq!(
            err.to_string(),
            "overlap 100 must be less than chunk size 50"
        );
    }

    #[test]
    fn test_embed_transient_classification() {
        let err = EmbedError::Transient {
            reason: "quota".to_string(),
        };
        assert!(err.is_transient());
        assert!(Error::from(err).is_transient());

        let err = EmbedError::Fatal {
            reason: "bad model".to_string(),
        };
        assert!(!err.is_transient());

        let err = EmbedError::DimensionMismatch {
            expected: 384,
            actual: 768,
        };
        assert!(!err.is_transient());
        assert!(err.to_string().contains("384"));
    }

    #[test]
    fn test_index_transient_classification() {
        assert!(
            IndexError::Transient {
                reason: "connection reset".to_string()
            }
            .is_transient()
        );
        assert!(
            !IndexError::UnsupportedFilter {
                reason: "range".to_string()
            }
            .is_transient()
        );
    }

    #[test]
    fn test_document_busy_is_transient() {
        let err = StateError::DocumentBusy {
            doc_id: "doc-1".to_string(),
        };
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "document busy: doc-1");
    }

    #[test]
    fn test_task_error_variants() {
        let err = TaskError::SoftTimeout { limit_secs: 30 };
        assert!(err.is_transient());
        assert!(err.to_string().contains("30"));

        let err = TaskError::HardTimeout { limit_secs: 60 };
        assert!(!err.is_transient());

        assert!(Error::from(TaskError::Canceled).is_canceled());
    }

    #[test]
    fn test_pipeline_stage_error_display() {
        let err = PipelineError::Stage {
            stage: "embed",
            ordinal: Some(5),
            source: Box::new(Error::from(EmbedError::Fatal {
                reason: "boom".to_string(),
            })),
        };
        let msg = err.to_string();
        assert!(msg.contains("embed"));
        assert!(msg.contains("chunk 5"));

        let err = PipelineError::Stage {
            stage: "validate",
            ordinal: None,
            source: Box::new(Error::Config {
                message: "x".to_string(),
            }),
        };
        assert!(!err.to_string().contains("chunk"));
    }

    #[test]
    fn test_retrieval_error_display() {
        let err = RetrievalError::InvalidQuery {
            reason: "empty".to_string(),
        };
        assert_eq!(err.to_string(), "invalid query: empty");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_from_rusqlite() {
        let err: Error = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, Error::State(StateError::Database(_))));
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err: serde_json::Error = serde_json::from_str::<i32>("nope").unwrap_err();
        let err: StateError = json_err.into();
        assert!(matches!(err, StateError::Serialization(_)));
    }

    #[test]
    fn test_ordinal_gap_display() {
        let err = PipelineError::OrdinalGap {
            expected: 12,
            found: 11,
        };
        assert!(err.to_string().contains("12"));
        assert!(err.to_string().contains("11"));
    }
}
