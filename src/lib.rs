//! # docpipe
//!
//! Document ingestion and hybrid semantic retrieval engine.
//!
//! docpipe analyzes heterogeneous source documents, segments them with
//! structure-aware chunkers, embeds and persists the chunks into a
//! vector index, and answers queries with a hybrid of dense-vector
//! similarity and lexical matching.
//!
//! ## Features
//!
//! - **Adaptive analysis**: per-document processing plans from
//!   structural features and complexity
//! - **Chunker family**: fixed, semantic, recursive-markdown and
//!   code-aware strategies under one boundary-priority model
//! - **Parallel ingestion**: large documents fan out into segment
//!   tasks with rollback on failure
//! - **Incremental updates**: content-hash deltas reprocess only the
//!   changed chunks
//! - **Hybrid retrieval**: weighted fusion of normalized dense and
//!   lexical scores with an optional reranking pass

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
// Note: unsafe is needed for memory-mapped I/O (memmap2)
#![warn(unsafe_code)]

pub mod analyzer;
pub mod broker;
pub mod chunking;
pub mod cli;
pub mod config;
pub mod core;
pub mod embedding;
pub mod error;
pub mod executor;
pub mod incremental;
pub mod index;
pub mod io;
pub mod pipeline;
pub mod retrieval;
pub mod service;
pub mod state;

// Re-export commonly used types at crate root
pub use error::{Error, Result};

// Re-export core domain types
pub use core::{
    BoundaryKind, ChunkNode, ChunkingKind, Complexity, Document, DocumentFeatures, DocumentStatus,
    FileType, Language, NodeMetadata, PlanOverrides, ProcessingPlan, Segment, chunk_id,
};

// Re-export configuration
pub use config::{Config, EmbeddingProvider, IndexManagement, VectorStoreType};

// Re-export the service facade
pub use service::IngestService;

// Re-export chunking types
pub use chunking::{ChunkParams, ChunkPiece, Chunker, available_strategies, create_chunker};

// Re-export embedding types
pub use embedding::{
    DEFAULT_DIMENSIONS, Embedder, EmbeddingClient, FallbackEmbedder, cosine_similarity,
    create_embedder,
};

// Re-export index types
pub use index::{Filter, MemoryIndex, SearchHit, SqliteIndex, VectorIndex, create_index};

// Re-export state types
pub use state::{DocumentState, MemoryStateStore, SqliteStateStore, StateStore};

// Re-export broker types
pub use broker::{TaskBroker, TaskOptions, TaskRecord, TaskState};

// Re-export retrieval types
pub use retrieval::{HybridRetriever, RetrievalResult, SearchFlags};
