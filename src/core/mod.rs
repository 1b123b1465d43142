//! Core domain types for docpipe.
//!
//! The data model is id-based: chunks reference documents by `doc_id`
//! and documents learn about their chunks through the index adapter,
//! never through pointer cycles.

mod document;
mod node;
mod plan;
mod segment;

pub use document::{Document, DocumentStatus, FileType};
pub use node::{BoundaryKind, ChunkNode, NodeMetadata, chunk_id};
pub use plan::{
    ChunkingKind, Complexity, DocumentFeatures, Language, PlanOverrides, ProcessingPlan,
};
pub use segment::Segment;
