//! Pipeline engine and processor composition.
//!
//! A pipeline is an ordered list of processors selected by document
//! type and plan. The engine enforces the stage order, surfaces the
//! first failure with the stage name and offending ordinal, routes
//! large documents to the segmented executor, and short-circuits
//! unchanged or lightly-edited re-ingests through the incremental
//! manager.

mod context;
mod engine;
mod processors;
mod registry;

pub use context::{ProcessingContext, StageOutcome, StageTiming};
pub use engine::PipelineEngine;
pub use processors::{
    ChunkProcessor, EmbedProcessor, FinalizeProcessor, IndexProcessor,
    MarkdownNormalizeProcessor, ValidateProcessor, assemble_nodes,
};
pub use registry::{Processor, ProcessorRegistry};
