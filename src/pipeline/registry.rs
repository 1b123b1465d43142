//! Explicit processor registry.
//!
//! Maps a processor name to a factory and its declared supported file
//! types, populated once at startup. No runtime reflection: unknown
//! names and unsupported file types are hard errors.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::FileType;
use crate::error::{PipelineError, Result};
use crate::pipeline::ProcessingContext;

/// One pipeline stage.
///
/// Processors receive the context by exclusive reference, mutate it,
/// and return; the engine owns ordering and error attribution.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Stage name used for registration and error reporting.
    fn name(&self) -> &'static str;

    /// Runs the stage.
    async fn run(&self, ctx: &mut ProcessingContext) -> Result<()>;
}

type ProcessorFactory = Box<dyn Fn() -> Arc<dyn Processor> + Send + Sync>;

struct RegistryEntry {
    factory: ProcessorFactory,
    /// `None` means all file types.
    file_types: Option<Vec<FileType>>,
}

/// Registry of processors keyed by name.
#[derive(Default)]
pub struct ProcessorRegistry {
    entries: HashMap<String, RegistryEntry>,
}

impl ProcessorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a processor factory under a name.
    ///
    /// `file_types: None` declares support for every file type.
    pub fn register<F>(&mut self, name: &str, file_types: Option<Vec<FileType>>, factory: F)
    where
        F: Fn() -> Arc<dyn Processor> + Send + Sync + 'static,
    {
        self.entries.insert(
            name.to_string(),
            RegistryEntry {
                factory: Box::new(factory),
                file_types,
            },
        );
    }

    /// Creates the processor registered under `name` for a file type.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NoProcessor`] when the name is unknown
    /// or the processor does not declare the file type.
    pub fn create(&self, name: &'static str, file_type: FileType) -> Result<Arc<dyn Processor>> {
        let entry = self.entries.get(name).ok_or(PipelineError::NoProcessor {
            stage: name,
            file_type: file_type.as_str().to_string(),
        })?;
        if let Some(types) = &entry.file_types
            && !types.contains(&file_type)
        {
            return Err(PipelineError::NoProcessor {
                stage: name,
                file_type: file_type.as_str().to_string(),
            }
            .into());
        }
        Ok((entry.factory)())
    }

    /// Lists registered processor names.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopProcessor;

    #[async_trait]
    impl Processor for NoopProcessor {
        fn name(&self) -> &'static str {
            "noop"
        }

        async fn run(&self, _ctx: &mut ProcessingContext) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_register_and_create() {
        let mut registry = ProcessorRegistry::new();
        registry.register("noop", None, || Arc::new(NoopProcessor));

        let processor = registry.create("noop", FileType::Markdown).unwrap();
        assert_eq!(processor.name(), "noop");
    }

    #[test]
    fn test_unknown_name() {
        let registry = ProcessorRegistry::new();
        let result = registry.create("ghost", FileType::Text);
        assert!(matches!(
            result,
            Err(crate::error::Error::Pipeline(PipelineError::NoProcessor { .. }))
        ));
    }

    #[test]
    fn test_file_type_declaration_enforced() {
        let mut registry = ProcessorRegistry::new();
        registry.register("md-only", Some(vec![FileType::Markdown]), || {
            Arc::new(NoopProcessor)
        });

        assert!(registry.create("md-only", FileType::Markdown).is_ok());
        assert!(registry.create("md-only", FileType::Code).is_err());
    }

    #[test]
    fn test_names_sorted() {
        let mut registry = ProcessorRegistry::new();
        registry.register("b", None, || Arc::new(NoopProcessor));
        registry.register("a", None, || Arc::new(NoopProcessor));
        assert_eq!(registry.names(), vec!["a", "b"]);
    }
}
