//! Ingestion and retrieval service facade.
//!
//! Wires the analyzer, pipeline engine, broker, incremental manager and
//! retriever behind the narrow surface the API layer consumes:
//! `ingest`, `analyze`, `status`, `delete`, `search`, `cancel`.
//! Singletons (broker, embedder, index adapter) are created once at
//! startup and torn down in reverse order at shutdown; everything is
//! injectable for tests.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::{error, info, instrument, warn};

use crate::analyzer::DocumentAnalyzer;
use crate::broker::{TaskBroker, TaskRecord, TaskState, queues};
use crate::config::Config;
use crate::core::{
    Document, DocumentFeatures, DocumentStatus, FileType, PlanOverrides, ProcessingPlan,
};
use crate::embedding::{Embedder, EmbeddingClient, create_embedder};
use crate::error::{Error, Result, StateError};
use crate::index::{Filter, MemoryIndex, VectorIndex};
use crate::io::FileReader;
use crate::pipeline::{PipelineEngine, StageOutcome};
use crate::retrieval::{HybridRetriever, RetrievalResult, SearchFlags};
use crate::state::{DocumentLock, MemoryStateStore, StateStore};

struct ServiceInner {
    config: Config,
    state: Arc<dyn StateStore>,
    index: Arc<dyn VectorIndex>,
    embedder: EmbeddingClient,
    broker: TaskBroker,
    analyzer: DocumentAnalyzer,
    engine: PipelineEngine,
    retriever: HybridRetriever,
    /// Per-document ingest locks held for the duration of processing.
    locks: Mutex<HashMap<String, DocumentLock>>,
    /// Active ingest task per document.
    active: Mutex<HashMap<String, String>>,
}

/// Document ingestion and retrieval service.
///
/// Cloning is cheap; all clones share the same stores and broker.
#[derive(Clone)]
pub struct IngestService {
    inner: Arc<ServiceInner>,
}

impl IngestService {
    /// Creates a service over injected backends.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the config is inconsistent.
    pub fn new(
        config: Config,
        state: Arc<dyn StateStore>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        config.validate()?;

        let embedder = EmbeddingClient::new(embedder, config.embedding.max_retries);
        let broker = TaskBroker::new(config.broker.clone());
        let analyzer = DocumentAnalyzer::new(config.clone());
        let engine = PipelineEngine::new(
            &config,
            Arc::clone(&state),
            Arc::clone(&index),
            embedder.clone(),
            broker.clone(),
        );
        let retriever = HybridRetriever::new(
            embedder.clone(),
            Arc::clone(&index),
            config.retrieval.clone(),
        );

        Ok(Self {
            inner: Arc::new(ServiceInner {
                config,
                state,
                index,
                embedder,
                broker,
                analyzer,
                engine,
                retriever,
                locks: Mutex::new(HashMap::new()),
                active: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Creates a fully in-memory service from configuration.
    ///
    /// Uses the configured embedding provider with the bundled memory
    /// state store and index; the default configuration runs entirely
    /// offline.
    pub fn in_memory(config: Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        Self::new(
            config,
            Arc::new(MemoryStateStore::new()),
            Arc::new(MemoryIndex::new()),
            embedder,
        )
    }

    /// Initializes the backends: schema, collection, dimension check.
    ///
    /// Dimension mismatch between the embedder and the configured index
    /// is fatal here, before any document is accepted.
    pub async fn startup(&self) -> Result<()> {
        let inner = &self.inner;
        inner.state.init()?;

        let dims = inner.config.embedding.dimensions;
        if inner.embedder.dimensions() != dims {
            return Err(Error::Config {
                message: format!(
                    "embedder produces {} dimensions but EMBED_DIM is {dims}",
                    inner.embedder.dimensions()
                ),
            });
        }
        inner
            .index
            .ensure_collection(
                &inner.config.index.collection,
                dims,
                inner.config.index.management,
            )
            .await?;

        info!(
            collection = %inner.config.index.collection,
            dimensions = dims,
            "service started"
        );
        Ok(())
    }

    /// Drains outstanding tasks and releases resources.
    pub async fn shutdown(&self) {
        self.inner.broker.drain().await;
        info!("service stopped");
    }

    /// Analyzes a file and returns the features and selected plan.
    pub fn analyze(&self, path: &Path) -> Result<(DocumentFeatures, ProcessingPlan)> {
        self.inner.analyzer.analyze_path(path)
    }

    /// Submits a document for ingestion, returning the ingest task id.
    ///
    /// A second ingest of the same document while one is in flight
    /// fails with [`StateError::DocumentBusy`].
    #[instrument(skip_all, fields(doc_id = %doc_id))]
    pub fn ingest(
        &self,
        doc_id: &str,
        path: &Path,
        metadata: BTreeMap<String, String>,
        overrides: Option<PlanOverrides>,
    ) -> Result<String> {
        let inner = &self.inner;
        let lock = DocumentLock::acquire(Arc::clone(&inner.state), doc_id)?;

        let mut document = Document::new(doc_id, path.to_string_lossy()).with_metadata(metadata);
        document.status = DocumentStatus::Pending;
        inner.state.put_document(&document)?;

        let task_id = self.submit_ingest_task(doc_id, overrides);

        if let Ok(mut locks) = inner.locks.lock() {
            locks.insert(doc_id.to_string(), lock);
        }
        if let Ok(mut active) = inner.active.lock() {
            active.insert(doc_id.to_string(), task_id.clone());
        }

        self.spawn_supervisor(doc_id.to_string(), task_id.clone());
        Ok(task_id)
    }

    fn submit_ingest_task(&self, doc_id: &str, overrides: Option<PlanOverrides>) -> String {
        let service = self.clone();
        let doc_id = doc_id.to_string();
        let opts = self.inner.broker.default_options();

        self.inner.broker.submit(
            &format!("ingest:{doc_id}"),
            queues::DOCUMENT_PROCESSING,
            opts,
            move |ctx| {
                let service = service.clone();
                let doc_id = doc_id.clone();
                let overrides = overrides.clone();
                async move {
                    service
                        .run_ingest(&doc_id, overrides.as_ref(), ctx.cancel_flag())
                        .await
                }
            },
        )
    }

    /// One ingest attempt: read, analyze, plan, run the pipeline.
    async fn run_ingest(
        &self,
        doc_id: &str,
        overrides: Option<&PlanOverrides>,
        cancel: Arc<crate::broker::CancelFlag>,
    ) -> Result<StageOutcome> {
        let inner = &self.inner;
        let mut document =
            inner
                .state
                .get_document(doc_id)?
                .ok_or_else(|| StateError::DocumentNotFound {
                    doc_id: doc_id.to_string(),
                })?;
        inner
            .state
            .compare_and_set_status(doc_id, None, DocumentStatus::Processing)?;
        document.status = DocumentStatus::Processing;

        let path = Path::new(&document.source_path);
        let reader = FileReader::open(path)?;
        document.size_bytes = reader.size();
        let raw = reader.read_to_bytes()?;
        let text = inner
            .analyzer
            .extract_text(path, document.file_type, &reader)?;

        let (_, mut plan) = inner
            .analyzer
            .analyze_text(document.file_type, &text, document.size_bytes);
        if let Some(name) = document.metadata.get("datasource") {
            plan.datasource_name.clone_from(name);
        }
        if let Some(overrides) = overrides {
            overrides.apply(&mut plan);
        }

        inner
            .engine
            .run(document, plan, raw, text, Some(cancel))
            .await
    }

    /// Watches an ingest task and settles the document afterwards.
    fn spawn_supervisor(&self, doc_id: String, task_id: String) {
        let service = self.clone();
        tokio::spawn(async move {
            let record = service.inner.broker.wait(&task_id).await;
            match record {
                Ok(record) => service.settle_document(&doc_id, &record),
                Err(e) => error!(doc_id = %doc_id, error = %e, "ingest supervisor lost its task"),
            }
            if let Ok(mut active) = service.inner.active.lock() {
                active.remove(&doc_id);
            }
            if let Ok(mut locks) = service.inner.locks.lock() {
                // Dropping the guard releases the per-document lock
                locks.remove(&doc_id);
            }
        });
    }

    /// Records the terminal document status for failed/canceled tasks.
    fn settle_document(&self, doc_id: &str, record: &TaskRecord) {
        let status = match record.state {
            TaskState::Succeeded => return, // engine already finalized
            TaskState::Canceled => DocumentStatus::Canceled,
            _ => DocumentStatus::Failed,
        };

        let result: Result<()> = (|| {
            let Some(mut document) = self.inner.state.get_document(doc_id)? else {
                return Ok(());
            };
            document.status = status;
            document.error = record.error.clone();
            self.inner.state.put_document(&document)?;
            Ok(())
        })();
        if let Err(e) = result {
            error!(doc_id, error = %e, "failed to settle document status");
        } else {
            warn!(doc_id, status = %status, error = ?record.error, "ingest did not complete");
        }
    }

    /// Returns the document record.
    pub fn status(&self, doc_id: &str) -> Result<Document> {
        self.inner
            .state
            .get_document(doc_id)?
            .ok_or_else(|| StateError::DocumentNotFound {
                doc_id: doc_id.to_string(),
            })
            .map_err(Error::from)
    }

    /// Lists all documents.
    pub fn list(&self) -> Result<Vec<Document>> {
        Ok(self.inner.state.list_documents()?)
    }

    /// Deletes a document: index chunks, state, and record.
    ///
    /// Fails with [`StateError::DocumentBusy`] while an ingest holds
    /// the lock.
    pub async fn delete(&self, doc_id: &str) -> Result<usize> {
        let inner = &self.inner;
        let lock = DocumentLock::acquire(Arc::clone(&inner.state), doc_id)?;
        let removed = inner.index.delete_by_doc(doc_id).await?;
        inner.state.delete_document(doc_id)?;
        // The lock row went with the document; releasing is a no-op
        let _ = lock.release();
        info!(doc_id, removed, "document deleted");
        Ok(removed)
    }

    /// Hybrid search over the index.
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&Filter>,
        flags: SearchFlags,
    ) -> Result<Vec<RetrievalResult>> {
        self.inner.retriever.search(query, top_k, filter, flags).await
    }

    /// Cancels an ingest by task id or document id.
    pub fn cancel(&self, target: &str) -> Result<TaskState> {
        let task_id = self
            .inner
            .active
            .lock()
            .ok()
            .and_then(|active| active.get(target).cloned());

        if let Some(task_id) = task_id {
            // Canceling a document: advertise the transition on the record
            let _ = self.inner.state.compare_and_set_status(
                target,
                Some(DocumentStatus::Processing),
                DocumentStatus::Canceling,
            );
            return Ok(self.inner.broker.cancel(&task_id)?);
        }
        Ok(self.inner.broker.cancel(target)?)
    }

    /// Waits until an ingest task reaches a terminal state.
    pub async fn wait_for_task(&self, task_id: &str) -> Result<TaskRecord> {
        Ok(self.inner.broker.wait(task_id).await?)
    }

    /// Returns a task record.
    pub fn task_status(&self, task_id: &str) -> Result<TaskRecord> {
        Ok(self.inner.broker.status(task_id)?)
    }

    /// The file type the service would assign to a path.
    #[must_use]
    pub fn detect_file_type(path: &Path) -> FileType {
        FileType::from_path(path)
    }
}
