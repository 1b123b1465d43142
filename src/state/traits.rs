//! State store trait definition.
//!
//! Defines the interface for document/state persistence backends. All
//! mutations of document records and ingest state go through this
//! owner; other components hold ids only.

use serde::Serialize;

use crate::core::{Document, DocumentStatus};
use crate::error::StateError;
use crate::state::DocumentState;

/// Trait for document metadata and ingest-state backends.
///
/// Implementations use interior mutability so a shared `Arc` can be
/// used from concurrent tasks. Calls are short and synchronous; async
/// callers invoke them between suspension points.
pub trait StateStore: Send + Sync {
    /// Initializes the backend (creates schema, runs migrations).
    ///
    /// Idempotent: safe to call multiple times.
    fn init(&self) -> Result<(), StateError>;

    // ==================== Document Operations ====================

    /// Inserts or replaces a document record.
    fn put_document(&self, doc: &Document) -> Result<(), StateError>;

    /// Retrieves a document by id.
    fn get_document(&self, doc_id: &str) -> Result<Option<Document>, StateError>;

    /// Lists all document records.
    fn list_documents(&self) -> Result<Vec<Document>, StateError>;

    /// Deletes a document record.
    ///
    /// Also deletes its ingest state and lock row.
    fn delete_document(&self, doc_id: &str) -> Result<(), StateError>;

    /// Atomically transitions a document's status.
    ///
    /// When `expected` is `Some`, the transition only happens if the
    /// current status matches; returns whether the swap occurred.
    fn compare_and_set_status(
        &self,
        doc_id: &str,
        expected: Option<DocumentStatus>,
        next: DocumentStatus,
    ) -> Result<bool, StateError>;

    // ==================== Ingest State Operations ====================

    /// Saves ingest state, replacing any previous blob atomically.
    fn save_state(&self, state: &DocumentState) -> Result<(), StateError>;

    /// Loads ingest state for a document.
    fn load_state(&self, doc_id: &str) -> Result<Option<DocumentState>, StateError>;

    /// Deletes ingest state for a document.
    fn delete_state(&self, doc_id: &str) -> Result<(), StateError>;

    // ==================== Lock Operations ====================

    /// Attempts to acquire the per-document ingest lock.
    ///
    /// Returns `false` when the lock is already held.
    fn try_lock(&self, doc_id: &str) -> Result<bool, StateError>;

    /// Releases the per-document ingest lock.
    ///
    /// Releasing an unheld lock is a no-op.
    fn unlock(&self, doc_id: &str) -> Result<(), StateError>;

    // ==================== Utility Operations ====================

    /// Gets store statistics.
    fn stats(&self) -> Result<StateStats, StateError>;
}

/// State store statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StateStats {
    /// Number of document records.
    pub document_count: usize,
    /// Number of ingest-state blobs.
    pub state_count: usize,
    /// Number of currently held locks.
    pub held_locks: usize,
}
