//! Content hashing and the document state store.
//!
//! The state store owns `Document` records and per-document
//! `DocumentState` blobs, and provides the per-document lock that
//! serializes concurrent ingests of the same document. Content hashes
//! are SHA-256 hex digests, stable across processes and versions.

mod memory;
mod schema;
mod sqlite;
mod traits;

pub use memory::MemoryStateStore;
pub use sqlite::SqliteStateStore;
pub use traits::{StateStats, StateStore};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::StateError;

/// Computes the SHA-256 hex digest of raw bytes.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Computes the SHA-256 hex digest of a text chunk.
#[must_use]
pub fn hash_text(text: &str) -> String {
    hash_bytes(text.as_bytes())
}

/// Hashes a batch of chunk texts in parallel.
///
/// Output order matches input order.
#[must_use]
pub fn hash_chunks<S: AsRef<str> + Sync>(texts: &[S]) -> Vec<String> {
    texts
        .par_iter()
        .map(|t| hash_text(t.as_ref()))
        .collect()
}

/// Per-document ingest state used for delta detection.
///
/// Created on first successful ingest, replaced atomically on each
/// completed re-ingest, deleted on document purge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentState {
    /// Owning document.
    pub doc_id: String,

    /// SHA-256 of the source bytes.
    pub file_hash: String,

    /// Content hash per chunk, in ordinal order.
    pub chunk_hashes: Vec<String>,

    /// Persisted chunk ids, in ordinal order.
    pub chunk_ids: Vec<String>,

    /// Unix timestamp of the ingest that wrote this state.
    pub last_processed_at: i64,

    /// Document metadata as of that ingest.
    pub metadata_snapshot: BTreeMap<String, String>,
}

impl DocumentState {
    /// Returns the number of chunks recorded.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunk_ids.len()
    }
}

/// RAII handle for the per-document ingest lock.
///
/// Dropping the guard releases the lock best-effort; call
/// [`DocumentLock::release`] for an explicit, error-checked release.
pub struct DocumentLock {
    store: Arc<dyn StateStore>,
    doc_id: String,
    released: bool,
}

impl DocumentLock {
    /// Acquires the lock for a document.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::DocumentBusy`] when another ingest holds
    /// the lock.
    pub fn acquire(store: Arc<dyn StateStore>, doc_id: &str) -> Result<Self, StateError> {
        if store.try_lock(doc_id)? {
            Ok(Self {
                store,
                doc_id: doc_id.to_string(),
                released: false,
            })
        } else {
            Err(StateError::DocumentBusy {
                doc_id: doc_id.to_string(),
            })
        }
    }

    /// Returns the locked document id.
    #[must_use]
    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    /// Releases the lock explicitly.
    pub fn release(mut self) -> Result<(), StateError> {
        self.released = true;
        self.store.unlock(&self.doc_id)
    }
}

impl Drop for DocumentLock {
    fn drop(&mut self) {
        if !self.released {
            let _ = self.store.unlock(&self.doc_id);
        }
    }
}

impl std::fmt::Debug for DocumentLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentLock")
            .field("doc_id", &self.doc_id)
            .field("released", &self.released)
            .finish()
    }
}
