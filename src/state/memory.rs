//! In-memory state store for tests and embedded use.

use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;

use crate::core::{Document, DocumentStatus};
use crate::error::StateError;
use crate::state::{DocumentState, StateStats, StateStore};

/// In-memory implementation of [`StateStore`].
#[derive(Default)]
pub struct MemoryStateStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    documents: BTreeMap<String, Document>,
    states: BTreeMap<String, DocumentState>,
    locks: HashSet<String>,
}

impl MemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>, StateError> {
        self.inner
            .read()
            .map_err(|_| StateError::Database("state lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Inner>, StateError> {
        self.inner
            .write()
            .map_err(|_| StateError::Database("state lock poisoned".to_string()))
    }
}

impl StateStore for MemoryStateStore {
    fn init(&self) -> Result<(), StateError> {
        Ok(())
    }

    fn put_document(&self, doc: &Document) -> Result<(), StateError> {
        self.write()?
            .documents
            .insert(doc.doc_id.clone(), doc.clone());
        Ok(())
    }

    fn get_document(&self, doc_id: &str) -> Result<Option<Document>, StateError> {
        Ok(self.read()?.documents.get(doc_id).cloned())
    }

    fn list_documents(&self) -> Result<Vec<Document>, StateError> {
        Ok(self.read()?.documents.values().cloned().collect())
    }

    fn delete_document(&self, doc_id: &str) -> Result<(), StateError> {
        let mut inner = self.write()?;
        inner.documents.remove(doc_id);
        inner.states.remove(doc_id);
        inner.locks.remove(doc_id);
        Ok(())
    }

    fn compare_and_set_status(
        &self,
        doc_id: &str,
        expected: Option<DocumentStatus>,
        next: DocumentStatus,
    ) -> Result<bool, StateError> {
        let mut inner = self.write()?;
        match inner.documents.get_mut(doc_id) {
            Some(doc) if expected.is_none_or(|e| doc.status == e) => {
                doc.status = next;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn save_state(&self, state: &DocumentState) -> Result<(), StateError> {
        self.write()?
            .states
            .insert(state.doc_id.clone(), state.clone());
        Ok(())
    }

    fn load_state(&self, doc_id: &str) -> Result<Option<DocumentState>, StateError> {
        Ok(self.read()?.states.get(doc_id).cloned())
    }

    fn delete_state(&self, doc_id: &str) -> Result<(), StateError> {
        self.write()?.states.remove(doc_id);
        Ok(())
    }

    fn try_lock(&self, doc_id: &str) -> Result<bool, StateError> {
        Ok(self.write()?.locks.insert(doc_id.to_string()))
    }

    fn unlock(&self, doc_id: &str) -> Result<(), StateError> {
        self.write()?.locks.remove(doc_id);
        Ok(())
    }

    fn stats(&self) -> Result<StateStats, StateError> {
        let inner = self.read()?;
        Ok(StateStats {
            document_count: inner.documents.len(),
            state_count: inner.states.len(),
            held_locks: inner.locks.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_crud() {
        let store = MemoryStateStore::new();
        store.init().unwrap();

        let doc = Document::new("doc-1", "a.md");
        store.put_document(&doc).unwrap();
        assert_eq!(store.get_document("doc-1").unwrap(), Some(doc));

        store.delete_document("doc-1").unwrap();
        assert_eq!(store.get_document("doc-1").unwrap(), None);
    }

    #[test]
    fn test_cas_on_missing_document() {
        let store = MemoryStateStore::new();
        assert!(
            !store
                .compare_and_set_status("ghost", None, DocumentStatus::Failed)
                .unwrap()
        );
    }

    #[test]
    fn test_cas_expected_mismatch() {
        let store = MemoryStateStore::new();
        store.put_document(&Document::new("doc-1", "a.md")).unwrap();
        assert!(
            !store
                .compare_and_set_status(
                    "doc-1",
                    Some(DocumentStatus::Completed),
                    DocumentStatus::Failed,
                )
                .unwrap()
        );
    }

    #[test]
    fn test_lock_cycle() {
        let store = MemoryStateStore::new();
        assert!(store.try_lock("doc-1").unwrap());
        assert!(!store.try_lock("doc-1").unwrap());
        store.unlock("doc-1").unwrap();
        assert!(store.try_lock("doc-1").unwrap());
    }

    #[test]
    fn test_delete_document_clears_lock_and_state() {
        let store = MemoryStateStore::new();
        store.put_document(&Document::new("doc-1", "a.md")).unwrap();
        store.try_lock("doc-1").unwrap();
        store
            .save_state(&DocumentState {
                doc_id: "doc-1".to_string(),
                file_hash: "h".to_string(),
                chunk_hashes: vec![],
                chunk_ids: vec![],
                last_processed_at: 0,
                metadata_snapshot: BTreeMap::new(),
            })
            .unwrap();

        store.delete_document("doc-1").unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.document_count, 0);
        assert_eq!(stats.state_count, 0);
        assert_eq!(stats.held_locks, 0);
    }
}
