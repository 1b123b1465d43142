//! SQLite-backed state store.

use rusqlite::{Connection, OptionalExtension, params};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use crate::core::{Document, DocumentStatus, FileType};
use crate::error::StateError;
use crate::state::schema::{CURRENT_SCHEMA_VERSION, GET_VERSION_SQL, SCHEMA_SQL, SET_VERSION_SQL};
use crate::state::{DocumentState, StateStats, StateStore};

/// Default database path relative to the working directory.
pub const DEFAULT_DB_PATH: &str = ".docpipe/state.db";

/// SQLite implementation of [`StateStore`].
///
/// The connection is guarded by a mutex; calls are short and the store
/// is shared via `Arc` between async tasks.
pub struct SqliteStateStore {
    conn: Mutex<Connection>,
}

impl SqliteStateStore {
    /// Opens (or creates) a state database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StateError> {
        if let Some(parent) = path.as_ref().parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| StateError::Database(format!("create dir: {e}")))?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Opens an in-memory database (tests).
    pub fn in_memory() -> Result<Self, StateError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StateError> {
        self.conn
            .lock()
            .map_err(|_| StateError::Database("connection mutex poisoned".to_string()))
    }

    fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
        let doc_id: String = row.get("doc_id")?;
        let source_path: String = row.get("source_path")?;
        let file_type: String = row.get("file_type")?;
        let metadata_json: String = row.get("metadata")?;
        let status: String = row.get("status")?;
        let size_bytes: i64 = row.get("size_bytes")?;
        let node_count: i64 = row.get("node_count")?;
        let last_processed_at: Option<i64> = row.get("last_processed_at")?;
        let error: Option<String> = row.get("error")?;

        let metadata: BTreeMap<String, String> =
            serde_json::from_str(&metadata_json).unwrap_or_default();

        Ok(Document {
            doc_id,
            source_path,
            file_type: FileType::parse(&file_type).unwrap_or(FileType::Other),
            metadata,
            status: DocumentStatus::parse(&status).unwrap_or(DocumentStatus::Pending),
            size_bytes: u64::try_from(size_bytes).unwrap_or(0),
            node_count: usize::try_from(node_count).unwrap_or(0),
            last_processed_at,
            error,
        })
    }
}

impl StateStore for SqliteStateStore {
    fn init(&self) -> Result<(), StateError> {
        let conn = self.lock_conn()?;
        conn.execute_batch(SCHEMA_SQL)?;
        conn.execute(SET_VERSION_SQL, params![CURRENT_SCHEMA_VERSION.to_string()])?;
        let _version: Option<String> = conn
            .query_row(GET_VERSION_SQL, [], |row| row.get(0))
            .optional()?;
        Ok(())
    }

    fn put_document(&self, doc: &Document) -> Result<(), StateError> {
        let metadata = serde_json::to_string(&doc.metadata)?;
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO documents
             (doc_id, source_path, file_type, metadata, status, size_bytes,
              node_count, last_processed_at, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                doc.doc_id,
                doc.source_path,
                doc.file_type.as_str(),
                metadata,
                doc.status.as_str(),
                i64::try_from(doc.size_bytes).unwrap_or(i64::MAX),
                i64::try_from(doc.node_count).unwrap_or(i64::MAX),
                doc.last_processed_at,
                doc.error,
            ],
        )?;
        Ok(())
    }

    fn get_document(&self, doc_id: &str) -> Result<Option<Document>, StateError> {
        let conn = self.lock_conn()?;
        let doc = conn
            .query_row(
                "SELECT * FROM documents WHERE doc_id = ?1",
                params![doc_id],
                Self::row_to_document,
            )
            .optional()?;
        Ok(doc)
    }

    fn list_documents(&self) -> Result<Vec<Document>, StateError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare("SELECT * FROM documents ORDER BY doc_id")?;
        let docs = stmt
            .query_map([], Self::row_to_document)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(docs)
    }

    fn delete_document(&self, doc_id: &str) -> Result<(), StateError> {
        let conn = self.lock_conn()?;
        conn.execute("DELETE FROM documents WHERE doc_id = ?1", params![doc_id])?;
        conn.execute(
            "DELETE FROM document_state WHERE doc_id = ?1",
            params![doc_id],
        )?;
        conn.execute(
            "DELETE FROM document_locks WHERE doc_id = ?1",
            params![doc_id],
        )?;
        Ok(())
    }

    fn compare_and_set_status(
        &self,
        doc_id: &str,
        expected: Option<DocumentStatus>,
        next: DocumentStatus,
    ) -> Result<bool, StateError> {
        let conn = self.lock_conn()?;
        let changed = if let Some(expected) = expected {
            conn.execute(
                "UPDATE documents SET status = ?1 WHERE doc_id = ?2 AND status = ?3",
                params![next.as_str(), doc_id, expected.as_str()],
            )?
        } else {
            conn.execute(
                "UPDATE documents SET status = ?1 WHERE doc_id = ?2",
                params![next.as_str(), doc_id],
            )?
        };
        Ok(changed > 0)
    }

    fn save_state(&self, state: &DocumentState) -> Result<(), StateError> {
        let chunk_hashes = serde_json::to_string(&state.chunk_hashes)?;
        let chunk_ids = serde_json::to_string(&state.chunk_ids)?;
        let metadata = serde_json::to_string(&state.metadata_snapshot)?;
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO document_state
             (doc_id, file_hash, chunk_hashes, chunk_ids, last_processed_at, metadata_snapshot)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                state.doc_id,
                state.file_hash,
                chunk_hashes,
                chunk_ids,
                state.last_processed_at,
                metadata,
            ],
        )?;
        Ok(())
    }

    fn load_state(&self, doc_id: &str) -> Result<Option<DocumentState>, StateError> {
        let conn = self.lock_conn()?;
        let row = conn
            .query_row(
                "SELECT doc_id, file_hash, chunk_hashes, chunk_ids,
                        last_processed_at, metadata_snapshot
                 FROM document_state WHERE doc_id = ?1",
                params![doc_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;

        row.map(
            |(doc_id, file_hash, hashes_json, ids_json, last_processed_at, meta_json)| {
                Ok(DocumentState {
                    doc_id,
                    file_hash,
                    chunk_hashes: serde_json::from_str(&hashes_json)?,
                    chunk_ids: serde_json::from_str(&ids_json)?,
                    last_processed_at,
                    metadata_snapshot: serde_json::from_str(&meta_json)?,
                })
            },
        )
        .transpose()
    }

    fn delete_state(&self, doc_id: &str) -> Result<(), StateError> {
        let conn = self.lock_conn()?;
        conn.execute(
            "DELETE FROM document_state WHERE doc_id = ?1",
            params![doc_id],
        )?;
        Ok(())
    }

    fn try_lock(&self, doc_id: &str) -> Result<bool, StateError> {
        let conn = self.lock_conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO document_locks (doc_id, acquired_at) VALUES (?1, ?2)",
            params![doc_id, chrono::Utc::now().timestamp()],
        )?;
        Ok(inserted > 0)
    }

    fn unlock(&self, doc_id: &str) -> Result<(), StateError> {
        let conn = self.lock_conn()?;
        conn.execute(
            "DELETE FROM document_locks WHERE doc_id = ?1",
            params![doc_id],
        )?;
        Ok(())
    }

    fn stats(&self) -> Result<StateStats, StateError> {
        let conn = self.lock_conn()?;
        let document_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM documents", [], |r| r.get(0))?;
        let state_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM document_state", [], |r| r.get(0))?;
        let held_locks: i64 =
            conn.query_row("SELECT COUNT(*) FROM document_locks", [], |r| r.get(0))?;
        Ok(StateStats {
            document_count: usize::try_from(document_count).unwrap_or(0),
            state_count: usize::try_from(state_count).unwrap_or(0),
            held_locks: usize::try_from(held_locks).unwrap_or(0),
        })
    }
}
