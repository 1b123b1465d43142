//! Database schema for the SQLite state store.

/// Current schema version.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// SQL schema for initial database setup.
pub const SCHEMA_SQL: &str = r"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_info (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Document records
CREATE TABLE IF NOT EXISTS documents (
    doc_id TEXT PRIMARY KEY,
    source_path TEXT NOT NULL,
    file_type TEXT NOT NULL,
    metadata TEXT NOT NULL,  -- JSON object
    status TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    node_count INTEGER NOT NULL,
    last_processed_at INTEGER,
    error TEXT
);

CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status);

-- Ingest state per document (hashes and chunk ids)
CREATE TABLE IF NOT EXISTS document_state (
    doc_id TEXT PRIMARY KEY,
    file_hash TEXT NOT NULL,
    chunk_hashes TEXT NOT NULL,  -- JSON array
    chunk_ids TEXT NOT NULL,     -- JSON array
    last_processed_at INTEGER NOT NULL,
    metadata_snapshot TEXT NOT NULL  -- JSON object
);

-- Per-document ingest locks
CREATE TABLE IF NOT EXISTS document_locks (
    doc_id TEXT PRIMARY KEY,
    acquired_at INTEGER NOT NULL
);
";

/// SQL to get schema version.
pub const GET_VERSION_SQL: &str = r"
SELECT value FROM schema_info WHERE key = 'version';
";

/// SQL to set schema version.
pub const SET_VERSION_SQL: &str = r"
INSERT OR REPLACE INTO schema_info (key, value) VALUES ('version', ?);
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_sql_not_empty() {
        assert!(!SCHEMA_SQL.is_empty());
        assert!(SCHEMA_SQL.contains("CREATE TABLE"));
        assert!(SCHEMA_SQL.contains("document_locks"));
    }

    #[test]
    fn test_schema_version() {
        const _: () = assert!(CURRENT_SCHEMA_VERSION >= 1);
    }
}
