//! SQLite vector index backend.
//!
//! Stores nodes with their embeddings as little-endian f32 blobs,
//! serves dense search by brute-force cosine similarity and lexical
//! search through an FTS5 table kept in sync by triggers. Suitable for
//! single-node deployments and the CLI; larger installations plug an
//! external engine into the same trait.

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Mutex;

use crate::config::IndexManagement;
use crate::core::{ChunkNode, NodeMetadata};
use crate::embedding::cosine_similarity;
use crate::error::IndexError;
use crate::index::{Filter, SearchHit, VectorIndex, term_spans, tokenize};

/// Index schema.
const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS collections (
    name TEXT PRIMARY KEY,
    dimensions INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS nodes (
    chunk_id TEXT PRIMARY KEY,
    doc_id TEXT NOT NULL,
    ordinal INTEGER NOT NULL,
    text TEXT NOT NULL,
    metadata TEXT NOT NULL,      -- JSON NodeMetadata
    content_hash TEXT NOT NULL,
    embedding BLOB NOT NULL,     -- f32 array, little-endian
    dimensions INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_nodes_doc ON nodes(doc_id);
CREATE INDEX IF NOT EXISTS idx_nodes_order ON nodes(doc_id, ordinal);

-- FTS5 for lexical search, synced by triggers
CREATE VIRTUAL TABLE IF NOT EXISTS nodes_fts USING fts5(
    text,
    content='nodes',
    content_rowid='rowid',
    tokenize='porter unicode61'
);

CREATE TRIGGER IF NOT EXISTS nodes_ai AFTER INSERT ON nodes BEGIN
    INSERT INTO nodes_fts(rowid, text) VALUES (new.rowid, new.text);
END;

CREATE TRIGGER IF NOT EXISTS nodes_ad AFTER DELETE ON nodes BEGIN
    INSERT INTO nodes_fts(nodes_fts, rowid, text) VALUES('delete', old.rowid, old.text);
END;
";

/// SQLite implementation of [`VectorIndex`].
pub struct SqliteIndex {
    conn: Mutex<Connection>,
}

impl SqliteIndex {
    /// Opens (or creates) an index database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, IndexError> {
        if let Some(parent) = path.as_ref().parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| IndexError::Fatal {
                reason: format!("create dir: {e}"),
            })?;
        }
        let conn = Connection::open(path).map_err(|e| IndexError::Fatal {
            reason: e.to_string(),
        })?;
        Self::init(conn)
    }

    /// Opens an in-memory index (tests).
    pub fn in_memory() -> Result<Self, IndexError> {
        let conn = Connection::open_in_memory().map_err(|e| IndexError::Fatal {
            reason: e.to_string(),
        })?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, IndexError> {
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| IndexError::Fatal {
                reason: format!("schema: {e}"),
            })?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, IndexError> {
        self.conn.lock().map_err(|_| IndexError::Fatal {
            reason: "connection mutex poisoned".to_string(),
        })
    }

    fn row_to_node(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChunkNode> {
        let chunk_id: String = row.get("chunk_id")?;
        let doc_id: String = row.get("doc_id")?;
        let ordinal: i64 = row.get("ordinal")?;
        let text: String = row.get("text")?;
        let metadata_json: String = row.get("metadata")?;
        let content_hash: String = row.get("content_hash")?;
        let bytes: Vec<u8> = row.get("embedding")?;

        let embedding: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        let metadata: NodeMetadata = serde_json::from_str(&metadata_json).unwrap_or_default();

        Ok(ChunkNode {
            chunk_id,
            doc_id,
            ordinal: usize::try_from(ordinal).unwrap_or(0),
            text,
            embedding,
            metadata,
            content_hash,
        })
    }
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn ensure_collection(
        &self,
        name: &str,
        dimensions: usize,
        management: IndexManagement,
    ) -> Result<(), IndexError> {
        if management == IndexManagement::NoValidation {
            return Ok(());
        }
        let conn = self.lock_conn()?;
        let existing: Option<i64> = conn
            .query_row(
                "SELECT dimensions FROM collections WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| IndexError::Fatal {
                reason: e.to_string(),
            })?;

        match existing {
            Some(dims) if usize::try_from(dims).unwrap_or(0) == dimensions => Ok(()),
            Some(dims) => Err(IndexError::DimensionMismatch {
                collection: name.to_string(),
                expected: dimensions,
                actual: usize::try_from(dims).unwrap_or(0),
            }),
            None => {
                conn.execute(
                    "INSERT INTO collections (name, dimensions) VALUES (?1, ?2)",
                    params![name, i64::try_from(dimensions).unwrap_or(0)],
                )
                .map_err(|e| IndexError::Fatal {
                    reason: e.to_string(),
                })?;
                Ok(())
            }
        }
    }

    async fn upsert(&self, nodes: &[ChunkNode]) -> Result<(), IndexError> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction().map_err(|e| IndexError::Transient {
            reason: e.to_string(),
        })?;
        {
            // Explicit delete keeps the FTS triggers in sync; INSERT OR
            // REPLACE would bypass the delete trigger.
            let mut delete = tx
                .prepare("DELETE FROM nodes WHERE chunk_id = ?1")
                .map_err(|e| IndexError::Fatal {
                    reason: e.to_string(),
                })?;
            let mut insert = tx
                .prepare(
                    "INSERT INTO nodes
                     (chunk_id, doc_id, ordinal, text, metadata, content_hash,
                      embedding, dimensions)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                )
                .map_err(|e| IndexError::Fatal {
                    reason: e.to_string(),
                })?;

            for node in nodes {
                let metadata =
                    serde_json::to_string(&node.metadata).map_err(|e| IndexError::Fatal {
                        reason: format!("metadata serialization: {e}"),
                    })?;
                let bytes: Vec<u8> = node
                    .embedding
                    .iter()
                    .flat_map(|f| f.to_le_bytes())
                    .collect();

                delete
                    .execute(params![node.chunk_id])
                    .map_err(|e| IndexError::Fatal {
                        reason: e.to_string(),
                    })?;
                insert
                    .execute(params![
                        node.chunk_id,
                        node.doc_id,
                        i64::try_from(node.ordinal).unwrap_or(i64::MAX),
                        node.text,
                        metadata,
                        node.content_hash,
                        bytes,
                        i64::try_from(node.embedding.len()).unwrap_or(0),
                    ])
                    .map_err(|e| IndexError::Fatal {
                        reason: e.to_string(),
                    })?;
            }
        }
        tx.commit().map_err(|e| IndexError::Transient {
            reason: e.to_string(),
        })
    }

    async fn delete_by_doc(&self, doc_id: &str) -> Result<usize, IndexError> {
        let conn = self.lock_conn()?;
        let removed = conn
            .execute("DELETE FROM nodes WHERE doc_id = ?1", params![doc_id])
            .map_err(|e| IndexError::Fatal {
                reason: e.to_string(),
            })?;
        Ok(removed)
    }

    async fn delete_by_ids(&self, chunk_ids: &[String]) -> Result<usize, IndexError> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction().map_err(|e| IndexError::Transient {
            reason: e.to_string(),
        })?;
        let mut removed = 0;
        {
            let mut stmt = tx
                .prepare("DELETE FROM nodes WHERE chunk_id = ?1")
                .map_err(|e| IndexError::Fatal {
                    reason: e.to_string(),
                })?;
            for id in chunk_ids {
                removed += stmt.execute(params![id]).map_err(|e| IndexError::Fatal {
                    reason: e.to_string(),
                })?;
            }
        }
        tx.commit().map_err(|e| IndexError::Transient {
            reason: e.to_string(),
        })?;
        Ok(removed)
    }

    async fn get(&self, chunk_id: &str) -> Result<Option<ChunkNode>, IndexError> {
        let conn = self.lock_conn()?;
        conn.query_row(
            "SELECT * FROM nodes WHERE chunk_id = ?1",
            params![chunk_id],
            Self::row_to_node,
        )
        .optional()
        .map_err(|e| IndexError::Fatal {
            reason: e.to_string(),
        })
    }

    async fn count_by_doc(&self, doc_id: &str) -> Result<usize, IndexError> {
        let conn = self.lock_conn()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM nodes WHERE doc_id = ?1",
                params![doc_id],
                |row| row.get(0),
            )
            .map_err(|e| IndexError::Fatal {
                reason: e.to_string(),
            })?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    async fn vector_search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchHit>, IndexError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare("SELECT * FROM nodes")
            .map_err(|e| IndexError::Fatal {
                reason: e.to_string(),
            })?;
        let nodes = stmt
            .query_map([], Self::row_to_node)
            .map_err(|e| IndexError::Fatal {
                reason: e.to_string(),
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| IndexError::Fatal {
                reason: e.to_string(),
            })?;

        let mut hits: Vec<SearchHit> = nodes
            .iter()
            .filter(|node| filter.is_none_or(|f| f.matches(node)))
            .map(|node| SearchHit {
                chunk_id: node.chunk_id.clone(),
                doc_id: node.doc_id.clone(),
                score: f64::from(cosine_similarity(query, &node.embedding)),
                spans: Vec::new(),
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }

    async fn lexical_search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchHit>, IndexError> {
        let terms = tokenize(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        // Quote each term so FTS5 operators are treated as literals;
        // OR-join for forgiving matching. bm25() is negative,
        // more negative = better, so negate for higher-is-better.
        let fts_query = terms
            .iter()
            .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
            .collect::<Vec<_>>()
            .join(" OR ");

        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT n.*, -bm25(nodes_fts) AS score
                 FROM nodes_fts
                 JOIN nodes n ON n.rowid = nodes_fts.rowid
                 WHERE nodes_fts MATCH ?1
                 ORDER BY score DESC
                 LIMIT ?2",
            )
            .map_err(|e| IndexError::Fatal {
                reason: e.to_string(),
            })?;

        // Over-fetch so post-filtering can still fill k
        let fetch = i64::try_from(k.saturating_mul(4).max(k)).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![fts_query, fetch], |row| {
                let node = Self::row_to_node(row)?;
                let score: f64 = row.get("score")?;
                Ok((node, score))
            })
            .map_err(|e| IndexError::Fatal {
                reason: e.to_string(),
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| IndexError::Fatal {
                reason: e.to_string(),
            })?;

        let mut hits: Vec<SearchHit> = rows
            .into_iter()
            .filter(|(node, _)| filter.is_none_or(|f| f.matches(node)))
            .map(|(node, score)| SearchHit {
                spans: term_spans(&node.text, &terms),
                chunk_id: node.chunk_id,
                doc_id: node.doc_id,
                score,
            })
            .collect();
        hits.truncate(k);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NodeMetadata;

    fn node(doc_id: &str, ordinal: usize, text: &str) -> ChunkNode {
        let mut node = ChunkNode::new(doc_id, ordinal, text.to_string(), NodeMetadata::default());
        let mut embedding = vec![0.0f32; 4];
        embedding[ordinal % 4] = 1.0;
        node.embedding = embedding;
        node
    }

    async fn seeded() -> SqliteIndex {
        let index = SqliteIndex::in_memory().unwrap();
        index
            .ensure_collection("test", 4, IndexManagement::CreateIfNotExists)
            .await
            .unwrap();
        index
            .upsert(&[
                node("doc-1", 0, "Milvus supports HNSW index"),
                node("doc-1", 1, "completely different words"),
                node("doc-2", 0, "another document entirely"),
            ])
            .await
            .unwrap();
        index
    }

    #[tokio::test]
    async fn test_upsert_and_get_roundtrip() {
        let index = seeded().await;
        let loaded = index.get("doc-1:000000").await.unwrap().unwrap();
        assert_eq!(loaded.text, "Milvus supports HNSW index");
        assert_eq!(loaded.embedding, vec![1.0, 0.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_id() {
        let index = seeded().await;
        let replacement = node("doc-1", 0, "replacement text");
        index.upsert(&[replacement]).await.unwrap();
        assert_eq!(index.count_by_doc("doc-1").await.unwrap(), 2);

        let loaded = index.get("doc-1:000000").await.unwrap().unwrap();
        assert_eq!(loaded.text, "replacement text");

        // FTS sees only the replacement
        let hits = index.lexical_search("Milvus", 10, None).await.unwrap();
        assert!(hits.is_empty());
        let hits = index.lexical_search("replacement", 10, None).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_by_doc_and_ids() {
        let index = seeded().await;
        assert_eq!(index.delete_by_doc("doc-1").await.unwrap(), 2);
        assert_eq!(index.count_by_doc("doc-1").await.unwrap(), 0);

        assert_eq!(
            index
                .delete_by_ids(&["doc-2:000000".to_string()])
                .await
                .unwrap(),
            1
        );
        // FTS rows follow node deletes
        let hits = index.lexical_search("another", 10, None).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_vector_search() {
        let index = seeded().await;
        let hits = index
            .vector_search(&[0.0, 1.0, 0.0, 0.0], 10, None)
            .await
            .unwrap();
        assert_eq!(hits[0].chunk_id, "doc-1:000001");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_lexical_search_with_filter() {
        let index = seeded().await;
        let filter = Filter::new().equals("doc_id", "doc-2");
        let hits = index
            .lexical_search("document", 10, Some(&filter))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id, "doc-2");
    }

    #[tokio::test]
    async fn test_lexical_search_special_chars() {
        let index = seeded().await;
        // Characters with FTS5 meaning must not break the query
        let hits = index
            .lexical_search("index? \"milvus\" *", 10, None)
            .await
            .unwrap();
        assert!(!hits.is_empty());
    }

    #[tokio::test]
    async fn test_ensure_collection_dimension_mismatch() {
        let index = seeded().await;
        let err = index
            .ensure_collection("test", 8, IndexManagement::CreateIfNotExists)
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { .. }));
    }
}
