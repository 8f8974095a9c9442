//! faceprint-store: SQLite-backed identity store.
//!
//! Signatures are persisted post-normalization as little-endian f32 BLOBs;
//! `timestamp` holds the registration time in milliseconds since the epoch.

use chrono::{DateTime, Utc};
use faceprint_core::{IdentityStore, RegisteredIdentity, Signature, StoreError};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS identities (
    id         TEXT PRIMARY KEY,
    name       TEXT NOT NULL,
    embedding  BLOB NOT NULL,
    photo_path TEXT,
    timestamp  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_identities_timestamp ON identities(timestamp);";

const SELECT_COLUMNS: &str = "SELECT id, name, embedding, photo_path, timestamp FROM identities";

/// Identity store over a single SQLite connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    embedding_dim: usize,
}

/// Raw column values before validation.
struct IdentityRow {
    id: String,
    name: String,
    embedding: Vec<u8>,
    photo_path: Option<String>,
    timestamp: i64,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path, embedding_dim: usize) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(backend)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").map_err(backend)?;
        tracing::info!(path = %path.display(), "opened identity database");
        Self::with_connection(conn, embedding_dim)
    }

    pub fn open_in_memory(embedding_dim: usize) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(backend)?;
        Self::with_connection(conn, embedding_dim)
    }

    fn with_connection(conn: Connection, embedding_dim: usize) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(backend)?;
        Ok(Self {
            conn: Mutex::new(conn),
            embedding_dim,
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn decode(&self, row: IdentityRow) -> Result<RegisteredIdentity, StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt {
            id: row.id.clone(),
            reason,
        };

        let values = decode_embedding(&row.embedding).ok_or_else(|| {
            corrupt(format!("embedding blob length {} is not a multiple of 4", row.embedding.len()))
        })?;
        if values.len() != self.embedding_dim {
            return Err(corrupt(format!(
                "expected {}-dim embedding, got {}",
                self.embedding_dim,
                values.len()
            )));
        }

        let created_at = DateTime::<Utc>::from_timestamp_millis(row.timestamp)
            .ok_or_else(|| corrupt(format!("timestamp {} out of range", row.timestamp)))?;

        Ok(RegisteredIdentity {
            id: row.id,
            name: row.name,
            signature: Signature::new(values),
            photo_ref: row.photo_path,
            created_at,
        })
    }
}

impl IdentityStore for SqliteStore {
    fn insert(&self, identity: &RegisteredIdentity) -> Result<(), StoreError> {
        let conn = self.conn();
        let result = conn.execute(
            "INSERT INTO identities (id, name, embedding, photo_path, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                identity.id,
                identity.name,
                encode_embedding(&identity.signature.values),
                identity.photo_ref,
                identity.created_at.timestamp_millis(),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::DuplicateId(identity.id.clone()))
            }
            Err(e) => Err(backend(e)),
        }
    }

    fn get(&self, id: &str) -> Result<Option<RegisteredIdentity>, StoreError> {
        let row = self
            .conn()
            .query_row(&format!("{SELECT_COLUMNS} WHERE id = ?1"), params![id], read_row)
            .optional()
            .map_err(backend)?;

        row.map(|r| self.decode(r)).transpose()
    }

    fn list(&self) -> Result<Vec<RegisteredIdentity>, StoreError> {
        let rows = {
            let conn = self.conn();
            let mut stmt = conn
                .prepare(&format!("{SELECT_COLUMNS} ORDER BY timestamp ASC, rowid ASC"))
                .map_err(backend)?;
            let rows = stmt
                .query_map([], read_row)
                .map_err(backend)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(backend)?;
            rows
        };

        rows.into_iter().map(|r| self.decode(r)).collect()
    }

    fn remove(&self, id: &str) -> Result<bool, StoreError> {
        let removed = self
            .conn()
            .execute("DELETE FROM identities WHERE id = ?1", params![id])
            .map_err(backend)?;
        Ok(removed > 0)
    }

    fn count(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM identities", [], |row| row.get(0))
            .map_err(backend)?;
        Ok(count as usize)
    }
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<IdentityRow> {
    Ok(IdentityRow {
        id: row.get(0)?,
        name: row.get(1)?,
        embedding: row.get(2)?,
        photo_path: row.get(3)?,
        timestamp: row.get(4)?,
    })
}

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(Box::new(e))
}

fn encode_embedding(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const DIM: usize = 4;

    fn identity(id: &str, values: [f32; DIM], age_secs: i64) -> RegisteredIdentity {
        let created_at = Utc::now() - Duration::seconds(age_secs);
        RegisteredIdentity {
            id: id.into(),
            name: format!("user {id}"),
            signature: Signature::new(values.to_vec()),
            photo_ref: Some(format!("/photos/{id}.jpg")),
            // Stored at millisecond precision.
            created_at: DateTime::from_timestamp_millis(created_at.timestamp_millis()).unwrap(),
        }
    }

    #[test]
    fn test_insert_and_get_preserves_record() {
        let store = SqliteStore::open_in_memory(DIM).unwrap();
        let original = identity("a", [0.5, -0.5, 0.5, -0.5], 0);
        store.insert(&original).unwrap();

        let loaded = store.get("a").unwrap().unwrap();
        assert_eq!(loaded, original);
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let store = SqliteStore::open_in_memory(DIM).unwrap();
        store.insert(&identity("a", [1.0, 0.0, 0.0, 0.0], 0)).unwrap();
        let err = store.insert(&identity("a", [0.0, 1.0, 0.0, 0.0], 0)).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateId(id) if id == "a"));
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_list_ordered_by_registration() {
        let store = SqliteStore::open_in_memory(DIM).unwrap();
        store.insert(&identity("newest", [1.0, 0.0, 0.0, 0.0], 1)).unwrap();
        store.insert(&identity("oldest", [0.0, 1.0, 0.0, 0.0], 300)).unwrap();
        store.insert(&identity("middle", [0.0, 0.0, 1.0, 0.0], 60)).unwrap();

        let ids: Vec<String> = store.list().unwrap().into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec!["oldest", "middle", "newest"]);
    }

    #[test]
    fn test_remove() {
        let store = SqliteStore::open_in_memory(DIM).unwrap();
        store.insert(&identity("a", [1.0, 0.0, 0.0, 0.0], 0)).unwrap();
        assert!(store.remove("a").unwrap());
        assert!(!store.remove("a").unwrap());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_wrong_dimension_reported_corrupt() {
        let store = SqliteStore::open_in_memory(DIM).unwrap();
        store
            .conn()
            .execute(
                "INSERT INTO identities (id, name, embedding, photo_path, timestamp)
                 VALUES ('bad', 'x', ?1, NULL, 0)",
                params![encode_embedding(&[1.0, 2.0])],
            )
            .unwrap();
        let err = store.get("bad").unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { id, .. } if id == "bad"));
        assert!(store.list().is_err());
    }

    #[test]
    fn test_truncated_blob_reported_corrupt() {
        let store = SqliteStore::open_in_memory(DIM).unwrap();
        store
            .conn()
            .execute(
                "INSERT INTO identities (id, name, embedding, photo_path, timestamp)
                 VALUES ('short', 'x', ?1, NULL, 0)",
                params![vec![0u8; 7]],
            )
            .unwrap();
        assert!(matches!(store.get("short").unwrap_err(), StoreError::Corrupt { .. }));
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faces.db");
        let original = identity("kept", [0.1, 0.2, 0.3, 0.4], 10);

        {
            let store = SqliteStore::open(&path, DIM).unwrap();
            store.insert(&original).unwrap();
        }

        let reopened = SqliteStore::open(&path, DIM).unwrap();
        assert_eq!(reopened.get("kept").unwrap().unwrap(), original);
    }

    #[test]
    fn test_embedding_bytes_little_endian() {
        let bytes = encode_embedding(&[1.0, -2.5]);
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[..4], &1.0f32.to_le_bytes());
        assert_eq!(decode_embedding(&bytes).unwrap(), vec![1.0, -2.5]);
        assert!(decode_embedding(&[0u8; 3]).is_none());
    }
}
