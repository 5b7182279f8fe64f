//! SQLite-backed persistent storage backend.
//!
//! The platform-native persistent storage option (§4.2, §6). A single table
//! maps `DocumentId -> Bytes`; there is no update log here, because the
//! CRDT document itself (see [`super::document::Document`]) owns full-state
//! encode/decode. Callers write a fresh snapshot on every `Repository` save
//! point rather than accumulating an incremental log in the backend.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection};

use super::document::DocumentId;
use super::storage::StorageBackend;
use crate::error::{Result, TonkError};

/// SQLite-backed implementation of [`StorageBackend`].
///
/// The connection is wrapped in a `Mutex`; SQLite itself runs in serialized
/// threading mode, so this is sufficient for the single-threaded-per-repository
/// concurrency model (§5).
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Open or create a SQLite database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path).map_err(TonkError::from)?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    /// Create an in-memory SQLite database, mainly for tests that want the
    /// SQLite code path without touching disk.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(TonkError::from)?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                bytes BLOB NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .map_err(TonkError::from)?;
        Ok(())
    }
}

impl StorageBackend for SqliteStorage {
    fn put(&self, id: &DocumentId, bytes: &[u8]) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO documents (id, bytes, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET bytes = excluded.bytes, updated_at = excluded.updated_at",
            params![id.as_str(), bytes, now_millis()],
        )
        .map_err(TonkError::from)?;
        Ok(())
    }

    fn get(&self, id: &DocumentId) -> Result<Option<Vec<u8>>> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            "SELECT bytes FROM documents WHERE id = ?1",
            params![id.as_str()],
            |row| row.get(0),
        );
        match result {
            Ok(bytes) => Ok(Some(bytes)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(TonkError::from(e)),
        }
    }

    fn delete(&self, id: &DocumentId) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM documents WHERE id = ?1", params![id.as_str()])
            .map_err(TonkError::from)?;
        Ok(())
    }

    fn list_ids(&self) -> Result<Vec<DocumentId>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT id FROM documents")
            .map_err(TonkError::from)?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(TonkError::from)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(TonkError::from)?;
        Ok(ids.into_iter().map(DocumentId::from_raw).collect())
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let storage = SqliteStorage::in_memory().unwrap();
        let id = DocumentId::new();
        storage.put(&id, b"hello").unwrap();
        assert_eq!(storage.get(&id).unwrap(), Some(b"hello".to_vec()));
    }

    #[test]
    fn get_missing_returns_none() {
        let storage = SqliteStorage::in_memory().unwrap();
        assert_eq!(storage.get(&DocumentId::new()).unwrap(), None);
    }

    #[test]
    fn put_overwrites_previous_value() {
        let storage = SqliteStorage::in_memory().unwrap();
        let id = DocumentId::new();
        storage.put(&id, b"first").unwrap();
        storage.put(&id, b"second").unwrap();
        assert_eq!(storage.get(&id).unwrap(), Some(b"second".to_vec()));
    }

    #[test]
    fn delete_removes_entry() {
        let storage = SqliteStorage::in_memory().unwrap();
        let id = DocumentId::new();
        storage.put(&id, b"data").unwrap();
        storage.delete(&id).unwrap();
        assert_eq!(storage.get(&id).unwrap(), None);
    }

    #[test]
    fn list_ids_reflects_all_stored_documents() {
        let storage = SqliteStorage::in_memory().unwrap();
        let a = DocumentId::new();
        let b = DocumentId::new();
        storage.put(&a, b"a").unwrap();
        storage.put(&b, b"b").unwrap();

        let mut ids = storage.list_ids().unwrap();
        ids.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tonk.sqlite3");
        let id = DocumentId::new();

        {
            let storage = SqliteStorage::open(&path).unwrap();
            storage.put(&id, b"durable").unwrap();
        }

        let reopened = SqliteStorage::open(&path).unwrap();
        assert_eq!(reopened.get(&id).unwrap(), Some(b"durable".to_vec()));
    }
}
