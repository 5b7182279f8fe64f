//! In-memory storage backend.
//!
//! Volatile: all data is lost when the value is dropped. Used as the default
//! storage option and in tests.

use std::collections::HashMap;
use std::sync::RwLock;

use super::document::DocumentId;
use super::storage::StorageBackend;
use crate::error::Result;

/// In-memory key-value store keyed by [`DocumentId`].
#[derive(Debug, Default)]
pub struct MemoryStorage {
    docs: RwLock<HashMap<DocumentId, Vec<u8>>>,
}

impl MemoryStorage {
    /// Create a new empty in-memory storage.
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryStorage {
    fn put(&self, id: &DocumentId, bytes: &[u8]) -> Result<()> {
        self.docs.write().unwrap().insert(id.clone(), bytes.to_vec());
        Ok(())
    }

    fn get(&self, id: &DocumentId) -> Result<Option<Vec<u8>>> {
        Ok(self.docs.read().unwrap().get(id).cloned())
    }

    fn delete(&self, id: &DocumentId) -> Result<()> {
        self.docs.write().unwrap().remove(id);
        Ok(())
    }

    fn list_ids(&self) -> Result<Vec<DocumentId>> {
        Ok(self.docs.read().unwrap().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let storage = MemoryStorage::new();
        let id = DocumentId::new();
        storage.put(&id, b"hello").unwrap();
        assert_eq!(storage.get(&id).unwrap(), Some(b"hello".to_vec()));
    }

    #[test]
    fn get_missing_returns_none() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.get(&DocumentId::new()).unwrap(), None);
    }

    #[test]
    fn put_overwrites_previous_value() {
        let storage = MemoryStorage::new();
        let id = DocumentId::new();
        storage.put(&id, b"first").unwrap();
        storage.put(&id, b"second").unwrap();
        assert_eq!(storage.get(&id).unwrap(), Some(b"second".to_vec()));
    }

    #[test]
    fn delete_removes_entry() {
        let storage = MemoryStorage::new();
        let id = DocumentId::new();
        storage.put(&id, b"data").unwrap();
        storage.delete(&id).unwrap();
        assert_eq!(storage.get(&id).unwrap(), None);
    }

    #[test]
    fn list_ids_reflects_all_stored_documents() {
        let storage = MemoryStorage::new();
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
}
