//! Storage abstraction for CRDT document persistence.
//!
//! This module defines the [`StorageBackend`] trait which abstracts over the
//! byte-oriented key-value store that backs a [`Repository`](crate::repository::Repository).
//! Documents are addressed by their [`DocumentId`](super::document::DocumentId); the
//! backend itself has no notion of CRDT semantics, only durable bytes.

use super::document::DocumentId;
use crate::error::Result;

/// Key-value contract over `DocumentId -> Bytes`.
///
/// Implementations must be crash-safe: a `put` either lands fully or the
/// previous bytes for that key survive. There is never a torn half-write.
/// `MemoryStorage` satisfies this trivially (single atomic map swap under a
/// lock); `SqliteStorage` relies on SQLite's own transaction durability.
pub trait StorageBackend: Send + Sync {
    /// Store the raw bytes for a document, overwriting any prior value.
    fn put(&self, id: &DocumentId, bytes: &[u8]) -> Result<()>;

    /// Load the raw bytes for a document, or `None` if it has never been written.
    fn get(&self, id: &DocumentId) -> Result<Option<Vec<u8>>>;

    /// Remove a document's bytes from the backend.
    ///
    /// Per the bundle/VFS lifecycle, callers rarely invoke this directly —
    /// documents are retained for the lifetime of the repository — but it is
    /// exposed for maintenance tooling and tests.
    fn delete(&self, id: &DocumentId) -> Result<()>;

    /// List every document ID currently held by the backend.
    fn list_ids(&self) -> Result<Vec<DocumentId>>;
}
