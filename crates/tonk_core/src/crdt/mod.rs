//! CRDT document type and pluggable storage backends.

pub mod document;
pub mod memory_storage;
pub mod storage;

#[cfg(feature = "crdt-sqlite")]
pub mod sqlite_storage;

pub use document::{Change, Document, DocumentId, Subscription};
pub use memory_storage::MemoryStorage;
pub use storage::StorageBackend;

#[cfg(feature = "crdt-sqlite")]
pub use sqlite_storage::SqliteStorage;
