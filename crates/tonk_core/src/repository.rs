//! Repository: owns documents, the storage backend, and the sync fan-out
//! between them (§4.3).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use crate::crdt::{Document, DocumentId, StorageBackend};
use yrs::Map;
use crate::error::{FileSystemError, Result, TonkError};

#[cfg(feature = "native-sync")]
use crate::sync::transport::{ConnectionState, Transport, TransportConfig};

/// Stable identifier for one repository instance, used to shard sync state
/// per peer within the CRDT protocol. Not authoritative for any access
/// control decision (§4.3, Non-goals).
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct PeerId(String);

impl PeerId {
    /// Generate a random peer ID, matching the teacher's doc-ID generation
    /// (`workspace_doc.rs`).
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wrap a caller-supplied peer ID.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Borrow the string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Governs which documents a repository advertises to peers during sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SharePolicy {
    /// Advertise nothing unless a peer explicitly requests a document by ID.
    /// Default for storage-server deployments.
    Deny,
    /// Advertise every document currently in storage. Default for clients.
    #[default]
    Generous,
}

type SyncCallback = Box<dyn Fn(&DocumentId) + Send + Sync>;

/// Owns the set of live documents for one bundle on one peer, backed by a
/// pluggable [`StorageBackend`] (§4.3).
///
/// Per §5, a `Repository` is single-threaded-cooperative: all mutation paths
/// take the same internal lock, so CRDT structures are never mutated
/// concurrently even though the type itself is `Send + Sync` for use across
/// async tasks.
pub struct Repository {
    peer_id: PeerId,
    share_policy: SharePolicy,
    storage: Arc<dyn StorageBackend>,
    docs: RwLock<HashMap<DocumentId, Arc<Document>>>,
    sync_callbacks: Mutex<Vec<SyncCallback>>,
    #[cfg(feature = "native-sync")]
    sync_handles: Mutex<HashMap<DocumentId, SyncHandle>>,
}

/// A live WebSocket sync connection for one document (§4.7), as established
/// by [`Repository::connect_websocket`].
#[cfg(feature = "native-sync")]
struct SyncHandle {
    transport: Arc<Transport>,
    task: tokio::task::JoinHandle<()>,
}

impl Repository {
    /// Construct a repository over `storage`, generating a random peer ID.
    pub fn new(storage: Arc<dyn StorageBackend>, share_policy: SharePolicy) -> Self {
        Self::with_peer_id(storage, share_policy, PeerId::generate())
    }

    /// Construct a repository with a caller-supplied peer ID.
    pub fn with_peer_id(
        storage: Arc<dyn StorageBackend>,
        share_policy: SharePolicy,
        peer_id: PeerId,
    ) -> Self {
        Self {
            peer_id,
            share_policy,
            storage,
            docs: RwLock::new(HashMap::new()),
            sync_callbacks: Mutex::new(Vec::new()),
            #[cfg(feature = "native-sync")]
            sync_handles: Mutex::new(HashMap::new()),
        }
    }

    /// This repository's peer identity.
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// The configured share policy.
    pub fn share_policy(&self) -> SharePolicy {
        self.share_policy
    }

    /// Create a new document, persist it, and return its ID.
    pub fn create_document(&self) -> Result<DocumentId> {
        let doc = Arc::new(Document::new());
        let id = DocumentId::new();
        self.storage.put(&id, &doc.state())?;
        self.docs.write().unwrap().insert(id.clone(), doc);
        self.notify_sync(&id);
        Ok(id)
    }

    /// Insert an already-constructed document under a caller-chosen ID.
    ///
    /// Used when loading a bundle: the PathIndex and node documents arrive
    /// with their IDs already assigned by the archive.
    pub fn insert_document(&self, id: DocumentId, doc: Document) -> Result<()> {
        let doc = Arc::new(doc);
        self.storage.put(&id, &doc.state())?;
        self.docs.write().unwrap().insert(id.clone(), doc);
        Ok(())
    }

    /// Insert an already-constructed, already-shared document handle.
    ///
    /// Unlike [`Repository::insert_document`], which takes ownership of a
    /// fresh `Document` and wraps it in a new `Arc`, this keeps `doc`
    /// aliased with whatever other owner holds the same `Arc`. Used by the
    /// VFS so its PathIndex document is the exact same object this
    /// repository's map entry points at — a sync transport merging inbound
    /// frames into the repository's copy (via [`Repository::find_document`])
    /// is then visible through the VFS's own reads, rather than landing in
    /// an independent clone.
    pub fn insert_document_arc(&self, id: DocumentId, doc: Arc<Document>) -> Result<()> {
        self.storage.put(&id, &doc.state())?;
        self.docs.write().unwrap().insert(id.clone(), doc);
        Ok(())
    }

    /// Look up a live document, hydrating it from storage on first access.
    pub fn find_document(&self, id: &DocumentId) -> Result<Arc<Document>> {
        if let Some(doc) = self.docs.read().unwrap().get(id) {
            return Ok(doc.clone());
        }

        let bytes = self
            .storage
            .get(id)?
            .ok_or_else(|| FileSystemError::NotFound(id.to_string()))?;
        let doc = Arc::new(Document::load(&bytes)?);
        self.docs.write().unwrap().insert(id.clone(), doc.clone());
        Ok(doc)
    }

    /// Apply a local mutation to the document `id`, persisting the new
    /// full state and notifying sync callbacks.
    ///
    /// Returns the document's change counter (`Document::seq`) after the
    /// mutation, so callers that raise a watcher notification for this edit
    /// can attach a real, de-duplicatable sequence number (§4.1) instead of
    /// inventing one.
    pub fn update_document<F>(&self, id: &DocumentId, mutator: F) -> Result<u64>
    where
        F: FnOnce(&yrs::MapRef, &mut yrs::TransactionMut) -> Result<()>,
    {
        let doc = self.find_document(id)?;
        doc.change(mutator)?;
        self.storage.put(id, &doc.state())?;
        self.notify_sync(id);
        Ok(doc.seq())
    }

    /// Ingest one sync frame from `peer_id`, merging it into the named
    /// document's state.
    pub fn apply_remote_message(&self, _peer_id: &PeerId, id: &DocumentId, bytes: &[u8]) -> Result<()> {
        let doc = self.find_document(id)?;
        doc.merge(bytes)?;
        self.storage.put(id, &doc.state())?;
        self.notify_sync(id);
        Ok(())
    }

    /// Register a callback invoked whenever any document's state changes,
    /// whether from a local mutation or an inbound merge.
    pub fn register_sync_callback<F>(&self, callback: F)
    where
        F: Fn(&DocumentId) + Send + Sync + 'static,
    {
        self.sync_callbacks.lock().unwrap().push(Box::new(callback));
    }

    /// Permanently remove a document from storage. Rarely used directly:
    /// the VFS retains documents even when no PathIndex entry refers to
    /// them, per §3's no-GC lifecycle rule.
    pub fn delete_document(&self, id: &DocumentId) -> Result<()> {
        self.docs.write().unwrap().remove(id);
        self.storage.delete(id)
    }

    /// All document IDs currently durable in storage.
    pub fn list_document_ids(&self) -> Result<Vec<DocumentId>> {
        self.storage.list_ids()
    }

    /// Persist a document's current full state and notify sync callbacks.
    ///
    /// Used by higher layers (the VFS, for its PathIndex) that hold a
    /// document reference outside the repository's own hydration path and
    /// need to flush a mutation made directly through [`Document::change`].
    pub fn persist(&self, id: &DocumentId, doc: &crate::crdt::Document) -> Result<()> {
        self.storage.put(id, &doc.state())?;
        self.notify_sync(id);
        Ok(())
    }

    /// Open a WebSocket sync connection to `url` for document `id` (§4.7,
    /// §6's `connect_websocket(url)` Host API entry). One document gets one
    /// transport, mirroring how the source project syncs its metadata and
    /// body documents over separate connections rather than multiplexing
    /// several documents through one socket (`Transport`'s own doc comment).
    ///
    /// Replaces any existing connection for `id`, closing it first.
    #[cfg(feature = "native-sync")]
    pub fn connect_websocket(self: &Arc<Self>, id: &DocumentId, url: url::Url) -> Result<()> {
        self.disconnect(id);

        let doc = self.find_document(id)?;
        let transport = Arc::new(Transport::new(url, TransportConfig::default()));
        let repo = self.clone();
        let id_for_log = id.clone();
        let transport_for_task = transport.clone();
        let task = tokio::spawn(async move {
            if let Err(err) = transport_for_task.run(doc).await {
                log::warn!("sync transport for document {id_for_log} exited: {err}");
            }
            repo.sync_handles.lock().unwrap().remove(&id_for_log);
        });

        self.sync_handles
            .lock()
            .unwrap()
            .insert(id.clone(), SyncHandle { transport, task });
        Ok(())
    }

    /// Whether document `id` currently has an open (`Connected`) sync
    /// transport (§6's `is_connected` Host API entry).
    #[cfg(feature = "native-sync")]
    pub fn is_connected(&self, id: &DocumentId) -> bool {
        self.sync_handles
            .lock()
            .unwrap()
            .get(id)
            .is_some_and(|h| h.transport.state() == ConnectionState::Connected)
    }

    /// Close the sync connection for `id`, if any (§5 cancellation
    /// semantics). Idempotent.
    #[cfg(feature = "native-sync")]
    pub fn disconnect(&self, id: &DocumentId) {
        if let Some(handle) = self.sync_handles.lock().unwrap().remove(id) {
            handle.transport.close();
            handle.task.abort();
        }
    }

    fn notify_sync(&self, id: &DocumentId) {
        for cb in self.sync_callbacks.lock().unwrap().iter() {
            cb(id);
        }
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("peer_id", &self.peer_id)
            .field("share_policy", &self.share_policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::MemoryStorage;

    fn repo() -> Repository {
        Repository::new(Arc::new(MemoryStorage::new()), SharePolicy::Generous)
    }

    #[test]
    fn create_then_find_round_trips() {
        let repo = repo();
        let id = repo.create_document().unwrap();
        let doc = repo.find_document(&id).unwrap();
        assert_eq!(doc.to_json(), serde_json::json!({}));
    }

    #[test]
    fn find_missing_document_is_not_found() {
        let repo = repo();
        let err = repo.find_document(&DocumentId::new()).unwrap_err();
        assert!(matches!(err, TonkError::FileSystem(FileSystemError::NotFound(_))));
    }

    #[test]
    fn update_document_persists_and_notifies() {
        let repo = repo();
        let id = repo.create_document().unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        repo.register_sync_callback(move |changed| {
            seen_clone.lock().unwrap().push(changed.clone());
        });

        repo.update_document(&id, |root, txn| {
            root.insert(txn, "k", "v");
            Ok(())
        })
        .unwrap();

        let doc = repo.find_document(&id).unwrap();
        assert_eq!(doc.to_json()["k"], serde_json::json!("v"));
        assert_eq!(seen.lock().unwrap().as_slice(), &[id]);
    }

    #[test]
    fn apply_remote_message_merges_into_existing_document() {
        let repo_a = repo();
        let id = repo_a.create_document().unwrap();
        repo_a
            .update_document(&id, |root, txn| {
                root.insert(txn, "from_a", 1i64);
                Ok(())
            })
            .unwrap();
        let state = repo_a.find_document(&id).unwrap().state();

        let repo_b = repo();
        repo_b.insert_document(id.clone(), Document::load(&[]).unwrap()).unwrap();
        let peer = PeerId::generate();
        repo_b.apply_remote_message(&peer, &id, &state).unwrap();

        let doc_b = repo_b.find_document(&id).unwrap();
        assert_eq!(doc_b.to_json()["from_a"], serde_json::json!(1));
    }

    #[test]
    fn delete_document_removes_from_storage() {
        let repo = repo();
        let id = repo.create_document().unwrap();
        repo.delete_document(&id).unwrap();
        assert!(repo.find_document(&id).is_err());
    }

    #[cfg(feature = "native-sync")]
    #[test]
    fn is_connected_false_for_unknown_document() {
        let repo = repo();
        assert!(!repo.is_connected(&DocumentId::new()));
    }

    #[cfg(feature = "native-sync")]
    #[test]
    fn connect_websocket_rejects_missing_document() {
        let repo = Arc::new(repo());
        let url = url::Url::parse("ws://localhost:1/sync").unwrap();
        let err = repo.connect_websocket(&DocumentId::new(), url).unwrap_err();
        assert!(matches!(err, TonkError::FileSystem(FileSystemError::NotFound(_))));
    }

    #[cfg(feature = "native-sync")]
    #[test]
    fn disconnect_is_idempotent_without_a_connection() {
        let repo = repo();
        repo.disconnect(&DocumentId::new());
    }
}
