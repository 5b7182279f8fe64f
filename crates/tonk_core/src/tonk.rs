//! Unified entry point composing a [`Repository`], a [`Vfs`], and the
//! [`Bundle`] codec — the host-facing facade named in §6's "Host API".
//!
//! Mirrors the source project's single top-level API object: host glue
//! rarely wants to juggle a repository and a VFS separately, so `Tonk`
//! bundles construction, (de)serialization, and forking behind one type
//! while still exposing the underlying pieces for callers who need them.

use std::sync::Arc;

use crate::bundle::{Bundle, FormatVersion};
use crate::config::StorageOptions;
use crate::crdt::StorageBackend;
use crate::error::Result;
use crate::repository::{PeerId, Repository, SharePolicy};
use crate::vfs::Vfs;

/// A mounted bundle: a live [`Repository`] and [`Vfs`] pair, plus whatever
/// storage backend they were built over.
pub struct Tonk {
    repo: Arc<Repository>,
    vfs: Vfs,
}

impl Tonk {
    /// Create a new, empty bundle mounted over `storage`.
    pub fn new(storage: Arc<dyn StorageBackend>, share_policy: SharePolicy) -> Result<Self> {
        let repo = Arc::new(Repository::new(storage, share_policy));
        let vfs = Vfs::new(repo.clone())?;
        Ok(Self { repo, vfs })
    }

    /// Create a new, empty bundle using the storage backend `options` describes.
    pub fn with_storage_options(options: &StorageOptions, share_policy: SharePolicy) -> Result<Self> {
        Self::new(options.build()?, share_policy)
    }

    /// Load a bundle archive and mount it over `storage`.
    pub fn from_bytes(raw: &[u8], storage: Arc<dyn StorageBackend>, share_policy: SharePolicy) -> Result<Self> {
        let bundle = Bundle::from_bytes(raw)?;
        let (repo, vfs) = bundle.mount(storage, share_policy)?;
        Ok(Self { repo, vfs })
    }

    /// Serialize the current state to a bundle archive.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Bundle::capture(&self.repo, &self.vfs)?.to_bytes()
    }

    /// Fork this bundle to a fresh archive with a new root identity,
    /// without mutating this instance (§4.4, §8 property 7).
    pub fn fork_to_bytes(&self) -> Result<Vec<u8>> {
        Bundle::capture(&self.repo, &self.vfs)?.fork().to_bytes()
    }

    /// This repository's peer identity.
    pub fn peer_id(&self) -> &PeerId {
        self.repo.peer_id()
    }

    /// Borrow the underlying VFS for path operations.
    pub fn vfs(&self) -> &Vfs {
        &self.vfs
    }

    /// Borrow the underlying repository, e.g. to register a sync callback.
    pub fn repository(&self) -> &Arc<Repository> {
        &self.repo
    }

    /// Open a WebSocket sync connection for this bundle's PathIndex document
    /// (§4.7, §6's `connect_websocket(url)` Host API entry). Node documents
    /// needing their own live connection can call
    /// [`Repository::connect_websocket`] directly with their ID.
    #[cfg(feature = "native-sync")]
    pub fn connect_websocket(&self, url: url::Url) -> Result<()> {
        self.repo.connect_websocket(self.vfs.root_id(), url)
    }

    /// Whether this bundle's PathIndex document currently has an open sync
    /// connection (§6's `is_connected` Host API entry).
    #[cfg(feature = "native-sync")]
    pub fn is_connected(&self) -> bool {
        self.repo.is_connected(self.vfs.root_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::MemoryStorage;

    fn tonk() -> Tonk {
        Tonk::new(Arc::new(MemoryStorage::new()), SharePolicy::Generous).unwrap()
    }

    #[test]
    fn round_trip_preserves_file_content() {
        let t = tonk();
        t.vfs().create_file("/hello.txt", serde_json::json!({"msg": "hi"})).unwrap();

        let bytes = t.to_bytes().unwrap();
        let t2 = Tonk::from_bytes(&bytes, Arc::new(MemoryStorage::new()), SharePolicy::Generous).unwrap();

        assert_eq!(t2.vfs().read_file("/hello.txt").unwrap().content, serde_json::json!({"msg": "hi"}));
    }

    #[test]
    fn fork_changes_root_id_but_keeps_content_readable() {
        let t = tonk();
        t.vfs().create_file("/a.txt", serde_json::json!({"v": 1})).unwrap();

        let original = Bundle::from_bytes(&t.to_bytes().unwrap()).unwrap();
        let forked = Bundle::from_bytes(&t.fork_to_bytes().unwrap()).unwrap();

        assert_ne!(original.root_id(), forked.root_id());

        let (_repo, forked_vfs) = forked.mount(Arc::new(MemoryStorage::new()), SharePolicy::Generous).unwrap();
        assert_eq!(forked_vfs.read_file("/a.txt").unwrap().content, serde_json::json!({"v": 1}));
    }

    #[test]
    fn format_version_defaults_are_stable() {
        let v = FormatVersion::default();
        assert_eq!(v.major, 1);
    }

    #[cfg(feature = "native-sync")]
    #[test]
    fn not_connected_until_connect_websocket_succeeds() {
        let t = tonk();
        assert!(!t.is_connected());
    }
}
