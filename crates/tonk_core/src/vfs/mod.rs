//! Virtual file system: path operations composed over the [`PathIndex`] and
//! per-node CRDT documents (§4.5, §4.6).

pub mod node;
pub mod path_index;
pub mod watcher;

use std::sync::Arc;

use node::{DirectoryNode, FileNode, NodeDescriptor, NodeType, Timestamps};
use path_index::PathIndex;
use watcher::{Watcher, WatcherRegistry, WatchScope};

use crate::crdt::{Document, DocumentId};
use yrs::Map;
use crate::error::{FileSystemError, Result};
use crate::repository::Repository;

/// Snapshot returned by [`Vfs::read_file`].
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct FileSnapshot {
    /// Basename.
    pub name: String,
    /// Always `"document"`.
    #[serde(rename = "type")]
    pub node_type: &'static str,
    /// File content.
    pub content: serde_json::Value,
    /// Decoded binary payload, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<Vec<u8>>,
    /// Created/modified timestamps.
    pub timestamps: Timestamps,
}

/// Entry returned by [`Vfs::list_directory`].
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DirEntry {
    /// Basename of the child.
    pub name: String,
    /// `"file"` or `"directory"`.
    #[serde(rename = "type")]
    pub node_type: &'static str,
    /// Timestamps from the PathIndex entry.
    pub timestamps: Timestamps,
    /// The child's document ID.
    pub pointer: String,
}

/// Metadata returned by [`Vfs::get_metadata`].
pub type NodeMetadata = NodeDescriptor;

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// The path-addressed filesystem API (§4.6), composed over a [`Repository`]
/// and a single [`PathIndex`] document.
pub struct Vfs {
    repo: Arc<Repository>,
    root_id: DocumentId,
    index: PathIndex,
    watchers: Arc<WatcherRegistry>,
}

impl Vfs {
    /// Mount a VFS over a freshly generated, empty PathIndex, registering it
    /// with `repo` under a new root ID.
    ///
    /// The repository's document-map entry for `root_id` is the exact same
    /// `Arc<Document>` this VFS's [`PathIndex`] wraps (via
    /// [`Repository::insert_document_arc`]), so a sync transport connected
    /// through the repository (`Repository::connect_websocket`) merges
    /// directly into the document this VFS reads from.
    pub fn new(repo: Arc<Repository>) -> Result<Self> {
        let index = PathIndex::new();
        let root_id = DocumentId::new();
        repo.insert_document_arc(root_id.clone(), index.document_handle())?;
        Ok(Self {
            repo,
            root_id,
            index,
            watchers: Arc::new(WatcherRegistry::new()),
        })
    }

    /// Mount a VFS over an existing PathIndex document under a known root ID
    /// (e.g. loaded from a bundle). See [`Vfs::new`] for why the repository
    /// ends up sharing this exact document handle.
    pub fn from_path_index(repo: Arc<Repository>, root_id: DocumentId, index_doc: Document) -> Result<Self> {
        let index = PathIndex::from_document(index_doc);
        repo.insert_document_arc(root_id.clone(), index.document_handle())?;
        Ok(Self {
            repo,
            root_id,
            index,
            watchers: Arc::new(WatcherRegistry::new()),
        })
    }

    /// The PathIndex document's ID — the bundle's `rootId` (§3).
    pub fn root_id(&self) -> &DocumentId {
        &self.root_id
    }

    fn persist_index(&self) -> Result<()> {
        self.repo.persist(&self.root_id, self.index.document())
    }

    /// Borrow the PathIndex document, e.g. for bundle serialization.
    pub fn path_index_document(&self) -> &Document {
        self.index.document()
    }

    /// Every path currently in the PathIndex and its descriptor, for bundle
    /// capture.
    pub fn all_entries(&self) -> Vec<(String, NodeDescriptor)> {
        self.index.list_prefix("/")
    }

    fn require_parent(&self, normalized: &str) -> Result<()> {
        if let Some(parent) = path_index::parent_of(normalized) {
            if !self.index.exists(&parent) {
                return Err(FileSystemError::ParentMissing(normalized.to_string()).into());
            }
            if let Some(descriptor) = self.index.get(&parent) {
                if descriptor.node_type != NodeType::Directory {
                    return Err(FileSystemError::NotADirectory(parent).into());
                }
            }
        }
        Ok(())
    }

    /// Create a file at `path` with JSON `content`.
    pub fn create_file(&self, path: &str, content: serde_json::Value) -> Result<()> {
        self.create_file_impl(path, content, None)
    }

    /// Create a file at `path` with JSON `content` and an attached byte blob.
    pub fn create_file_with_bytes(
        &self,
        path: &str,
        content: serde_json::Value,
        bytes: &[u8],
    ) -> Result<()> {
        self.create_file_impl(path, content, Some(bytes))
    }

    fn create_file_impl(
        &self,
        path: &str,
        content: serde_json::Value,
        bytes: Option<&[u8]>,
    ) -> Result<()> {
        let normalized = path_index::normalize_path(path)?;
        if self.index.exists(&normalized) {
            return Err(FileSystemError::AlreadyExists(normalized).into());
        }
        self.require_parent(&normalized)?;

        let now = now_millis();
        let ts = Timestamps::created_now(now);
        let name = path_index::basename(&normalized).unwrap_or("").to_string();
        let node = match bytes {
            Some(b) => FileNode::with_bytes(name, content, b, ts),
            None => FileNode::new(name, content, ts),
        };

        let doc_id = self.repo.create_document()?;
        let seq = self.repo.update_document(&doc_id, |root, txn| {
            let json = serde_json::to_string(&node)
                .map_err(|e| crate::error::TonkError::Internal(e.to_string()))?;
            root.insert(txn, "node", json);
            Ok(())
        })?;

        let descriptor = NodeDescriptor::new(NodeType::Document, doc_id.to_string(), ts);
        self.index.insert(&normalized, &descriptor)?;
        self.persist_index()?;
        self.watchers.notify(&normalized, &doc_id, seq);
        Ok(())
    }

    /// Read the file at `path`.
    pub fn read_file(&self, path: &str) -> Result<FileSnapshot> {
        let normalized = path_index::normalize_path(path)?;
        let descriptor = self
            .index
            .get(&normalized)
            .ok_or_else(|| FileSystemError::NotFound(normalized.clone()))?;
        if descriptor.node_type != NodeType::Document {
            return Err(FileSystemError::IsDirectory(normalized).into());
        }

        let node = self.read_file_node(&descriptor)?;
        let bytes = node.decoded_bytes();
        Ok(FileSnapshot {
            name: node.name,
            node_type: "document",
            content: node.content,
            bytes,
            timestamps: node.timestamps,
        })
    }

    fn read_file_node(&self, descriptor: &NodeDescriptor) -> Result<FileNode> {
        let doc_id = DocumentId::from_raw(descriptor.node_doc_id.clone());
        let doc = self.repo.find_document(&doc_id)?;
        let value = doc.to_json();
        let raw = value
            .get("node")
            .and_then(|v| v.as_str())
            .ok_or_else(|| FileSystemError::NotFound(descriptor.node_doc_id.clone()))?;
        serde_json::from_str(raw)
            .map_err(|e| crate::error::TonkError::Internal(format!("corrupt file node: {e}")).into())
    }

    /// Update the content of an existing file. Returns whether it was present.
    pub fn update_file(&self, path: &str, content: serde_json::Value) -> Result<bool> {
        self.update_file_impl(path, content, None)
    }

    /// Update content and attached bytes of an existing file.
    pub fn update_file_with_bytes(
        &self,
        path: &str,
        content: serde_json::Value,
        bytes: &[u8],
    ) -> Result<bool> {
        self.update_file_impl(path, content, Some(bytes))
    }

    fn update_file_impl(
        &self,
        path: &str,
        content: serde_json::Value,
        bytes: Option<&[u8]>,
    ) -> Result<bool> {
        let normalized = path_index::normalize_path(path)?;
        let descriptor = match self.index.get(&normalized) {
            Some(d) => d,
            None => return Ok(false),
        };
        if descriptor.node_type != NodeType::Document {
            return Err(FileSystemError::IsDirectory(normalized).into());
        }

        let doc_id = DocumentId::from_raw(descriptor.node_doc_id.clone());
        let existing = self.read_file_node(&descriptor)?;
        let now = now_millis();
        let ts = existing.timestamps.touch(now);
        let node = match bytes {
            Some(b) => FileNode::with_bytes(existing.name.clone(), content, b, ts),
            None => FileNode::new(existing.name.clone(), content, ts),
        };

        let seq = self.repo.update_document(&doc_id, |root, txn| {
            let json = serde_json::to_string(&node)
                .map_err(|e| crate::error::TonkError::Internal(e.to_string()))?;
            root.insert(txn, "node", json);
            Ok(())
        })?;

        let mut new_descriptor = descriptor;
        new_descriptor.timestamps = ts;
        self.index.insert(&normalized, &new_descriptor)?;
        self.persist_index()?;
        self.watchers.notify(&normalized, &doc_id, seq);
        Ok(true)
    }

    /// Delete a file. Returns whether it was present. Only the PathIndex
    /// entry is removed; the document is retained in storage (§8 invariant 4,
    /// §9 Open Questions).
    pub fn delete_file(&self, path: &str) -> Result<bool> {
        let normalized = path_index::normalize_path(path)?;
        let descriptor = match self.index.get(&normalized) {
            Some(d) => d,
            None => return Ok(false),
        };
        if descriptor.node_type != NodeType::Document {
            return Err(FileSystemError::IsDirectory(normalized).into());
        }

        self.index.remove(&normalized)?;
        self.persist_index()?;
        let doc_id = DocumentId::from_raw(descriptor.node_doc_id);
        self.watchers.notify(&normalized, &doc_id, self.index.document().seq());
        Ok(true)
    }

    /// Delete a directory. Rejects a non-empty directory with
    /// `DirectoryNotEmpty` unless `recursive` is set (§4.5).
    pub fn delete_directory(&self, path: &str, recursive: bool) -> Result<bool> {
        let normalized = path_index::normalize_path(path)?;
        let descriptor = match self.index.get(&normalized) {
            Some(d) => d,
            None => return Ok(false),
        };
        if descriptor.node_type != NodeType::Directory {
            return Err(FileSystemError::NotADirectory(normalized).into());
        }

        let children = self.index.list_direct_children(&normalized);
        if !children.is_empty() && !recursive {
            return Err(FileSystemError::DirectoryNotEmpty(normalized).into());
        }

        for (child_path, _) in self.index.list_prefix(&normalized) {
            if child_path != normalized {
                self.index.remove(&child_path)?;
            }
        }
        self.index.remove(&normalized)?;
        self.persist_index()?;

        let doc_id = DocumentId::from_raw(descriptor.node_doc_id);
        self.watchers.notify(&normalized, &doc_id, self.index.document().seq());
        Ok(true)
    }

    /// Create an empty directory at `path`.
    pub fn create_directory(&self, path: &str) -> Result<()> {
        let normalized = path_index::normalize_path(path)?;
        if self.index.exists(&normalized) {
            return Err(FileSystemError::AlreadyExists(normalized).into());
        }
        self.require_parent(&normalized)?;

        let now = now_millis();
        let ts = Timestamps::created_now(now);
        let name = path_index::basename(&normalized).unwrap_or("").to_string();
        let node = DirectoryNode::new(name, ts);

        let doc_id = self.repo.create_document()?;
        self.repo.update_document(&doc_id, |root, txn| {
            let json = serde_json::to_string(&node)
                .map_err(|e| crate::error::TonkError::Internal(e.to_string()))?;
            root.insert(txn, "node", json);
            Ok(())
        })?;

        let descriptor = NodeDescriptor::new(NodeType::Directory, doc_id.to_string(), ts);
        self.index.insert(&normalized, &descriptor)?;
        self.persist_index()?;
        Ok(())
    }

    /// List the direct children of a directory.
    pub fn list_directory(&self, path: &str) -> Result<Vec<DirEntry>> {
        let normalized = path_index::normalize_path(path)?;
        if normalized != "/" {
            let descriptor = self
                .index
                .get(&normalized)
                .ok_or_else(|| FileSystemError::NotFound(normalized.clone()))?;
            if descriptor.node_type != NodeType::Directory {
                return Err(FileSystemError::NotADirectory(normalized).into());
            }
        }

        let mut entries: Vec<DirEntry> = self
            .index
            .list_direct_children(&normalized)
            .into_iter()
            .map(|(child_path, descriptor)| DirEntry {
                name: path_index::basename(&child_path).unwrap_or("").to_string(),
                node_type: match descriptor.node_type {
                    NodeType::Document => "file",
                    NodeType::Directory => "directory",
                },
                timestamps: descriptor.timestamps,
                pointer: descriptor.pointer,
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Whether a path has an entry in the PathIndex.
    pub fn exists(&self, path: &str) -> bool {
        match path_index::normalize_path(path) {
            Ok(normalized) => self.index.exists(&normalized),
            Err(_) => false,
        }
    }

    /// Metadata for the entry at `path`.
    pub fn get_metadata(&self, path: &str) -> Result<NodeMetadata> {
        let normalized = path_index::normalize_path(path)?;
        self.index
            .get(&normalized)
            .ok_or_else(|| FileSystemError::NotFound(normalized).into())
    }

    /// Rename `old` to `new` (§4.6 rename algorithm). Returns whether a
    /// source entry existed.
    pub fn rename(&self, old: &str, new: &str) -> Result<bool> {
        let old_norm = path_index::normalize_path(old)?;
        let new_norm = path_index::normalize_path(new)?;

        if old_norm == new_norm {
            return Err(FileSystemError::SameLocation(old_norm).into());
        }

        let descriptor = match self.index.get(&old_norm) {
            Some(d) => d,
            None => return Ok(false),
        };

        if self.index.exists(&new_norm) {
            return Err(FileSystemError::AlreadyExists(new_norm).into());
        }
        if path_index::is_ancestor_or_self(&old_norm, &new_norm) {
            return Err(FileSystemError::AncestorConflict(old_norm, new_norm).into());
        }
        self.require_parent(&new_norm)?;

        let now = now_millis();
        let mut updated = descriptor.clone();
        updated.timestamps = updated.timestamps.touch(now);

        match descriptor.node_type {
            NodeType::Document => {
                self.index.rename_one(&old_norm, &new_norm, &updated)?;
            }
            NodeType::Directory => {
                self.index.rename_subtree(&old_norm, &new_norm)?;
            }
        }
        self.persist_index()?;

        let doc_id = DocumentId::from_raw(descriptor.node_doc_id);
        let seq = self.index.document().seq();
        self.watchers.notify(&old_norm, &doc_id, seq);
        self.watchers.notify(&new_norm, &doc_id, seq);
        Ok(true)
    }

    /// Watch a single file for changes.
    pub fn watch_file<F>(&self, path: &str, callback: F) -> Result<Watcher>
    where
        F: Fn(&watcher::WatchEvent) + Send + Sync + 'static,
    {
        let normalized = path_index::normalize_path(path)?;
        if !self.index.exists(&normalized) {
            return Err(FileSystemError::NotFound(normalized).into());
        }
        let id = self
            .watchers
            .subscribe(normalized, WatchScope::File, std::sync::Arc::new(callback));
        Ok(Watcher::new(self.watchers.clone(), id))
    }

    /// Watch a directory for changes to its direct children.
    pub fn watch_directory<F>(&self, path: &str, callback: F) -> Result<Watcher>
    where
        F: Fn(&watcher::WatchEvent) + Send + Sync + 'static,
    {
        let normalized = path_index::normalize_path(path)?;
        if normalized != "/" && !self.index.exists(&normalized) {
            return Err(FileSystemError::NotFound(normalized).into());
        }
        let id = self.watchers.subscribe(
            normalized,
            WatchScope::Directory,
            std::sync::Arc::new(callback),
        );
        Ok(Watcher::new(self.watchers.clone(), id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::MemoryStorage;
    use crate::repository::SharePolicy;

    fn vfs() -> Vfs {
        let repo = Arc::new(Repository::new(Arc::new(MemoryStorage::new()), SharePolicy::Generous));
        Vfs::new(repo).unwrap()
    }

    #[test]
    fn create_then_read_round_trips() {
        let fs = vfs();
        fs.create_file("/hello.txt", serde_json::json!({"msg": "hi"})).unwrap();
        let snap = fs.read_file("/hello.txt").unwrap();
        assert_eq!(snap.content, serde_json::json!({"msg": "hi"}));
        assert!(fs.exists("/hello.txt"));
    }

    #[test]
    fn create_rejects_invalid_path() {
        let fs = vfs();
        let err = fs.create_file("no-leading-slash", serde_json::json!({})).unwrap_err();
        assert!(matches!(err, crate::error::TonkError::FileSystem(FileSystemError::InvalidPath(_))));
    }

    #[test]
    fn create_rejects_missing_parent() {
        let fs = vfs();
        let err = fs.create_file("/a/b/c", serde_json::json!({})).unwrap_err();
        assert!(matches!(err, crate::error::TonkError::FileSystem(FileSystemError::ParentMissing(_))));
    }

    #[test]
    fn delete_removes_path_index_entry_but_keeps_document() {
        let fs = vfs();
        fs.create_file("/a.txt", serde_json::json!({"v": 1})).unwrap();
        let descriptor_before = fs.get_metadata("/a.txt").unwrap();
        fs.delete_file("/a.txt").unwrap();

        assert!(!fs.exists("/a.txt"));
        let doc_id = DocumentId::from_raw(descriptor_before.node_doc_id);
        assert!(fs.repo.find_document(&doc_id).is_ok());
    }

    #[test]
    fn rename_preserves_pointer_and_content() {
        let fs = vfs();
        fs.create_file("/a.txt", serde_json::json!({"v": 1})).unwrap();
        let before = fs.get_metadata("/a.txt").unwrap();

        fs.rename("/a.txt", "/b.txt").unwrap();

        assert!(!fs.exists("/a.txt"));
        let after = fs.get_metadata("/b.txt").unwrap();
        assert_eq!(after.pointer, before.pointer);
        assert_eq!(fs.read_file("/b.txt").unwrap().content, serde_json::json!({"v": 1}));
    }

    #[test]
    fn rename_into_own_descendant_is_rejected() {
        let fs = vfs();
        fs.create_directory("/dir").unwrap();
        let err = fs.rename("/dir", "/dir/inner").unwrap_err();
        assert!(matches!(
            err,
            crate::error::TonkError::FileSystem(FileSystemError::AncestorConflict(_, _))
        ));
    }

    #[test]
    fn directory_watcher_fires_depth_one_only() {
        let fs = vfs();
        fs.create_directory("/d").unwrap();

        let fired = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let fired_clone = fired.clone();
        let _w = fs
            .watch_directory("/d", move |_e| {
                fired_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            })
            .unwrap();

        fs.create_file("/d/x.txt", serde_json::json!({})).unwrap();
        fs.create_directory("/d/sub").unwrap();
        fs.create_file("/d/sub/y.txt", serde_json::json!({})).unwrap();

        assert_eq!(fired.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn delete_directory_rejects_non_empty_without_recursive() {
        let fs = vfs();
        fs.create_directory("/d").unwrap();
        fs.create_file("/d/a.txt", serde_json::json!({})).unwrap();

        let err = fs.delete_directory("/d", false).unwrap_err();
        assert!(matches!(
            err,
            crate::error::TonkError::FileSystem(FileSystemError::DirectoryNotEmpty(_))
        ));
        assert!(fs.exists("/d/a.txt"));
    }

    #[test]
    fn delete_directory_recursive_removes_descendants() {
        let fs = vfs();
        fs.create_directory("/d").unwrap();
        fs.create_file("/d/a.txt", serde_json::json!({})).unwrap();

        assert!(fs.delete_directory("/d", true).unwrap());
        assert!(!fs.exists("/d"));
        assert!(!fs.exists("/d/a.txt"));
    }

    #[test]
    fn list_directory_returns_sorted_children() {
        let fs = vfs();
        fs.create_file("/b.txt", serde_json::json!({})).unwrap();
        fs.create_file("/a.txt", serde_json::json!({})).unwrap();

        let entries = fs.list_directory("/").unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }
}
