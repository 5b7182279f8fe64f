//! PathIndex: the single CRDT document mapping normalized absolute paths to
//! [`NodeDescriptor`]s (§3, §4.5).

use std::sync::Arc;

use yrs::{Map, MapRef, TransactionMut};

use super::node::NodeDescriptor;
use crate::crdt::Document;
use crate::error::{FileSystemError, Result, TonkError};

/// Normalize a path per §3/§4.5: require a leading slash, collapse `//`,
/// reject `.` and `..` segments, strip a trailing slash (except root).
pub fn normalize_path(path: &str) -> Result<String> {
    if !path.starts_with('/') {
        return Err(FileSystemError::InvalidPath(path.to_string()).into());
    }

    let mut segments = Vec::new();
    for segment in path.split('/') {
        if segment.is_empty() {
            continue;
        }
        if segment == "." || segment == ".." {
            return Err(FileSystemError::InvalidPath(path.to_string()).into());
        }
        segments.push(segment);
    }

    if segments.is_empty() {
        return Ok("/".to_string());
    }
    Ok(format!("/{}", segments.join("/")))
}

/// The parent of a normalized path, or `None` for root.
pub fn parent_of(normalized: &str) -> Option<String> {
    if normalized == "/" {
        return None;
    }
    let idx = normalized.rfind('/').unwrap();
    if idx == 0 {
        Some("/".to_string())
    } else {
        Some(normalized[..idx].to_string())
    }
}

/// The basename of a normalized path. Root has no basename.
pub fn basename(normalized: &str) -> Option<&str> {
    if normalized == "/" {
        return None;
    }
    normalized.rfind('/').map(|idx| &normalized[idx + 1..])
}

/// True if `ancestor` is `descendant` or a prefix directory of it.
pub fn is_ancestor_or_self(ancestor: &str, descendant: &str) -> bool {
    if ancestor == "/" {
        return true;
    }
    descendant == ancestor || descendant.starts_with(&format!("{ancestor}/"))
}

/// Thin wrapper over a [`Document`] whose root map is `path -> NodeDescriptor`.
///
/// Root (`/`) is never stored as an entry; its existence is implicit (§3).
pub struct PathIndex {
    doc: Arc<Document>,
}

impl PathIndex {
    /// Wrap a freshly created, empty PathIndex document.
    pub fn new() -> Self {
        Self { doc: Arc::new(Document::new()) }
    }

    /// Wrap an existing document as a PathIndex (e.g. after bundle load).
    pub fn from_document(doc: Document) -> Self {
        Self { doc: Arc::new(doc) }
    }

    /// Borrow the underlying CRDT document, e.g. for sync or persistence.
    pub fn document(&self) -> &Document {
        &self.doc
    }

    /// Clone the shared handle to the underlying document. Cloning the
    /// returned `Arc` aliases this exact document — mutations through either
    /// handle are visible through the other, unlike round-tripping through
    /// [`Document::state`]/[`Document::load`].
    pub fn document_handle(&self) -> Arc<Document> {
        self.doc.clone()
    }

    /// Look up the descriptor at `normalized_path`.
    pub fn get(&self, normalized_path: &str) -> Option<NodeDescriptor> {
        if normalized_path == "/" {
            return None;
        }
        let value = self.doc.to_json();
        value
            .get(normalized_path)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// True if an entry exists at `normalized_path`, or it is root.
    pub fn exists(&self, normalized_path: &str) -> bool {
        normalized_path == "/" || self.get(normalized_path).is_some()
    }

    /// Insert or overwrite a single entry within one CRDT change.
    pub fn insert(&self, normalized_path: &str, descriptor: &NodeDescriptor) -> Result<()> {
        let json = serde_json::to_string(descriptor)
            .map_err(|e| TonkError::Internal(format!("descriptor serialize failed: {e}")))?;
        self.doc.change(|root, txn| {
            set_entry(root, txn, normalized_path, &json);
            Ok(())
        })?;
        Ok(())
    }

    /// Remove a single entry. No-op if absent.
    pub fn remove(&self, normalized_path: &str) -> Result<()> {
        self.doc.change(|root, txn| {
            root.remove(txn, normalized_path);
            Ok(())
        })?;
        Ok(())
    }

    /// Atomically rename one entry (file case): remove `old`, insert the
    /// same descriptor (with refreshed basename metadata left to the caller)
    /// under `new`.
    pub fn rename_one(&self, old: &str, new: &str, descriptor: &NodeDescriptor) -> Result<()> {
        let json = serde_json::to_string(descriptor)
            .map_err(|e| TonkError::Internal(format!("descriptor serialize failed: {e}")))?;
        self.doc.change(|root, txn| {
            root.remove(txn, old);
            set_entry(root, txn, new, &json);
            Ok(())
        })?;
        Ok(())
    }

    /// Atomically rename a directory and every descendant entry sharing its
    /// path as a prefix, within a single CRDT change (§4.6 rename algorithm).
    pub fn rename_subtree(&self, old_prefix: &str, new_prefix: &str) -> Result<()> {
        let current: Vec<(String, NodeDescriptor)> = self.list_prefix(old_prefix);

        self.doc.change(|root, txn| {
            for (path, descriptor) in &current {
                let rekeyed = format!("{new_prefix}{}", &path[old_prefix.len()..]);
                let json = serde_json::to_string(descriptor).map_err(|e| {
                    TonkError::Internal(format!("descriptor serialize failed: {e}"))
                })?;
                root.remove(txn, path.as_str());
                set_entry(root, txn, &rekeyed, &json);
            }
            Ok(())
        })?;
        Ok(())
    }

    /// Every entry whose path is `prefix` or starts with `prefix/`.
    pub fn list_prefix(&self, prefix: &str) -> Vec<(String, NodeDescriptor)> {
        let value = self.doc.to_json();
        let obj = match value.as_object() {
            Some(o) => o,
            None => return Vec::new(),
        };
        obj.iter()
            .filter(|(path, _)| is_ancestor_or_self(prefix, path))
            .filter_map(|(path, v)| {
                serde_json::from_value::<NodeDescriptor>(v.clone())
                    .ok()
                    .map(|d| (path.clone(), d))
            })
            .collect()
    }

    /// Immediate children of `dir_path` (entries whose parent is exactly
    /// `dir_path`), used for `list_directory` (§4.6).
    pub fn list_direct_children(&self, dir_path: &str) -> Vec<(String, NodeDescriptor)> {
        let value = self.doc.to_json();
        let obj = match value.as_object() {
            Some(o) => o,
            None => return Vec::new(),
        };
        obj.iter()
            .filter(|(path, _)| parent_of(path).as_deref() == Some(dir_path))
            .filter_map(|(path, v)| {
                serde_json::from_value::<NodeDescriptor>(v.clone())
                    .ok()
                    .map(|d| (path.clone(), d))
            })
            .collect()
    }
}

impl Default for PathIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn set_entry(root: &MapRef, txn: &mut TransactionMut, path: &str, json: &str) {
    root.insert(txn, path, json.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::node::{NodeType, Timestamps};

    #[test]
    fn normalize_requires_leading_slash() {
        assert!(normalize_path("no-leading-slash").is_err());
    }

    #[test]
    fn normalize_rejects_dot_segments() {
        assert!(normalize_path("/a/./b").is_err());
        assert!(normalize_path("/a/../b").is_err());
    }

    #[test]
    fn normalize_collapses_double_slash() {
        assert_eq!(normalize_path("/a//b").unwrap(), "/a/b");
    }

    #[test]
    fn normalize_strips_trailing_slash() {
        assert_eq!(normalize_path("/a/b/").unwrap(), "/a/b");
    }

    #[test]
    fn parent_of_root_is_none() {
        assert_eq!(parent_of("/"), None);
    }

    #[test]
    fn parent_of_top_level_is_root() {
        assert_eq!(parent_of("/a"), Some("/".to_string()));
    }

    #[test]
    fn insert_then_get_round_trips() {
        let index = PathIndex::new();
        let ts = Timestamps::created_now(1);
        let descriptor = NodeDescriptor::new(NodeType::Document, "doc1".to_string(), ts);
        index.insert("/a.txt", &descriptor).unwrap();
        assert_eq!(index.get("/a.txt"), Some(descriptor));
        assert!(index.exists("/a.txt"));
    }

    #[test]
    fn remove_clears_entry() {
        let index = PathIndex::new();
        let ts = Timestamps::created_now(1);
        let descriptor = NodeDescriptor::new(NodeType::Document, "doc1".to_string(), ts);
        index.insert("/a.txt", &descriptor).unwrap();
        index.remove("/a.txt").unwrap();
        assert!(!index.exists("/a.txt"));
    }

    #[test]
    fn rename_subtree_rekeys_all_descendants() {
        let index = PathIndex::new();
        let ts = Timestamps::created_now(1);
        let dir = NodeDescriptor::new(NodeType::Directory, "dir1".to_string(), ts);
        let child = NodeDescriptor::new(NodeType::Document, "doc1".to_string(), ts);
        index.insert("/d", &dir).unwrap();
        index.insert("/d/x.txt", &child).unwrap();

        index.rename_subtree("/d", "/e").unwrap();

        assert!(!index.exists("/d"));
        assert!(!index.exists("/d/x.txt"));
        assert!(index.exists("/e"));
        assert!(index.exists("/e/x.txt"));
    }

    #[test]
    fn list_direct_children_excludes_grandchildren() {
        let index = PathIndex::new();
        let ts = Timestamps::created_now(1);
        let dir = NodeDescriptor::new(NodeType::Directory, "dir1".to_string(), ts);
        let sub = NodeDescriptor::new(NodeType::Directory, "dir2".to_string(), ts);
        let leaf = NodeDescriptor::new(NodeType::Document, "doc1".to_string(), ts);
        index.insert("/d", &dir).unwrap();
        index.insert("/d/sub", &sub).unwrap();
        index.insert("/d/sub/y.txt", &leaf).unwrap();

        let children = index.list_direct_children("/d");
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].0, "/d/sub");
    }
}
