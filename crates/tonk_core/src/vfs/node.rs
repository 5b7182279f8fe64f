//! Node descriptor and node document content shapes (§3).

use serde::{Deserialize, Serialize};

/// Discriminates the two kinds of filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    /// A file-like leaf holding JSON content and optional bytes.
    Document,
    /// A container entry; its children live as separate PathIndex entries.
    Directory,
}

/// Creation/modification wall-clock timestamps, milliseconds since epoch.
///
/// Peer-local: not a logical clock, and not comparable for ordering across
/// peers (§9 Open Questions — the source uses peer-local wall-clock millis
/// and this reimplementation preserves that rather than introducing a vector
/// clock the rest of the design doesn't otherwise need).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamps {
    /// When the entry was first created.
    pub created: i64,
    /// When the entry was last modified.
    pub modified: i64,
}

impl Timestamps {
    /// Both timestamps set to `now`.
    pub fn created_now(now: i64) -> Self {
        Self {
            created: now,
            modified: now,
        }
    }

    /// Copy of `self` with `modified` bumped to `now`.
    pub fn touch(self, now: i64) -> Self {
        Self {
            modified: now,
            ..self
        }
    }
}

/// The value stored in a [`super::path_index::PathIndex`] entry (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    /// Whether the path names a file or a directory.
    pub node_type: NodeType,
    /// The CRDT document holding this node's content.
    pub node_doc_id: String,
    /// Created/modified times for this path entry.
    pub timestamps: Timestamps,
    /// Redundant copy of `node_doc_id`, exposed to callers as `pointer` for
    /// API parity with the external host surface (§4.6).
    pub pointer: String,
}

impl NodeDescriptor {
    /// Build a descriptor whose `pointer` mirrors `node_doc_id`.
    pub fn new(node_type: NodeType, node_doc_id: String, timestamps: Timestamps) -> Self {
        Self {
            node_type,
            pointer: node_doc_id.clone(),
            node_doc_id,
            timestamps,
        }
    }
}

/// Content stored inside a file node's CRDT document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileNode {
    /// Basename, kept for convenience; the PathIndex is authoritative.
    pub name: String,
    #[serde(rename = "type")]
    node_type_tag: FileTag,
    /// Arbitrary JSON content.
    pub content: serde_json::Value,
    /// Optional base64-encoded binary payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<String>,
    /// Created/modified times, mirrored from the PathIndex entry at write time.
    pub timestamps: Timestamps,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "document")]
struct FileTag;

impl FileNode {
    /// Construct file content with no attached bytes.
    pub fn new(name: String, content: serde_json::Value, timestamps: Timestamps) -> Self {
        Self {
            name,
            node_type_tag: FileTag,
            content,
            bytes: None,
            timestamps,
        }
    }

    /// Construct file content with an attached binary blob.
    pub fn with_bytes(
        name: String,
        content: serde_json::Value,
        bytes: &[u8],
        timestamps: Timestamps,
    ) -> Self {
        use base64::Engine;
        Self {
            name,
            node_type_tag: FileTag,
            content,
            bytes: Some(base64::engine::general_purpose::STANDARD.encode(bytes)),
            timestamps,
        }
    }

    /// Decode the attached bytes, if any.
    pub fn decoded_bytes(&self) -> Option<Vec<u8>> {
        use base64::Engine;
        self.bytes
            .as_ref()
            .and_then(|b| base64::engine::general_purpose::STANDARD.decode(b).ok())
    }
}

/// Content stored inside a directory node's CRDT document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryNode {
    /// Basename, kept for convenience.
    pub name: String,
    #[serde(rename = "type")]
    node_type_tag: DirTag,
    /// Optional ordered hint of child basenames. The PathIndex remains the
    /// authoritative structure; this is advisory only (§3).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<String>>,
    /// Created/modified times.
    pub timestamps: Timestamps,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "directory")]
struct DirTag;

impl DirectoryNode {
    /// Construct an empty directory node.
    pub fn new(name: String, timestamps: Timestamps) -> Self {
        Self {
            name,
            node_type_tag: DirTag,
            children: None,
            timestamps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_node_bytes_round_trip() {
        let ts = Timestamps::created_now(0);
        let node = FileNode::with_bytes("a.bin".into(), serde_json::json!({}), b"payload", ts);
        assert_eq!(node.decoded_bytes().unwrap(), b"payload");
    }

    #[test]
    fn node_descriptor_pointer_mirrors_doc_id() {
        let ts = Timestamps::created_now(1);
        let descriptor = NodeDescriptor::new(NodeType::Document, "abc".to_string(), ts);
        assert_eq!(descriptor.pointer, descriptor.node_doc_id);
    }
}
