//! The CRDT document type shared by the PathIndex and every VFS node.
//!
//! A [`Document`] wraps a [`yrs::Doc`] behind the narrow contract the rest of
//! the crate depends on: local mutation, remote-update ingestion, full-state
//! snapshot, and change notification. Callers never touch `yrs` types
//! directly outside this module.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::types::ToJson;
use yrs::{Doc, Map, MapRef, ReadTxn, Subscription as YrsSubscription, Transact, Update};

use crate::error::{Result, TonkError};

/// Opaque identifier for a CRDT document.
///
/// Generated with [`uuid::Uuid::new_v4`], matching the teacher's own
/// doc-ID generation for files and nodes (`workspace_doc.rs`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct DocumentId(String);

impl DocumentId {
    /// Generate a fresh random document ID.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wrap an existing string as a document ID without validation.
    ///
    /// Used when round-tripping IDs already embedded in bundle archives or
    /// PathIndex entries, where re-deriving the canonical encoding would be
    /// wasted work.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Borrow the underlying string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for DocumentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A set of encoded CRDT operations produced by a single [`Document::change`]
/// call, ready to be merged into another replica via [`Document::merge`].
#[derive(Debug, Clone)]
pub struct Change(pub Vec<u8>);

/// Live subscription to a document's change stream.
///
/// Dropping the subscription or calling [`Subscription::stop`] detaches the
/// observer; no further callback invocations occur afterward.
pub struct Subscription {
    _inner: YrsSubscription,
}

impl Subscription {
    /// Detach the observer. Equivalent to dropping the handle.
    pub fn stop(self) {
        drop(self);
    }
}

/// A mergeable CRDT document.
///
/// Internally this is a single top-level `Y.Map` named `"root"`, which is
/// sufficient to represent every JSON-shaped value the VFS stores (node
/// descriptors, file content, the PathIndex map). Callers interact with it
/// through `serde_json::Value` at the mutator boundary.
#[derive(Debug)]
pub struct Document {
    doc: Doc,
    root: MapRef,
    seq: Arc<AtomicU64>,
}

impl Document {
    const ROOT_KEY: &'static str = "root";

    /// Create a new, empty document.
    pub fn new() -> Self {
        let doc = Doc::new();
        let root = doc.get_or_insert_map(Self::ROOT_KEY);
        Self {
            doc,
            root,
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Apply a local mutation.
    ///
    /// The mutator receives an exclusive view (the document's root map and a
    /// write transaction) and mutates it directly. If the mutator returns an
    /// error, the transaction still commits whatever partial `yrs` ops were
    /// queued before the error was returned is not possible to roll back at
    /// this layer, so mutators must validate arguments *before* touching the
    /// map and only return `Err` prior to any write.
    pub fn change<F>(&self, mutator: F) -> Result<Change>
    where
        F: FnOnce(&MapRef, &mut yrs::TransactionMut) -> Result<()>,
    {
        let before = self.doc.transact().state_vector();
        let mut txn = self.doc.transact_mut();
        mutator(&self.root, &mut txn)?;
        let update = txn.encode_diff_v1(&before);
        self.seq.fetch_add(1, Ordering::SeqCst);
        drop(txn);
        Ok(Change(update))
    }

    /// Merge a remote update into this document.
    pub fn merge(&self, change: &[u8]) -> Result<()> {
        let update = Update::decode_v1(change)
            .map_err(|e| TonkError::Internal(format!("corrupt CRDT update: {e}")))?;
        let mut txn = self.doc.transact_mut();
        txn.apply_update(update)
            .map_err(|e| TonkError::Internal(format!("CRDT merge failed: {e}")))?;
        self.seq.fetch_add(1, Ordering::SeqCst);
        drop(txn);
        Ok(())
    }

    /// Export the full document state as a binary snapshot.
    pub fn state(&self) -> Vec<u8> {
        self.doc.transact().encode_state_as_update_v1(&yrs::StateVector::default())
    }

    /// Reconstruct a document from a binary snapshot produced by [`Document::state`].
    pub fn load(bytes: &[u8]) -> Result<Self> {
        let doc = Document::new();
        if !bytes.is_empty() {
            doc.merge(bytes)?;
        }
        Ok(doc)
    }

    /// Current state vector, used by the sync protocol to compute diffs.
    pub fn state_vector(&self) -> Vec<u8> {
        self.doc.transact().state_vector().encode_v1()
    }

    /// Encode only the operations the peer behind `remote_sv` is missing.
    pub fn diff_since(&self, remote_sv: &[u8]) -> Result<Vec<u8>> {
        let sv = yrs::StateVector::decode_v1(remote_sv)
            .map_err(|e| TonkError::Internal(format!("corrupt state vector: {e}")))?;
        Ok(self.doc.transact().encode_state_as_update_v1(&sv))
    }

    /// Read the root map as a JSON value via a read-only transaction.
    pub fn to_json(&self) -> serde_json::Value {
        let txn = self.doc.transact();
        yrs_value_to_json(&self.root.to_json(&txn))
    }

    /// Register a callback invoked after every local `change` and remote `merge`.
    ///
    /// Delivery is at-least-once: the sequence number attached to each
    /// notification lets callers deduplicate (§4.1). The counter itself is
    /// bumped by `change`/`merge` directly (see [`Document::seq`]), so this
    /// callback just reports the value that commit just produced — it is
    /// safe to register more than one `on_change` observer on the same
    /// document without skewing the counter.
    pub fn on_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        let seq = self.seq.clone();
        let sub = self.doc.observe_update_v1(move |_txn, _event| {
            callback(seq.load(Ordering::SeqCst));
        });
        Subscription {
            _inner: sub.expect("observe_update_v1: failed to acquire transaction"),
        }
    }

    /// Current value of the monotonic per-document change counter (§4.1),
    /// bumped once by every local [`Document::change`] and remote
    /// [`Document::merge`] call, whether or not anyone is subscribed via
    /// [`Document::on_change`]. Lets watcher notifications attach a
    /// de-duplicatable sequence number for a document nobody has
    /// subscribed to directly.
    pub fn seq(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    /// Borrow the raw `yrs::Doc`, for components (e.g. the sync protocol)
    /// that need direct access to state vectors or awareness.
    pub(crate) fn raw(&self) -> &Doc {
        &self.doc
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

fn yrs_value_to_json(value: &yrs::Any) -> serde_json::Value {
    match value {
        yrs::Any::Null | yrs::Any::Undefined => serde_json::Value::Null,
        yrs::Any::Bool(b) => serde_json::Value::Bool(*b),
        yrs::Any::Number(n) => serde_json::json!(n),
        yrs::Any::BigInt(i) => serde_json::json!(i),
        yrs::Any::String(s) => serde_json::Value::String(s.to_string()),
        yrs::Any::Buffer(b) => {
            use base64::Engine;
            serde_json::Value::String(base64::engine::general_purpose::STANDARD.encode(b.as_ref()))
        }
        yrs::Any::Array(arr) => {
            serde_json::Value::Array(arr.iter().map(yrs_value_to_json).collect())
        }
        yrs::Any::Map(map) => {
            let mut obj = serde_json::Map::new();
            for (k, v) in map.iter() {
                obj.insert(k.clone(), yrs_value_to_json(v));
            }
            serde_json::Value::Object(obj)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_document_round_trips_through_state() {
        let doc = Document::new();
        doc.change(|root, txn| {
            root.insert(txn, "greeting", "hello");
            Ok(())
        })
        .unwrap();

        let bytes = doc.state();
        let restored = Document::load(&bytes).unwrap();
        assert_eq!(
            restored.to_json()["greeting"],
            serde_json::json!("hello")
        );
    }

    #[test]
    fn merge_is_commutative_for_distinct_keys() {
        let a = Document::new();
        let b = Document::new();

        let change_a = a
            .change(|root, txn| {
                root.insert(txn, "from_a", "x");
                Ok(())
            })
            .unwrap();
        let change_b = b
            .change(|root, txn| {
                root.insert(txn, "from_b", "y");
                Ok(())
            })
            .unwrap();

        a.merge(&change_b.0).unwrap();
        b.merge(&change_a.0).unwrap();

        assert_eq!(a.to_json(), b.to_json());
    }

    #[test]
    fn on_change_fires_with_increasing_sequence() {
        let doc = Document::new();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let _sub = doc.on_change(move |n| seen_clone.lock().unwrap().push(n));

        doc.change(|root, txn| {
            root.insert(txn, "a", 1i64);
            Ok(())
        })
        .unwrap();
        doc.change(|root, txn| {
            root.insert(txn, "b", 2i64);
            Ok(())
        })
        .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.as_slice(), &[1, 2]);
    }

    #[test]
    fn document_id_is_url_safe_and_unique() {
        let a = DocumentId::new();
        let b = DocumentId::new();
        assert_ne!(a, b);
        assert!(a.as_str().chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
