//! Watcher registry for file and directory subscriptions (§4.6, §9).
//!
//! Grounded on the filesystem callback registry pattern: a panic-isolated,
//! `RwLock`-guarded map of subscription ID to callback. A directory watcher
//! differs only in scope — it fires for direct children of the watched path,
//! never for grandchildren (§4.6 "Directory watch scope").

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::crdt::DocumentId;

/// A change notification delivered to a watcher callback.
///
/// Delivery is at-least-once (§4.1, §4.6); the `seq` lets subscribers
/// de-duplicate repeated notifications of the same logical state, e.g.
/// after a transport reconnect re-establishes watchers (§4.7).
#[derive(Debug, Clone)]
pub struct WatchEvent {
    /// The path this event concerns — the watched path itself for a file
    /// watcher, or the changed child's path for a directory watcher.
    pub path: String,
    /// Document whose state changed.
    pub doc_id: DocumentId,
    /// Monotonic sequence number from the underlying document's change log.
    pub seq: u64,
}

type WatchCallback = Arc<dyn Fn(&WatchEvent) + Send + Sync>;

/// Unique handle returned by [`WatcherRegistry::subscribe`].
pub type SubscriptionId = u64;

/// Scope of a single watch registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchScope {
    /// Fires for any change to the target file's document.
    File,
    /// Fires only for direct children of the target directory path.
    Directory,
}

struct Entry {
    path: String,
    scope: WatchScope,
    callback: WatchCallback,
}

/// Thread-safe registry of active watchers.
///
/// A [`Watcher`] handle is attached to a [`DocumentId`] at creation time
/// (resolved once via the PathIndex), so it keeps observing the same
/// underlying document across a rename of its path — rename mutates the
/// PathIndex, not the document identity (§4.6).
#[derive(Default)]
pub struct WatcherRegistry {
    entries: RwLock<HashMap<SubscriptionId, Entry>>,
    next_id: AtomicU64,
}

impl WatcherRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a watcher for `path` with the given scope.
    pub fn subscribe(&self, path: String, scope: WatchScope, callback: WatchCallback) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.entries.write().unwrap().insert(
            id,
            Entry {
                path,
                scope,
                callback,
            },
        );
        id
    }

    /// Detach a watcher. After this returns, its callback will not fire again.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.entries.write().unwrap().remove(&id).is_some()
    }

    /// Notify every watcher whose scope covers `changed_path`.
    ///
    /// Callback panics are caught and logged so one misbehaving subscriber
    /// can't suppress delivery to the others (§7 watcher-callback policy).
    pub fn notify(&self, changed_path: &str, doc_id: &DocumentId, seq: u64) {
        let entries = self.entries.read().unwrap();
        for entry in entries.values() {
            let fires = match entry.scope {
                WatchScope::File => entry.path == changed_path,
                WatchScope::Directory => {
                    super::path_index::parent_of(changed_path).as_deref() == Some(entry.path.as_str())
                }
            };
            if !fires {
                continue;
            }

            let event = WatchEvent {
                path: changed_path.to_string(),
                doc_id: doc_id.clone(),
                seq,
            };
            let callback = entry.callback.clone();
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback(&event);
            }));
            if result.is_err() {
                log::warn!("watcher callback for '{}' panicked; watcher remains registered", entry.path);
            }
        }
    }

    /// Number of currently active subscriptions, for reconnect bookkeeping.
    pub fn active_paths(&self) -> Vec<(String, WatchScope)> {
        self.entries
            .read()
            .unwrap()
            .values()
            .map(|e| (e.path.clone(), e.scope))
            .collect()
    }
}

/// An active subscription handle returned to VFS callers from `watch_file`
/// / `watch_directory`.
pub struct Watcher {
    registry: Arc<WatcherRegistry>,
    id: SubscriptionId,
}

impl Watcher {
    pub(crate) fn new(registry: Arc<WatcherRegistry>, id: SubscriptionId) -> Self {
        Self { registry, id }
    }

    /// Detach the watcher. Equivalent to dropping the handle.
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.registry.unsubscribe(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn directory_watch_fires_for_direct_child_only() {
        let registry = Arc::new(WatcherRegistry::new());
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();

        let id = registry.subscribe(
            "/d".to_string(),
            WatchScope::Directory,
            Arc::new(move |_e| {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        registry.notify("/d/x.txt", &DocumentId::new(), 1);
        registry.notify("/d/sub", &DocumentId::new(), 2);
        registry.notify("/d/sub/y.txt", &DocumentId::new(), 3);

        assert_eq!(fired.load(Ordering::SeqCst), 2);
        registry.unsubscribe(id);
    }

    #[test]
    fn file_watch_fires_only_for_exact_path() {
        let registry = Arc::new(WatcherRegistry::new());
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();

        registry.subscribe(
            "/a.txt".to_string(),
            WatchScope::File,
            Arc::new(move |_e| {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        registry.notify("/a.txt", &DocumentId::new(), 1);
        registry.notify("/b.txt", &DocumentId::new(), 2);

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn watcher_drop_unsubscribes() {
        let registry = Arc::new(WatcherRegistry::new());
        let id = registry.subscribe(
            "/a.txt".to_string(),
            WatchScope::File,
            Arc::new(|_e| {}),
        );
        let watcher = Watcher::new(registry.clone(), id);
        drop(watcher);
        assert!(registry.active_paths().is_empty());
    }

    #[test]
    fn callback_panic_does_not_suppress_other_watchers() {
        let registry = Arc::new(WatcherRegistry::new());
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();

        registry.subscribe("/a.txt".to_string(), WatchScope::File, Arc::new(|_e| panic!("boom")));
        registry.subscribe(
            "/a.txt".to_string(),
            WatchScope::File,
            Arc::new(move |_e| {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        registry.notify("/a.txt", &DocumentId::new(), 1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
