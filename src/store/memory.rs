//! In-process coordination store.
//!
//! Holds configuration paths and their children in memory and delivers change
//! events to watchers. Mutation and event emission happen under the same lock,
//! so every watcher observes events in the order the mutations were applied.

use crate::error::{DataSourceError, DataSourceResult};
use crate::models::{ChangeEvent, ChangeKind, ConfigSnapshot};
use crate::store::{ConfigStore, WatchStream};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Default)]
struct Inner {
    nodes: HashMap<String, BTreeMap<String, String>>,
    watchers: Vec<(String, mpsc::UnboundedSender<ChangeEvent>)>,
    unavailable: bool,
}

impl Inner {
    fn notify(&mut self, path: &str, event: ChangeEvent) {
        // Dropped receivers unregister their watch.
        self.watchers
            .retain(|(watched, tx)| watched != path || tx.send(event.clone()).is_ok());
    }
}

#[derive(Default)]
pub struct MemoryConfigStore {
    inner: Mutex<Inner>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with one populated configuration path.
    pub fn with_entries<K, V, I>(path: &str, entries: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let store = Self::new();
        store.create_path(path);
        for (key, value) in entries {
            store.put(path, key, value);
        }
        store
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means a panicking test thread; the map is still consistent.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create an empty configuration path. No-op if it exists.
    pub fn create_path(&self, path: &str) {
        self.lock().nodes.entry(path.to_string()).or_default();
    }

    /// Set a child value, creating the path if needed.
    ///
    /// Emits `ChildAdded` for a new key and `ChildUpdated` otherwise.
    pub fn put(&self, path: &str, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        let mut inner = self.lock();
        let children = inner.nodes.entry(path.to_string()).or_default();
        let kind = match children.insert(key.clone(), value.clone()) {
            Some(_) => ChangeKind::ChildUpdated,
            None => ChangeKind::ChildAdded,
        };
        debug!(path = %path, key = %key, kind = %kind, "Memory store child written");
        inner.notify(path, ChangeEvent::new(kind, key, value.into_bytes()));
    }

    /// Remove a child. Returns false if it did not exist.
    pub fn remove(&self, path: &str, key: &str) -> bool {
        let mut inner = self.lock();
        let removed = inner
            .nodes
            .get_mut(path)
            .and_then(|children| children.remove(key))
            .is_some();
        if removed {
            inner.notify(path, ChangeEvent::new(ChangeKind::ChildRemoved, key, Vec::new()));
        }
        removed
    }

    /// Simulate losing (or regaining) the connection to the store.
    ///
    /// While unavailable, reads and watch registrations fail with `StoreUnavailable`.
    /// Mutations still apply so tests can stage a change for later.
    pub fn set_available(&self, available: bool) {
        self.lock().unavailable = !available;
    }

    /// Number of live watch registrations on `path`.
    pub fn watcher_count(&self, path: &str) -> usize {
        let mut inner = self.lock();
        inner.watchers.retain(|(_, tx)| !tx.is_closed());
        inner.watchers.iter().filter(|(p, _)| p == path).count()
    }

    fn check_available(inner: &Inner) -> DataSourceResult<()> {
        if inner.unavailable {
            return Err(DataSourceError::store_unavailable(
                "in-memory store marked unavailable",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn load_snapshot(&self, path: &str) -> DataSourceResult<ConfigSnapshot> {
        let inner = self.lock();
        Self::check_available(&inner)?;
        let children = inner
            .nodes
            .get(path)
            .ok_or_else(|| DataSourceError::path_not_found(path))?;
        Ok(ConfigSnapshot::new(path, children.clone()))
    }

    async fn watch(&self, path: &str) -> DataSourceResult<WatchStream> {
        let mut inner = self.lock();
        Self::check_available(&inner)?;
        if !inner.nodes.contains_key(path) {
            return Err(DataSourceError::path_not_found(path));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        inner.watchers.push((path.to_string(), tx));
        Ok(WatchStream::new(rx))
    }
}

impl std::fmt::Debug for MemoryConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("MemoryConfigStore")
            .field("paths", &inner.nodes.keys().collect::<Vec<_>>())
            .field("watchers", &inner.watchers.len())
            .field("unavailable", &inner.unavailable)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PATH: &str = "/datasource";

    #[tokio::test]
    async fn test_load_snapshot_reads_all_children() {
        let store = MemoryConfigStore::with_entries(PATH, [("username", "u"), ("password", "p")]);
        let snapshot = store.load_snapshot(PATH).await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get("username"), Some("u"));
        assert_eq!(snapshot.path(), PATH);
    }

    #[tokio::test]
    async fn test_missing_path_is_path_not_found() {
        let store = MemoryConfigStore::new();
        let result = store.load_snapshot(PATH).await;
        assert!(matches!(result, Err(DataSourceError::PathNotFound { .. })));

        let result = store.watch(PATH).await;
        assert!(matches!(result, Err(DataSourceError::PathNotFound { .. })));
    }

    #[tokio::test]
    async fn test_unavailable_store() {
        let store = MemoryConfigStore::with_entries(PATH, [("username", "u")]);
        store.set_available(false);
        let result = store.load_snapshot(PATH).await;
        assert!(matches!(result, Err(DataSourceError::StoreUnavailable { .. })));

        store.set_available(true);
        assert!(store.load_snapshot(PATH).await.is_ok());
    }

    #[tokio::test]
    async fn test_watch_delivers_events_in_order() {
        let store = MemoryConfigStore::with_entries(PATH, [("username", "u")]);
        let mut events = store.watch(PATH).await.unwrap();

        store.put(PATH, "username", "u2");
        store.put(PATH, "maxPoolSize", "5");
        assert!(store.remove(PATH, "maxPoolSize"));
        assert!(!store.remove(PATH, "maxPoolSize"));

        let first = events.recv().await.unwrap();
        assert_eq!(first.kind, ChangeKind::ChildUpdated);
        assert_eq!(first.key, "username");
        assert_eq!(first.payload_lossy(), "u2");

        let second = events.recv().await.unwrap();
        assert_eq!(second.kind, ChangeKind::ChildAdded);
        assert_eq!(second.key, "maxPoolSize");

        let third = events.recv().await.unwrap();
        assert_eq!(third.kind, ChangeKind::ChildRemoved);
        assert!(third.payload.is_empty());

        assert!(events.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_watch_scoped_to_path() {
        let store = MemoryConfigStore::with_entries(PATH, [("username", "u")]);
        store.create_path("/other");
        let mut events = store.watch(PATH).await.unwrap();

        store.put("/other", "username", "x");
        assert!(events.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_dropped_watch_unregisters() {
        let store = MemoryConfigStore::with_entries(PATH, [("username", "u")]);
        let events = store.watch(PATH).await.unwrap();
        assert_eq!(store.watcher_count(PATH), 1);

        drop(events);
        store.put(PATH, "username", "u2");
        assert_eq!(store.watcher_count(PATH), 0);
    }
}
