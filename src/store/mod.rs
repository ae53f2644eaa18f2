//! Coordination-store adapter.
//!
//! A [`ConfigStore`] exposes a hierarchical key/value store as the two
//! operations the data source needs:
//! - read every child of a configuration path into a [`ConfigSnapshot`]
//! - subscribe to add/update/remove notifications for those children
//!
//! Two implementations are bundled: [`MemoryConfigStore`] for tests and
//! embedding, and [`DirectoryConfigStore`], which maps paths onto directories
//! and watches them with `notify`.

pub mod fs;
pub mod memory;

pub use fs::DirectoryConfigStore;
pub use memory::MemoryConfigStore;

use crate::error::DataSourceResult;
use crate::models::{ChangeEvent, ConfigSnapshot};
use async_trait::async_trait;
use tokio::sync::mpsc;

#[async_trait]
pub trait ConfigStore: Send + Sync + 'static {
    /// Read every child key under `path` together with its value.
    ///
    /// Fails with `PathNotFound` when `path` does not exist and with
    /// `StoreUnavailable` when the store cannot be reached.
    async fn load_snapshot(&self, path: &str) -> DataSourceResult<ConfigSnapshot>;

    /// Register a watch on the children of `path`.
    ///
    /// Events for one path are delivered in the order the store applied them.
    async fn watch(&self, path: &str) -> DataSourceResult<WatchStream>;
}

/// Unbounded stream of change events for one watch registration.
///
/// The registration stays active for as long as the stream is alive; the
/// stream ends once the store drops the sending side.
pub struct WatchStream {
    events: mpsc::UnboundedReceiver<ChangeEvent>,
    _registration: Option<Box<dyn Send>>,
}

impl WatchStream {
    pub fn new(events: mpsc::UnboundedReceiver<ChangeEvent>) -> Self {
        Self {
            events,
            _registration: None,
        }
    }

    /// Attach a resource that must outlive the stream (e.g. an OS watcher handle).
    pub fn with_registration(mut self, registration: impl Send + 'static) -> Self {
        self._registration = Some(Box::new(registration));
        self
    }

    /// Wait for the next event. Returns `None` once the watch has ended.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }

    /// Take an already-queued event without waiting.
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        self.events.try_recv().ok()
    }
}

impl std::fmt::Debug for WatchStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchStream")
            .field("has_registration", &self._registration.is_some())
            .finish_non_exhaustive()
    }
}

/// Join a configuration path and a child key with a single separator.
pub fn child_path(path: &str, key: &str) -> String {
    format!("{}/{}", path.trim_end_matches('/'), key)
}
