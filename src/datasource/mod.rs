//! Hot-reloadable data source.
//!
//! # Design Decisions
//!
//! - **`ArcSwap` for the current pool**: callers read the published pool without
//!   locking; a reload replaces it with one atomic store, so a reader sees either
//!   the old or the new pool in full
//! - **Pool and snapshot published together**: a [`PublishedPool`] pairs a pool with
//!   the snapshot it was built from, so they can never be observed out of step
//! - **Single listener task**: change events are consumed by one task, which
//!   serializes reloads without a writer lock
//! - **Build, then swap, then close**: a replacement is fully built before it is
//!   published, and the retired pool is closed only after the swap. A failed
//!   build leaves the current pool untouched
//!
//! # Swap Window
//!
//! A caller may load the old pool just before a swap and reach it after it has
//! been closed. That checkout fails with `PoolClosed`; since the pool is no
//! longer current, the data source re-reads the published pool and checks out
//! from the new one. A `PoolClosed` from the current pool is returned as is.

pub mod reload;

pub use reload::ReloadStatus;

use crate::config::DataSourceOptions;
use crate::db::{ConnectionPool, PoolFactory};
use crate::error::{DataSourceError, DataSourceResult};
use crate::models::ConfigSnapshot;
use crate::store::ConfigStore;
use arc_swap::ArcSwap;
use reload::Reloader;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// A pool together with the snapshot it was built from.
pub struct PublishedPool<P> {
    pool: P,
    snapshot: Arc<ConfigSnapshot>,
    generation: u64,
}

impl<P> PublishedPool<P> {
    pub(crate) fn new(pool: P, snapshot: ConfigSnapshot, generation: u64) -> Self {
        Self {
            pool,
            snapshot: Arc::new(snapshot),
            generation,
        }
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    pub fn snapshot(&self) -> &Arc<ConfigSnapshot> {
        &self.snapshot
    }

    /// 1 for the pool built at startup, incremented by every successful reload.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl<P: std::fmt::Debug> std::fmt::Debug for PublishedPool<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishedPool")
            .field("generation", &self.generation)
            .field("pool", &self.pool)
            .field("snapshot", &self.snapshot)
            .finish()
    }
}

/// State shared between the data source and its reload listener.
pub(crate) struct Shared<P> {
    pub(crate) current: ArcSwap<PublishedPool<P>>,
    pub(crate) status: watch::Sender<ReloadStatus>,
}

/// A connection source whose pool is rebuilt whenever its configuration changes.
///
/// Construction reads the configuration, builds the first pool and starts a
/// background listener on the configuration path. From then on every relevant
/// change event rebuilds the pool from a fresh snapshot and swaps it in.
///
/// Dropping the data source stops the listener. The last published pool is
/// released when the final [`PublishedPool`] handle is dropped.
pub struct DynamicDataSource<P: ConnectionPool> {
    shared: Arc<Shared<P>>,
    config_path: String,
    listener: JoinHandle<()>,
}

impl<P: ConnectionPool> DynamicDataSource<P> {
    /// Read the configuration, build the first pool and start watching for changes.
    ///
    /// Any failure here is fatal: `StoreUnavailable` or `PathNotFound` if the
    /// configuration cannot be read, `PoolBuildFailed` if no pool can be built
    /// from it.
    pub async fn connect<F>(
        store: Arc<dyn ConfigStore>,
        factory: F,
        options: DataSourceOptions,
    ) -> DataSourceResult<Self>
    where
        F: PoolFactory<Pool = P>,
    {
        let config_path = options.config_path;
        info!(config_path = %config_path, "Starting dynamic data source");

        // Registered before the first read so no change in between is missed.
        let events = store.watch(&config_path).await?;
        let snapshot = store.load_snapshot(&config_path).await?;
        debug!(config_path = %config_path, keys = snapshot.len(), "Loaded initial configuration");

        let pool = reload::build_pool(&factory, &snapshot).await?;
        let published = Arc::new(PublishedPool::new(pool, snapshot, 1));
        let (status, _) = watch::channel(ReloadStatus::initial());

        let shared = Arc::new(Shared {
            current: ArcSwap::new(published),
            status,
        });

        let reloader = Reloader::new(
            Arc::clone(&shared),
            store,
            factory,
            config_path.clone(),
            options.reload_on,
        );
        let listener = tokio::spawn(reloader.run(events));

        info!(config_path = %config_path, "Dynamic data source ready");
        Ok(Self {
            shared,
            config_path,
            listener,
        })
    }

    /// Check out a connection from the currently published pool.
    ///
    /// Pool failures are returned unchanged; the data source does not retry them.
    pub async fn get_connection(&self) -> DataSourceResult<P::Connection> {
        self.acquire(None).await
    }

    /// Check out a connection with explicit credentials from the currently published pool.
    pub async fn get_connection_as(
        &self,
        username: &str,
        password: &str,
    ) -> DataSourceResult<P::Connection> {
        self.acquire(Some((username, password))).await
    }

    async fn acquire(&self, credentials: Option<(&str, &str)>) -> DataSourceResult<P::Connection> {
        loop {
            let published = self.shared.current.load_full();
            let result = match credentials {
                None => published.pool.get_connection().await,
                Some((username, password)) => {
                    published.pool.get_connection_as(username, password).await
                }
            };

            match result {
                Err(DataSourceError::PoolClosed) if !self.is_current(&published) => {
                    debug!(
                        generation = published.generation,
                        "Pool retired during checkout, using the newly published pool"
                    );
                }
                other => return other,
            }
        }
    }

    fn is_current(&self, published: &Arc<PublishedPool<P>>) -> bool {
        let current = self.shared.current.load();
        Arc::ptr_eq(published, &*current)
    }

    /// The currently published pool and the snapshot it was built from.
    pub fn current(&self) -> Arc<PublishedPool<P>> {
        self.shared.current.load_full()
    }

    /// The snapshot behind the currently published pool.
    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        Arc::clone(&self.shared.current.load().snapshot)
    }

    /// Generation of the currently published pool.
    pub fn generation(&self) -> u64 {
        self.shared.current.load().generation
    }

    /// Latest reload outcome.
    pub fn status(&self) -> ReloadStatus {
        self.shared.status.borrow().clone()
    }

    /// Subscribe to reload outcomes.
    pub fn subscribe(&self) -> watch::Receiver<ReloadStatus> {
        self.shared.status.subscribe()
    }

    pub fn config_path(&self) -> &str {
        &self.config_path
    }

    /// Whether the background listener is still consuming change events.
    pub fn is_watching(&self) -> bool {
        !self.listener.is_finished()
    }
}

/// Stops the listener. A retired pool whose close has already started is
/// closed to completion in the background.
impl<P: ConnectionPool> Drop for DynamicDataSource<P> {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

impl<P: ConnectionPool> std::fmt::Debug for DynamicDataSource<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicDataSource")
            .field("config_path", &self.config_path)
            .field("generation", &self.generation())
            .field("watching", &self.is_watching())
            .finish_non_exhaustive()
    }
}
