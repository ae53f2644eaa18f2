//! Shared helpers for integration tests: an instrumented fake pool backend.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use zk_datasource::models::{ConfigSnapshot, DataSourceSettings};
use zk_datasource::store::MemoryConfigStore;
use zk_datasource::{
    ConnectionPool, DataSourceError, DataSourceResult, DynamicDataSource, PoolFactory,
    ReloadStatus,
};

pub const PATH: &str = "/datasource";
pub const WAIT: Duration = Duration::from_secs(10);

/// Host name that makes the fake factory fail, like an unreachable database.
pub const UNREACHABLE: &str = "unreachable";

pub fn scenario_entries() -> Vec<(&'static str, &'static str)> {
    vec![
        ("driverClassName", "org.drv.X"),
        ("dbJDBCUrl", "jdbc:x://h/db"),
        ("username", "u"),
        ("password", "p"),
    ]
}

pub fn scenario_store() -> Arc<MemoryConfigStore> {
    Arc::new(MemoryConfigStore::with_entries(PATH, scenario_entries()))
}

/// What the fake records about one pool it built.
#[derive(Debug)]
pub struct PoolProbe {
    pub id: usize,
    pub settings: DataSourceSettings,
    closed: AtomicBool,
    close_calls: AtomicUsize,
    /// Every checkout call, successful or not.
    attempts: AtomicUsize,
    checkouts: AtomicUsize,
    exhausted: AtomicBool,
    /// Published generation observed when close() ran; 0 if never closed.
    generation_at_close: AtomicU64,
}

impl PoolProbe {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn checkouts(&self) -> usize {
        self.checkouts.load(Ordering::SeqCst)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Make checkouts fail as if every connection were in use.
    pub fn set_exhausted(&self, exhausted: bool) {
        self.exhausted.store(exhausted, Ordering::SeqCst);
    }

    pub fn generation_at_close(&self) -> u64 {
        self.generation_at_close.load(Ordering::SeqCst)
    }
}

type CloseHook = Box<dyn Fn() -> u64 + Send + Sync>;

#[derive(Default)]
struct FactoryState {
    built: Mutex<Vec<Arc<PoolProbe>>>,
    close_hook: Mutex<Option<CloseHook>>,
    close_delay: Mutex<Option<Duration>>,
}

/// Pool factory that records every pool it builds.
///
/// Building fails with `PoolBuildFailed` when the URL mentions [`UNREACHABLE`].
#[derive(Clone, Default)]
pub struct FakeFactory {
    state: Arc<FactoryState>,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn built(&self) -> Vec<Arc<PoolProbe>> {
        self.state.built.lock().unwrap().clone()
    }

    pub fn built_count(&self) -> usize {
        self.state.built.lock().unwrap().len()
    }

    pub fn probe(&self, id: usize) -> Arc<PoolProbe> {
        Arc::clone(&self.state.built.lock().unwrap()[id])
    }

    /// Record the value returned by `hook` on every close.
    pub fn on_close(&self, hook: impl Fn() -> u64 + Send + Sync + 'static) {
        *self.state.close_hook.lock().unwrap() = Some(Box::new(hook));
    }

    /// Make every close take `delay` before the pool is marked closed.
    pub fn set_close_delay(&self, delay: Duration) {
        *self.state.close_delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl PoolFactory for FakeFactory {
    type Pool = FakePool;

    async fn open(&self, settings: &DataSourceSettings) -> DataSourceResult<FakePool> {
        tokio::task::yield_now().await;
        if settings.url.contains(UNREACHABLE) {
            return Err(DataSourceError::pool_build(
                format!("Failed to connect to {}", settings.url),
                "Check that the server is running and accessible",
            ));
        }

        let mut built = self.state.built.lock().unwrap();
        let probe = Arc::new(PoolProbe {
            id: built.len(),
            settings: settings.clone(),
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
            checkouts: AtomicUsize::new(0),
            exhausted: AtomicBool::new(false),
            generation_at_close: AtomicU64::new(0),
        });
        built.push(Arc::clone(&probe));

        Ok(FakePool {
            probe,
            state: Arc::clone(&self.state),
        })
    }
}

pub struct FakePool {
    probe: Arc<PoolProbe>,
    state: Arc<FactoryState>,
}

impl FakePool {
    pub fn id(&self) -> usize {
        self.probe.id
    }

    fn checkout(&self, user: Option<String>) -> DataSourceResult<FakeConnection> {
        self.probe.attempts.fetch_add(1, Ordering::SeqCst);
        if self.probe.is_closed() {
            return Err(DataSourceError::PoolClosed);
        }
        if self.probe.exhausted.load(Ordering::SeqCst) {
            return Err(DataSourceError::acquisition(
                "Timed out waiting for a pooled connection",
                "Raise maxPoolSize or release connections sooner",
            ));
        }
        self.probe.checkouts.fetch_add(1, Ordering::SeqCst);
        Ok(FakeConnection {
            pool_id: self.probe.id,
            user,
            probe: Arc::clone(&self.probe),
        })
    }
}

#[async_trait]
impl ConnectionPool for FakePool {
    type Connection = FakeConnection;

    async fn get_connection(&self) -> DataSourceResult<FakeConnection> {
        // Give reloads a chance to interleave with checkouts.
        tokio::task::yield_now().await;
        self.checkout(self.probe.settings.username.clone())
    }

    async fn get_connection_as(
        &self,
        username: &str,
        _password: &str,
    ) -> DataSourceResult<FakeConnection> {
        tokio::task::yield_now().await;
        self.checkout(Some(username.to_string()))
    }

    async fn close(&self) {
        let delay = *self.state.close_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(hook) = self.state.close_hook.lock().unwrap().as_ref() {
            self.probe
                .generation_at_close
                .store(hook(), Ordering::SeqCst);
        }
        self.probe.close_calls.fetch_add(1, Ordering::SeqCst);
        self.probe.closed.store(true, Ordering::SeqCst);
    }

    fn settings(&self) -> &DataSourceSettings {
        &self.probe.settings
    }
}

/// A checked-out fake connection. Keeps working after its pool is closed.
#[derive(Debug)]
pub struct FakeConnection {
    pub pool_id: usize,
    pub user: Option<String>,
    probe: Arc<PoolProbe>,
}

impl FakeConnection {
    /// The login user, as a `select user()` would report it.
    pub fn reported_user(&self) -> &str {
        self.user.as_deref().unwrap_or("")
    }

    /// URL of the database this connection talks to.
    pub fn url(&self) -> &str {
        &self.probe.settings.url
    }
}

/// Wait until the reload status satisfies `pred`.
pub async fn wait_for_status<P: ConnectionPool>(
    source: &DynamicDataSource<P>,
    mut pred: impl FnMut(&ReloadStatus) -> bool,
) -> ReloadStatus {
    let mut rx = source.subscribe();
    let status = tokio::time::timeout(WAIT, rx.wait_for(|s| pred(s)))
        .await
        .expect("timed out waiting for reload status")
        .expect("reload status channel closed");
    status.clone()
}

/// Poll `cond` until it holds.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("timed out waiting for condition");
}

pub fn snapshot_value(snapshot: &ConfigSnapshot, key: &str) -> Option<String> {
    snapshot.get(key).map(String::from)
}
