//! Reload listener.
//!
//! One task per data source consumes the watch stream. Each triggering event
//! leads to a full re-read of the configuration path, a new pool built from it,
//! an atomic publish, and finally the close of the pool that was replaced.

use crate::datasource::{PublishedPool, Shared};
use crate::db::{ConnectionPool, PoolFactory};
use crate::error::{DataSourceError, DataSourceResult};
use crate::models::{ConfigSnapshot, DataSourceSettings, ReloadTriggers};
use crate::store::{ConfigStore, WatchStream};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Outcome of the most recent reload attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadStatus {
    /// Generation of the published pool; 1 is the pool built at startup.
    pub generation: u64,
    /// Failed reload attempts since startup.
    pub failures: u64,
    /// Error of the latest attempt, cleared by the next successful reload.
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ReloadStatus {
    pub(crate) fn initial() -> Self {
        Self {
            generation: 1,
            failures: 0,
            last_error: None,
            updated_at: Utc::now(),
        }
    }

    /// True when the latest attempt failed and an older pool is still serving.
    pub fn is_stale(&self) -> bool {
        self.last_error.is_some()
    }
}

/// Build a pool from a snapshot. Every failure is reported as `PoolBuildFailed`.
pub(crate) async fn build_pool<F: PoolFactory>(
    factory: &F,
    snapshot: &ConfigSnapshot,
) -> DataSourceResult<F::Pool> {
    let settings = DataSourceSettings::from_snapshot(snapshot)?;
    factory.open(&settings).await.map_err(|e| match e {
        e @ DataSourceError::PoolBuildFailed { .. } => e,
        other => DataSourceError::pool_build(
            other.to_string(),
            "Check the driver and connection settings",
        ),
    })
}

pub(crate) struct Reloader<F: PoolFactory> {
    shared: Arc<Shared<F::Pool>>,
    store: Arc<dyn ConfigStore>,
    factory: F,
    config_path: String,
    triggers: ReloadTriggers,
}

impl<F: PoolFactory> Reloader<F> {
    pub(crate) fn new(
        shared: Arc<Shared<F::Pool>>,
        store: Arc<dyn ConfigStore>,
        factory: F,
        config_path: String,
        triggers: ReloadTriggers,
    ) -> Self {
        Self {
            shared,
            store,
            factory,
            config_path,
            triggers,
        }
    }

    /// Consume change events until the watch ends.
    pub(crate) async fn run(self, mut events: WatchStream) {
        info!(
            config_path = %self.config_path,
            triggers = ?self.triggers,
            "Listening for configuration changes"
        );
        if self.triggers.is_empty() {
            warn!(
                config_path = %self.config_path,
                "No change kinds trigger a reload, the initial pool will be kept"
            );
        }

        while let Some(event) = events.recv().await {
            if !self.triggers.contains(event.kind) {
                debug!(key = %event.key, kind = %event.kind, "Ignoring configuration change");
                continue;
            }

            // Every reload re-reads the whole path, so queued events add nothing.
            let coalesced = self.drain_pending(&mut events);
            info!(
                key = %event.key,
                kind = %event.kind,
                coalesced,
                "Configuration change detected"
            );

            // Failures are already logged and recorded in the status channel.
            let _ = self.reload().await;
        }

        warn!(
            config_path = %self.config_path,
            "Configuration watch ended, the current pool will no longer be reloaded"
        );
    }

    fn drain_pending(&self, events: &mut WatchStream) -> usize {
        let mut coalesced = 0;
        while let Some(event) = events.try_recv() {
            if self.triggers.contains(event.kind) {
                coalesced += 1;
            }
        }
        coalesced
    }

    /// Rebuild and publish the pool. On failure the current pool keeps serving.
    pub(crate) async fn reload(&self) -> DataSourceResult<u64> {
        let result = self.try_reload().await;
        if let Err(e) = &result {
            let serving = self.shared.current.load().generation();
            error!(
                config_path = %self.config_path,
                serving_generation = serving,
                error = %e,
                suggestion = ?e.suggestion(),
                "Reload failed, keeping the current pool"
            );
            self.shared.status.send_modify(|status| {
                status.failures += 1;
                status.last_error = Some(e.to_string());
                status.updated_at = Utc::now();
            });
        }
        result
    }

    async fn try_reload(&self) -> DataSourceResult<u64> {
        let snapshot = self.store.load_snapshot(&self.config_path).await?;
        let pool = build_pool(&self.factory, &snapshot).await?;

        // Only this task publishes, so the generation read here cannot go stale.
        let generation = self.shared.current.load().generation() + 1;
        let retired = self
            .shared
            .current
            .swap(Arc::new(PublishedPool::new(pool, snapshot, generation)));
        self.shared.status.send_modify(|status| {
            status.generation = generation;
            status.last_error = None;
            status.updated_at = Utc::now();
        });
        info!(
            generation,
            retired_generation = retired.generation(),
            "Published new connection pool"
        );

        // Closed in its own task so aborting the listener cannot leave it open.
        let retired_generation = retired.generation();
        let closing = tokio::spawn(async move {
            retired.pool().close().await;
            debug!(generation = retired.generation(), "Retired pool closed");
        });
        if let Err(e) = closing.await {
            warn!(
                generation = retired_generation,
                error = %e,
                "Closing the retired pool did not complete"
            );
        }
        Ok(generation)
    }
}
