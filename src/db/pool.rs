//! Connection pool capability.
//!
//! The reload logic only depends on these traits, so any pooling backend can be
//! published by a [`DynamicDataSource`](crate::DynamicDataSource), including
//! fakes in tests. The bundled backend is [`SqlxPoolFactory`](super::SqlxPoolFactory).

use crate::error::DataSourceResult;
use crate::models::DataSourceSettings;
use async_trait::async_trait;

/// A pool of reusable database connections built from one fixed configuration.
///
/// A pool never changes its configuration; new settings always produce a new pool.
#[async_trait]
pub trait ConnectionPool: Send + Sync + 'static {
    type Connection: Send + 'static;

    /// Check out a connection using the pool's own credentials.
    async fn get_connection(&self) -> DataSourceResult<Self::Connection>;

    /// Check out a connection authenticated with explicit credentials.
    async fn get_connection_as(
        &self,
        username: &str,
        password: &str,
    ) -> DataSourceResult<Self::Connection>;

    /// Stop handing out connections and release pooled resources.
    ///
    /// After `close` starts, checkouts fail with `PoolClosed`. Connections
    /// already checked out are not force-closed.
    async fn close(&self);

    /// The settings this pool was built from.
    fn settings(&self) -> &DataSourceSettings;
}

/// Builds pools from settings.
#[async_trait]
pub trait PoolFactory: Send + Sync + 'static {
    type Pool: ConnectionPool;

    /// Build a new pool. Failures are reported as `PoolBuildFailed`.
    async fn open(&self, settings: &DataSourceSettings) -> DataSourceResult<Self::Pool>;
}
