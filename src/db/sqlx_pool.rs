//! sqlx-backed connection pools.
//!
//! This module provides the bundled [`PoolFactory`] implementation using
//! database-specific pools (MySqlPool, PgPool, SqlitePool) to ensure full type
//! support.
//!
//! # Credential overrides
//!
//! `get_connection_as` with credentials other than the snapshot's lazily builds
//! one secondary pool per credential pair. A `OnceCell` per pair ensures
//! single-flight creation, so concurrent first requests share one pool.
//! Secondary pools live and die with the primary pool.

use crate::db::pool::{ConnectionPool, PoolFactory};
use crate::error::{DataSourceError, DataSourceResult};
use crate::models::{DataSourceSettings, DatabaseType};
use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{
    Connection, MySql, MySqlPool, PgPool, Postgres, Sqlite, SqlitePool,
    mysql::MySqlConnectOptions, mysql::MySqlPoolOptions, postgres::PgConnectOptions,
    postgres::PgPoolOptions, sqlite::SqliteConnectOptions, sqlite::SqlitePoolOptions,
};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{OnceCell, RwLock as TokioRwLock};
use tracing::{debug, info};

/// Database-specific connection pool (avoids AnyPool limitations).
#[derive(Debug, Clone)]
pub enum DbPool {
    MySql(MySqlPool),
    Postgres(PgPool),
    SQLite(SqlitePool),
}

impl DbPool {
    /// Close the connection pool.
    pub async fn close(&self) {
        crate::db_dispatch!(DbPool, self, |pool| pool.close().await)
    }

    /// Get the database type for this pool.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbPool::MySql(_) => DatabaseType::MySQL,
            DbPool::Postgres(_) => DatabaseType::PostgreSQL,
            DbPool::SQLite(_) => DatabaseType::SQLite,
        }
    }

    /// Check out a connection.
    ///
    /// Every failure except a closed pool is a `ConnectionAcquisitionFailed`,
    /// including driver errors raised while opening a new pooled connection.
    pub async fn acquire(&self) -> DataSourceResult<DbConnection> {
        let result = match self {
            DbPool::MySql(pool) => pool.acquire().await.map(DbConnection::MySql),
            DbPool::Postgres(pool) => pool.acquire().await.map(DbConnection::Postgres),
            DbPool::SQLite(pool) => pool.acquire().await.map(DbConnection::SQLite),
        };
        result.map_err(|e| acquisition_error(self.db_type(), e))
    }

    /// Current pool occupancy.
    pub fn status(&self) -> PoolStatus {
        crate::db_dispatch!(DbPool, self, |pool| PoolStatus {
            size: pool.size(),
            idle: pool.num_idle(),
            closed: pool.is_closed(),
        })
    }
}

/// Map a checkout error. Query errors go through `From<sqlx::Error>` instead.
fn acquisition_error(db_type: DatabaseType, err: sqlx::Error) -> DataSourceError {
    match err {
        sqlx::Error::PoolClosed => DataSourceError::PoolClosed,
        sqlx::Error::PoolTimedOut => DataSourceError::from(err),
        other => DataSourceError::acquisition(
            format!("Failed to acquire a {} connection: {}", db_type, other),
            SqlxPoolFactory::connection_suggestion(db_type, &other),
        ),
    }
}

/// A connection checked out of a [`DbPool`]. Returned to its pool on drop.
#[derive(Debug)]
pub enum DbConnection {
    MySql(PoolConnection<MySql>),
    Postgres(PoolConnection<Postgres>),
    SQLite(PoolConnection<Sqlite>),
}

impl DbConnection {
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbConnection::MySql(_) => DatabaseType::MySQL,
            DbConnection::Postgres(_) => DatabaseType::PostgreSQL,
            DbConnection::SQLite(_) => DatabaseType::SQLite,
        }
    }

    /// The login user as reported by the server. `None` for SQLite.
    pub async fn current_user(&mut self) -> DataSourceResult<Option<String>> {
        let user = match self {
            DbConnection::MySql(conn) => {
                sqlx::query_scalar::<_, String>("SELECT CURRENT_USER()")
                    .fetch_one(&mut **conn)
                    .await?
            }
            DbConnection::Postgres(conn) => {
                sqlx::query_scalar::<_, String>("SELECT current_user::text")
                    .fetch_one(&mut **conn)
                    .await?
            }
            DbConnection::SQLite(_) => return Ok(None),
        };
        Ok(Some(user))
    }

    /// Check that the connection is still alive.
    pub async fn ping(&mut self) -> DataSourceResult<()> {
        crate::db_dispatch!(DbConnection, self, |conn| conn.ping().await?);
        Ok(())
    }
}

/// Pool occupancy, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Open connections, idle or checked out.
    pub size: u32,
    pub idle: usize,
    pub closed: bool,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct Credentials {
    username: String,
    password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// A sqlx pool built from one [`DataSourceSettings`].
pub struct SqlxPool {
    settings: DataSourceSettings,
    primary: DbPool,
    /// Per-credential lazy pools. OnceCell ensures single-flight creation.
    overrides: TokioRwLock<HashMap<Credentials, Arc<OnceCell<DbPool>>>>,
    closed: AtomicBool,
}

impl SqlxPool {
    pub fn db_type(&self) -> DatabaseType {
        self.primary.db_type()
    }

    /// The primary pool, for running queries directly against it.
    pub fn primary(&self) -> &DbPool {
        &self.primary
    }

    pub fn status(&self) -> PoolStatus {
        let mut status = self.primary.status();
        status.closed |= self.closed.load(Ordering::Acquire);
        status
    }

    /// Number of secondary pools created for credential overrides.
    pub async fn override_pool_count(&self) -> usize {
        let overrides = self.overrides.read().await;
        overrides.values().filter(|cell| cell.get().is_some()).count()
    }

    fn matches_own_credentials(&self, username: &str, password: &str) -> bool {
        self.settings.username.as_deref() == Some(username)
            && self.settings.password.as_deref().unwrap_or("") == password
    }

    async fn override_pool(&self, credentials: Credentials) -> DataSourceResult<DbPool> {
        let cell = {
            let overrides = self.overrides.read().await;
            if let Some(cell) = overrides.get(&credentials) {
                Arc::clone(cell)
            } else {
                drop(overrides);
                let mut overrides = self.overrides.write().await;
                // Double-check after acquiring write lock
                Arc::clone(
                    overrides
                        .entry(credentials.clone())
                        .or_insert_with(|| Arc::new(OnceCell::new())),
                )
            }
        };

        let db_type = self.db_type();
        let pool = cell
            .get_or_try_init(|| async {
                debug!(username = %credentials.username, "Creating credential override pool");
                SqlxPoolFactory::create_pool(
                    db_type,
                    &self.settings,
                    Some(&credentials.username),
                    Some(&credentials.password),
                )
                .await
            })
            .await
            .map_err(|e| match e {
                DataSourceError::PoolBuildFailed {
                    message,
                    suggestion,
                } => DataSourceError::acquisition(message, suggestion),
                other => other,
            })?
            .clone();

        // close() may have drained the map while this pool was being built.
        if self.closed.load(Ordering::Acquire) {
            pool.close().await;
            return Err(DataSourceError::PoolClosed);
        }
        Ok(pool)
    }
}

#[async_trait]
impl ConnectionPool for SqlxPool {
    type Connection = DbConnection;

    async fn get_connection(&self) -> DataSourceResult<DbConnection> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DataSourceError::PoolClosed);
        }
        self.primary.acquire().await
    }

    async fn get_connection_as(
        &self,
        username: &str,
        password: &str,
    ) -> DataSourceResult<DbConnection> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DataSourceError::PoolClosed);
        }
        if !self.db_type().uses_credentials() {
            debug!(db_type = %self.db_type(), "Ignoring credential override");
            return self.primary.acquire().await;
        }
        if self.matches_own_credentials(username, password) {
            return self.primary.acquire().await;
        }

        let pool = self
            .override_pool(Credentials {
                username: username.to_string(),
                password: password.to_string(),
            })
            .await?;
        pool.acquire().await
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        // Drain overrides under lock, close outside lock
        let overrides: Vec<_> = {
            let mut overrides = self.overrides.write().await;
            overrides.drain().map(|(_, cell)| cell).collect()
        };
        for cell in overrides {
            if let Some(pool) = cell.get() {
                pool.close().await;
            }
        }

        self.primary.close().await;
        info!(
            db_type = %self.db_type(),
            url = %self.settings.masked_url(),
            "Connection pool closed"
        );
    }

    fn settings(&self) -> &DataSourceSettings {
        &self.settings
    }
}

impl std::fmt::Debug for SqlxPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlxPool")
            .field("settings", &self.settings)
            .field("primary", &self.primary)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Builds [`SqlxPool`]s for MySQL/MariaDB, PostgreSQL and SQLite.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlxPoolFactory;

impl SqlxPoolFactory {
    pub fn new() -> Self {
        Self
    }

    /// Resolve the backend from the driver name, checking it against the URL.
    pub fn resolve_database_type(settings: &DataSourceSettings) -> DataSourceResult<DatabaseType> {
        let from_driver = DatabaseType::from_driver_name(&settings.driver_class_name);
        let from_url = DatabaseType::from_connection_string(&settings.url);

        match (from_driver, from_url) {
            (Some(driver), Some(url)) if driver == url => Ok(driver),
            (Some(driver), Some(url)) => Err(DataSourceError::pool_build(
                format!(
                    "Driver '{}' is for {} but the URL is for {}",
                    settings.driver_class_name, driver, url
                ),
                "Make driverClassName and dbJDBCUrl refer to the same database",
            )),
            (None, _) => Err(DataSourceError::pool_build(
                format!("Unsupported driver: {}", settings.driver_class_name),
                "Use a MySQL, MariaDB, PostgreSQL or SQLite driver class",
            )),
            (Some(_), None) => Err(DataSourceError::pool_build(
                format!("Unrecognized connection URL: {}", settings.masked_url()),
                "Use jdbc:mysql://, jdbc:postgresql:// or jdbc:sqlite: URLs",
            )),
        }
    }

    /// Create a connection pool for the given settings, optionally with overridden credentials.
    async fn create_pool(
        db_type: DatabaseType,
        settings: &DataSourceSettings,
        username: Option<&str>,
        password: Option<&str>,
    ) -> DataSourceResult<DbPool> {
        let pool_opts = &settings.pool_options;
        let url = settings.driver_url();
        let is_sqlite = db_type == DatabaseType::SQLite;
        let max_connections = pool_opts.max_connections_or_default(is_sqlite);
        let min_connections = pool_opts.min_connections_or_default().min(max_connections);
        let acquire_timeout = Duration::from_secs(pool_opts.acquire_timeout_or_default());
        let idle_timeout = Some(Duration::from_secs(pool_opts.idle_timeout_or_default()));
        let username = username.or(settings.username.as_deref());
        let password = password.or(settings.password.as_deref());

        let connect_error = |e: sqlx::Error| {
            DataSourceError::pool_build(
                format!("Failed to connect to {}: {}", settings.masked_url(), e),
                Self::connection_suggestion(db_type, &e),
            )
        };

        match db_type {
            DatabaseType::MySQL => {
                let mut options = MySqlConnectOptions::from_str(&url)
                    .map_err(|e| {
                        DataSourceError::pool_build(
                            format!("Invalid MySQL connection string: {}", e),
                            "Check the connection URL format: jdbc:mysql://host:port/database",
                        )
                    })?
                    .charset("utf8mb4");
                if let Some(username) = username {
                    options = options.username(username);
                }
                if let Some(password) = password {
                    options = options.password(password);
                }

                let pool = MySqlPoolOptions::new()
                    .min_connections(min_connections)
                    .max_connections(max_connections)
                    .acquire_timeout(acquire_timeout)
                    .idle_timeout(idle_timeout)
                    .test_before_acquire(pool_opts.test_before_acquire_or_default())
                    .connect_with(options)
                    .await
                    .map_err(connect_error)?;
                Ok(DbPool::MySql(pool))
            }
            DatabaseType::PostgreSQL => {
                let mut options = PgConnectOptions::from_str(&url).map_err(|e| {
                    DataSourceError::pool_build(
                        format!("Invalid PostgreSQL connection string: {}", e),
                        "Check the connection URL format: jdbc:postgresql://host:port/database",
                    )
                })?;
                if let Some(username) = username {
                    options = options.username(username);
                }
                if let Some(password) = password {
                    options = options.password(password);
                }

                let pool = PgPoolOptions::new()
                    .min_connections(min_connections)
                    .max_connections(max_connections)
                    .acquire_timeout(acquire_timeout)
                    .idle_timeout(idle_timeout)
                    .test_before_acquire(pool_opts.test_before_acquire_or_default())
                    .connect_with(options)
                    .await
                    .map_err(connect_error)?;
                Ok(DbPool::Postgres(pool))
            }
            DatabaseType::SQLite => {
                let options = SqliteConnectOptions::from_str(&url).map_err(|e| {
                    DataSourceError::pool_build(
                        format!("Invalid SQLite connection string: {}", e),
                        "Check the connection URL format: jdbc:sqlite:path/to/db.sqlite",
                    )
                })?;

                let pool = SqlitePoolOptions::new()
                    .min_connections(min_connections)
                    .max_connections(max_connections)
                    .acquire_timeout(acquire_timeout)
                    .idle_timeout(idle_timeout)
                    .test_before_acquire(pool_opts.test_before_acquire_or_default())
                    .connect_with(options)
                    .await
                    .map_err(connect_error)?;
                Ok(DbPool::SQLite(pool))
            }
        }
    }

    /// Generate a helpful suggestion for connection errors.
    fn connection_suggestion(db_type: DatabaseType, error: &sqlx::Error) -> String {
        let error_str = error.to_string().to_lowercase();

        if error_str.contains("connection refused") || error_str.contains("timed out") {
            return format!(
                "Check that the {} server is running and accessible",
                db_type
            );
        }

        if error_str.contains("authentication") || error_str.contains("password") {
            return "Verify the username and password children".to_string();
        }

        if error_str.contains("does not exist") || error_str.contains("unknown database") {
            return "Check that the database name exists".to_string();
        }

        if error_str.contains("tls") || error_str.contains("ssl") {
            return "Check TLS/SSL configuration or try disabling it".to_string();
        }

        match db_type {
            DatabaseType::PostgreSQL => {
                "Verify the URL format: jdbc:postgresql://host:5432/db".to_string()
            }
            DatabaseType::MySQL => "Verify the URL format: jdbc:mysql://host:3306/db".to_string(),
            DatabaseType::SQLite => {
                "Verify the file path exists and is accessible: jdbc:sqlite:path/to/db.sqlite"
                    .to_string()
            }
        }
    }
}

#[async_trait]
impl PoolFactory for SqlxPoolFactory {
    type Pool = SqlxPool;

    async fn open(&self, settings: &DataSourceSettings) -> DataSourceResult<SqlxPool> {
        let db_type = Self::resolve_database_type(settings)?;

        info!(
            db_type = %db_type,
            url = %settings.masked_url(),
            username = ?settings.username,
            "Building connection pool"
        );

        let primary = Self::create_pool(db_type, settings, None, None).await?;

        Ok(SqlxPool {
            settings: settings.clone(),
            primary,
            overrides: TokioRwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }
}
