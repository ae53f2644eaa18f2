//! Error types for the dynamic data source.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Variants are grouped by where they surface: reading configuration, building a
//! pool from a snapshot, and handing connections to callers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataSourceError {
    #[error("Configuration store unavailable: {message}")]
    StoreUnavailable { message: String },

    #[error("Configuration path not found: {path}")]
    PathNotFound { path: String },

    #[error("Pool build failed: {message}")]
    PoolBuildFailed { message: String, suggestion: String },

    #[error("Connection acquisition failed: {message}")]
    ConnectionAcquisitionFailed { message: String, suggestion: String },

    /// Only a retired pool reports this.
    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
    },
}

impl DataSourceError {
    /// Create a store unavailable error.
    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
        }
    }

    /// Create a path not found error.
    pub fn path_not_found(path: impl Into<String>) -> Self {
        Self::PathNotFound { path: path.into() }
    }

    /// Create a pool build error with a helpful suggestion.
    pub fn pool_build(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::PoolBuildFailed {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a connection acquisition error with a helpful suggestion.
    pub fn acquisition(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConnectionAcquisitionFailed {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::PoolBuildFailed { suggestion, .. } => Some(suggestion),
            Self::ConnectionAcquisitionFailed { suggestion, .. } => Some(suggestion),
            Self::StoreUnavailable { .. } => {
                Some("Check that the coordination store is reachable")
            }
            Self::PathNotFound { .. } => {
                Some("Create the configuration path and its key/value children")
            }
            _ => None,
        }
    }

    /// Check if this error came from reading configuration.
    pub fn is_store_error(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. } | Self::PathNotFound { .. })
    }

    /// Check if this error was raised by a pool that has been closed.
    pub fn is_pool_closed(&self) -> bool {
        matches!(self, Self::PoolClosed)
    }
}

/// Convert sqlx errors raised while acquiring connections or running queries.
impl From<sqlx::Error> for DataSourceError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolClosed => DataSourceError::PoolClosed,
            sqlx::Error::PoolTimedOut => DataSourceError::acquisition(
                "Timed out waiting for a pooled connection",
                "The pool may be exhausted; raise maxPoolSize or release connections sooner",
            ),
            sqlx::Error::Configuration(msg) => DataSourceError::acquisition(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Io(io_err) => DataSourceError::acquisition(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DataSourceError::acquisition(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DataSourceError::acquisition(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DataSourceError::database(db_err.message(), code)
            }
            sqlx::Error::RowNotFound => DataSourceError::database("No rows returned", None),
            _ => DataSourceError::database(format!("Unknown database error: {}", err), None),
        }
    }
}

/// Result type alias for data source operations.
pub type DataSourceResult<T> = Result<T, DataSourceError>;
