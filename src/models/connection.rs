//! Connection-related data models.
//!
//! This module defines the database types the bundled pool understands and the
//! typed connection settings derived from a [`ConfigSnapshot`].

use crate::config::PoolOptions;
use crate::error::{DataSourceError, DataSourceResult};
use crate::models::ConfigSnapshot;
use serde::{Deserialize, Serialize};
use url::Url;

/// Snapshot key naming the driver.
pub const KEY_DRIVER_CLASS_NAME: &str = "driverClassName";
/// Snapshot key holding the connection URL.
pub const KEY_JDBC_URL: &str = "dbJDBCUrl";
pub const KEY_USERNAME: &str = "username";
pub const KEY_PASSWORD: &str = "password";

/// Supported database types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    PostgreSQL,
    /// Includes MariaDB
    MySQL,
    SQLite,
}

impl DatabaseType {
    /// Parse database type from a connection string. A leading `jdbc:` is ignored.
    pub fn from_connection_string(connection_string: &str) -> Option<Self> {
        let lower = strip_jdbc_prefix(connection_string).to_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Some(Self::PostgreSQL)
        } else if lower.starts_with("mysql://") || lower.starts_with("mariadb://") {
            Some(Self::MySQL)
        } else if lower.starts_with("sqlite://") || lower.starts_with("sqlite:") {
            Some(Self::SQLite)
        } else {
            None
        }
    }

    /// Parse database type from a driver identifier.
    ///
    /// Accepts JDBC driver class names (`com.mysql.cj.jdbc.Driver`,
    /// `org.postgresql.Driver`, `org.sqlite.JDBC`, ...) as well as plain
    /// names such as `mysql`, `postgres` or `sqlite`.
    pub fn from_driver_name(driver: &str) -> Option<Self> {
        let lower = driver.trim().to_lowercase();
        if lower.contains("postgres") {
            Some(Self::PostgreSQL)
        } else if lower.contains("mysql") || lower.contains("mariadb") {
            Some(Self::MySQL)
        } else if lower.contains("sqlite") {
            Some(Self::SQLite)
        } else {
            None
        }
    }

    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
            Self::SQLite => "SQLite",
        }
    }

    /// Whether the database authenticates with a username and password.
    pub fn uses_credentials(&self) -> bool {
        !matches!(self, Self::SQLite)
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

fn strip_jdbc_prefix(url: &str) -> &str {
    let trimmed = url.trim();
    match trimmed.get(..5) {
        Some(prefix) if prefix.eq_ignore_ascii_case("jdbc:") => &trimmed[5..],
        _ => trimmed,
    }
}

/// Typed connection parameters for building one pool.
///
/// Derived from exactly one snapshot and never modified afterwards.
#[derive(Clone, PartialEq, Eq)]
pub struct DataSourceSettings {
    pub driver_class_name: String,
    /// Connection URL as stored, possibly with a `jdbc:` prefix.
    /// Contains sensitive data - never log
    pub url: String,
    pub username: Option<String>,
    /// Contains sensitive data - never log
    pub password: Option<String>,
    pub pool_options: PoolOptions,
}

impl DataSourceSettings {
    /// Extract settings from a snapshot.
    ///
    /// `driverClassName` and `dbJDBCUrl` are required; `username` and
    /// `password` are optional. Pool tuning keys are parsed into
    /// [`PoolOptions`] and validated.
    pub fn from_snapshot(snapshot: &ConfigSnapshot) -> DataSourceResult<Self> {
        let driver_class_name = required(snapshot, KEY_DRIVER_CLASS_NAME)?;
        let url = required(snapshot, KEY_JDBC_URL)?;

        let pool_options = PoolOptions::from_snapshot(snapshot);
        pool_options.validate().map_err(|e| {
            DataSourceError::pool_build(
                format!("Invalid pool options under {}: {}", snapshot.path(), e),
                "Fix the pool sizing keys (maxPoolSize, minPoolSize)",
            )
        })?;

        Ok(Self {
            driver_class_name,
            url,
            username: optional(snapshot, KEY_USERNAME),
            password: snapshot.get(KEY_PASSWORD).map(String::from),
            pool_options,
        })
    }

    /// The URL without a `jdbc:` prefix, in the form database drivers expect.
    pub fn driver_url(&self) -> String {
        let url = strip_jdbc_prefix(&self.url);
        match url.get(..10) {
            Some(prefix) if prefix.eq_ignore_ascii_case("mariadb://") => {
                format!("mysql://{}", &url[10..])
            }
            _ => url.to_string(),
        }
    }

    /// Get a display-safe version of the URL (credentials masked).
    pub fn masked_url(&self) -> String {
        let trimmed = self.url.trim();
        let stripped = strip_jdbc_prefix(trimmed);
        let prefix = &trimmed[..trimmed.len() - stripped.len()];

        match Url::parse(stripped) {
            Ok(mut url) if url.password().is_some() => {
                if url.set_password(Some("****")).is_ok() {
                    return format!("{}{}", prefix, url);
                }
                mask_userinfo(trimmed)
            }
            Ok(_) => self.url.clone(),
            Err(_) => mask_userinfo(trimmed),
        }
    }
}

/// Fallback masking for URLs the `url` crate cannot parse.
fn mask_userinfo(url: &str) -> String {
    let authority_start = url.find("://").map(|p| p + 3).unwrap_or(0);
    if let Some(at_pos) = url.find('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if colon_pos >= authority_start {
                return format!("{}****{}", &url[..colon_pos + 1], &url[at_pos..]);
            }
        }
    }
    url.to_string()
}

fn required(snapshot: &ConfigSnapshot, key: &str) -> DataSourceResult<String> {
    optional(snapshot, key).ok_or_else(|| {
        DataSourceError::pool_build(
            format!("Missing required key '{}' under {}", key, snapshot.path()),
            format!("Create the child node {}/{}", snapshot.path(), key),
        )
    })
}

fn optional(snapshot: &ConfigSnapshot, key: &str) -> Option<String> {
    snapshot
        .get(key)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

impl std::fmt::Debug for DataSourceSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSourceSettings")
            .field("driver_class_name", &self.driver_class_name)
            .field("url", &self.masked_url())
            .field("username", &self.username)
            .field("has_password", &self.password.is_some())
            .field("pool_options", &self.pool_options)
            .finish()
    }
}
