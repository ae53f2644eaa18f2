//! Configuration handling for the dynamic data source.
//!
//! This module provides the library-level [`DataSourceOptions`], the pool tuning
//! options read from a configuration snapshot, and the CLI configuration of the
//! demo driver (arguments and environment variables).

use crate::models::{ChangeKind, ConfigSnapshot, ReloadTriggers};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

pub const DEFAULT_CONFIG_PATH: &str = "/datasource";

// Pool configuration defaults
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_MAX_CONNECTIONS_SQLITE: u32 = 1;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 1;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

// Snapshot keys for pool tuning
pub const KEY_MAX_POOL_SIZE: &str = "maxPoolSize";
pub const KEY_MIN_POOL_SIZE: &str = "minPoolSize";
pub const KEY_ACQUIRE_TIMEOUT_SECS: &str = "acquireTimeoutSecs";
pub const KEY_IDLE_TIMEOUT_SECS: &str = "idleTimeoutSecs";
pub const KEY_TEST_BEFORE_ACQUIRE: &str = "testBeforeAcquire";

/// Connection pool configuration options parsed from a configuration snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PoolOptions {
    /// Maximum connections in pool (default: 10 for MySQL/PostgreSQL, 1 for SQLite)
    pub max_connections: Option<u32>,
    /// Minimum connections in pool (default: 1)
    pub min_connections: Option<u32>,
    /// Idle timeout in seconds (default: 600)
    pub idle_timeout_secs: Option<u64>,
    /// Connection acquire timeout in seconds (default: 30)
    pub acquire_timeout_secs: Option<u64>,
    /// Whether to test connections before use (default: true)
    pub test_before_acquire: Option<bool>,
}

impl PoolOptions {
    /// Parse pool options from snapshot keys. Unparseable values are ignored.
    pub fn from_snapshot(snapshot: &ConfigSnapshot) -> Self {
        fn number<T: std::str::FromStr>(snapshot: &ConfigSnapshot, key: &str) -> Option<T> {
            snapshot.get(key).and_then(|v| v.trim().parse().ok())
        }

        Self {
            max_connections: number(snapshot, KEY_MAX_POOL_SIZE),
            min_connections: number(snapshot, KEY_MIN_POOL_SIZE),
            idle_timeout_secs: number(snapshot, KEY_IDLE_TIMEOUT_SECS),
            acquire_timeout_secs: number(snapshot, KEY_ACQUIRE_TIMEOUT_SECS),
            test_before_acquire: snapshot.get(KEY_TEST_BEFORE_ACQUIRE).and_then(|v| {
                let v = v.trim();
                if v.eq_ignore_ascii_case("true") {
                    Some(true)
                } else if v.eq_ignore_ascii_case("false") {
                    Some(false)
                } else {
                    None // Invalid value ignored
                }
            }),
        }
    }

    /// Get max_connections with default value based on database type.
    pub fn max_connections_or_default(&self, is_sqlite: bool) -> u32 {
        self.max_connections.unwrap_or(if is_sqlite {
            DEFAULT_MAX_CONNECTIONS_SQLITE
        } else {
            DEFAULT_MAX_CONNECTIONS
        })
    }

    /// Get min_connections with default value.
    pub fn min_connections_or_default(&self) -> u32 {
        self.min_connections.unwrap_or(DEFAULT_MIN_CONNECTIONS)
    }

    /// Get idle_timeout with default value.
    pub fn idle_timeout_or_default(&self) -> u64 {
        self.idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS)
    }

    /// Get acquire_timeout with default value.
    pub fn acquire_timeout_or_default(&self) -> u64 {
        self.acquire_timeout_secs
            .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS)
    }

    /// Get test_before_acquire with default value.
    pub fn test_before_acquire_or_default(&self) -> bool {
        self.test_before_acquire.unwrap_or(true)
    }

    /// Validate pool options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(max) = self.max_connections {
            if max == 0 {
                return Err("max_connections must be greater than 0".to_string());
            }
        }
        if let Some(min) = self.min_connections {
            if min == 0 {
                return Err("min_connections must be greater than 0".to_string());
            }
            if let Some(max) = self.max_connections {
                if min > max {
                    return Err(format!(
                        "min_connections ({}) cannot exceed max_connections ({})",
                        min, max
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Options for a [`DynamicDataSource`](crate::DynamicDataSource).
#[derive(Debug, Clone)]
pub struct DataSourceOptions {
    /// Coordination-store path whose children hold the configuration.
    pub config_path: String,
    /// Change kinds that trigger a reload.
    pub reload_on: ReloadTriggers,
}

impl DataSourceOptions {
    pub fn new() -> Self {
        Self {
            config_path: DEFAULT_CONFIG_PATH.to_string(),
            reload_on: ReloadTriggers::default(),
        }
    }

    pub fn with_config_path(mut self, path: impl Into<String>) -> Self {
        self.config_path = path.into();
        self
    }

    pub fn with_reload_on(mut self, triggers: ReloadTriggers) -> Self {
        self.reload_on = triggers;
        self
    }
}

impl Default for DataSourceOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Change kind selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReloadTrigger {
    /// A new configuration key appears
    Added,
    /// An existing configuration value changes
    Updated,
    /// A configuration key is deleted
    Removed,
}

impl From<ReloadTrigger> for ChangeKind {
    fn from(trigger: ReloadTrigger) -> Self {
        match trigger {
            ReloadTrigger::Added => ChangeKind::ChildAdded,
            ReloadTrigger::Updated => ChangeKind::ChildUpdated,
            ReloadTrigger::Removed => ChangeKind::ChildRemoved,
        }
    }
}

impl std::fmt::Display for ReloadTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Added => write!(f, "added"),
            Self::Updated => write!(f, "updated"),
            Self::Removed => write!(f, "removed"),
        }
    }
}

/// Configuration for the demo driver.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "zk-datasource",
    about = "Hot-reloadable database connection source driven by a watched configuration tree",
    version,
    author
)]
pub struct Config {
    /// Root directory of the directory-backed configuration store.
    /// Each configuration path is a sub-directory; each file in it is one key.
    #[arg(long, value_name = "DIR", env = "DATASOURCE_STORE_DIR")]
    pub store_dir: PathBuf,

    /// Configuration path watched for connection settings
    #[arg(
        long,
        default_value = DEFAULT_CONFIG_PATH,
        env = "DATASOURCE_CONFIG_PATH"
    )]
    pub config_path: String,

    /// Change kinds that trigger a reload.
    /// Can be specified multiple times or as comma-separated values.
    #[arg(
        long = "reload-on",
        value_enum,
        default_value = "updated",
        env = "DATASOURCE_RELOAD_ON",
        value_delimiter = ','
    )]
    pub reload_on: Vec<ReloadTrigger>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "DATASOURCE_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "DATASOURCE_JSON_LOGS")]
    pub json_logs: bool,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Library options derived from the command line.
    pub fn data_source_options(&self) -> DataSourceOptions {
        DataSourceOptions::new()
            .with_config_path(self.config_path.clone())
            .with_reload_on(self.reload_on.iter().copied().map(ChangeKind::from).collect())
    }
}
