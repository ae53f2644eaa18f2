//! Data models for the dynamic data source.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod event;
pub mod snapshot;

// Re-export commonly used types
pub use connection::{
    DataSourceSettings, DatabaseType, KEY_DRIVER_CLASS_NAME, KEY_JDBC_URL, KEY_PASSWORD,
    KEY_USERNAME,
};
pub use event::{ChangeEvent, ChangeKind, ReloadTriggers};
pub use snapshot::ConfigSnapshot;
