//! ZK Datasource Library
//!
//! This library provides a database connection source whose connection settings
//! live in a watched coordination-store path (driver, URL, credentials). When the
//! configuration changes, a new pool is built and atomically swapped in for the
//! old one, which is then closed.

pub mod config;
pub mod datasource;
pub mod db;
pub mod error;
pub mod models;
pub mod store;

pub use config::{Config, DataSourceOptions};
pub use datasource::{DynamicDataSource, PublishedPool, ReloadStatus};
pub use db::{ConnectionPool, PoolFactory, SqlxPoolFactory};
pub use error::{DataSourceError, DataSourceResult};
pub use store::ConfigStore;
