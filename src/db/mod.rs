//! Database abstraction layer.
//!
//! This module provides:
//! - The pool capability traits the reload logic is written against
//! - The sqlx-backed pool factory for MySQL/MariaDB, PostgreSQL and SQLite
//! - Database dispatch macros for reducing code duplication

#[macro_use]
pub mod macros;
pub mod pool;
pub mod sqlx_pool;

pub use pool::{ConnectionPool, PoolFactory};
pub use sqlx_pool::{DbConnection, DbPool, PoolStatus, SqlxPool, SqlxPoolFactory};
