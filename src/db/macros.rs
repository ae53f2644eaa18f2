//! Database dispatch macros for reducing code duplication.
//!
//! The sqlx backends expose the same method names on distinct types
//! (`MySqlPool`, `PgPool`, `SqlitePool`, and their connections). These
//! macros expand one body per backend variant at compile time.

/// Apply the same expression to every backend variant of a `db` enum.
///
/// The binding has a different concrete type in each arm, so the body is
/// type-checked once per backend.
///
/// # Example
///
/// ```ignore
/// db_dispatch!(DbPool, self, |pool| pool.close().await)
/// ```
#[macro_export]
macro_rules! db_dispatch {
    ($kind:ident, $value:expr, |$p:ident| $body:expr) => {
        match $value {
            $crate::db::$kind::MySql($p) => $body,
            $crate::db::$kind::Postgres($p) => $body,
            $crate::db::$kind::SQLite($p) => $body,
        }
    };
}

pub use db_dispatch;
