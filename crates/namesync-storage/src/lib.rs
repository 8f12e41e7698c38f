//! namesync-storage — SQL backends for the name mirror and its cursor.
//!
//! Backends:
//! - [`sqlite`] — SQLite via `sqlx` (embedded, single-file persistence)
//! - [`postgres`] — PostgreSQL via `sqlx`
//!
//! Both run `apply_block` inside one transaction, so a block's name writes
//! and the cursor that follows them commit together.

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

#[cfg(feature = "postgres")]
pub use postgres::{PostgresOptions, PostgresStore};

#[cfg(any(feature = "sqlite", feature = "postgres"))]
fn store_error(e: sqlx::Error) -> namesync_core::SyncError {
    namesync_core::SyncError::Store(e.to_string())
}
