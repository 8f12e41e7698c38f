//! SQLite name mirror.
//!
//! Persists the current value of every name plus the sync cursors to a
//! single SQLite file.
//!
//! # Usage
//! ```rust,no_run
//! use namesync_storage::sqlite::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStore::open("./names.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Executor, Row, Sqlite, SqlitePool};
use tracing::debug;

use namesync_core::{
    Cursor, CursorStore, NameOpKind, NameOperation, NameRecord, NameStore, SyncError, SyncTarget,
};

use crate::store_error;

/// SQLite-backed names and cursors.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./names.db"`) or a full
    /// SQLite URL (`"sqlite:./names.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, SyncError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(store_error)?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory database. Data is lost when the store is dropped.
    pub async fn in_memory() -> Result<Self, SyncError> {
        // One connection, or each pooled connection would see its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(store_error)?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), SyncError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(store_error)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS names (
                name           BLOB    PRIMARY KEY,
                value          BLOB    NOT NULL,
                expired        INTEGER NOT NULL DEFAULT 0,
                updated_height INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS cursors (
                sync_id      TEXT    PRIMARY KEY,
                block_hash   TEXT    NOT NULL,
                block_height INTEGER NOT NULL,
                updated_at   INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(())
    }

    /// Number of names in the mirror, expired ones included.
    pub async fn name_count(&self) -> Result<u64, SyncError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM names")
            .fetch_one(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(row.get::<i64, _>("cnt") as u64)
    }

    /// Every cursor stored in this database.
    pub async fn cursors(&self) -> Result<Vec<Cursor>, SyncError> {
        let rows = sqlx::query(
            "SELECT sync_id, block_hash, block_height, updated_at FROM cursors ORDER BY sync_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;
        rows.iter().map(cursor_from_row).collect()
    }
}

// ─── Statements ──────────────────────────────────────────────────────────────

async fn upsert_with<'e, E>(exec: E, name: &[u8], value: &[u8], height: u64) -> Result<(), SyncError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO names (name, value, expired, updated_height) VALUES (?, ?, 0, ?)
         ON CONFLICT(name) DO UPDATE SET
             value = excluded.value,
             expired = 0,
             updated_height = excluded.updated_height",
    )
    .bind(name)
    .bind(value)
    .bind(height as i64)
    .execute(exec)
    .await
    .map_err(store_error)?;
    Ok(())
}

async fn expire_with<'e, E>(exec: E, name: &[u8], height: u64) -> Result<(), SyncError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("UPDATE names SET expired = 1, updated_height = ? WHERE name = ?")
        .bind(height as i64)
        .bind(name)
        .execute(exec)
        .await
        .map_err(store_error)?;
    Ok(())
}

async fn save_cursor_with<'e, E>(exec: E, cursor: &Cursor) -> Result<(), SyncError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT OR REPLACE INTO cursors (sync_id, block_hash, block_height, updated_at)
         VALUES (?, ?, ?, ?)",
    )
    .bind(&cursor.sync_id)
    .bind(cursor.block_hash.to_hex())
    .bind(cursor.block_height as i64)
    .bind(cursor.updated_at)
    .execute(exec)
    .await
    .map_err(store_error)?;
    Ok(())
}

fn cursor_from_row(row: &SqliteRow) -> Result<Cursor, SyncError> {
    let hash: String = row.get("block_hash");
    Ok(Cursor {
        sync_id: row.get("sync_id"),
        block_hash: hash
            .parse()
            .map_err(|e| SyncError::Store(format!("stored cursor hash: {e}")))?,
        block_height: row.get::<i64, _>("block_height") as u64,
        updated_at: row.get("updated_at"),
    })
}

// ─── Trait impls ─────────────────────────────────────────────────────────────

#[async_trait]
impl NameStore for SqliteStore {
    async fn upsert(&self, name: &[u8], value: &[u8], height: u64) -> Result<(), SyncError> {
        upsert_with(&self.pool, name, value, height).await
    }

    async fn mark_expired(&self, name: &[u8], height: u64) -> Result<(), SyncError> {
        expire_with(&self.pool, name, height).await
    }

    async fn get(&self, name: &[u8]) -> Result<Option<NameRecord>, SyncError> {
        let row = sqlx::query(
            "SELECT name, value, expired, updated_height FROM names WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(row.map(|r| NameRecord {
            name: r.get("name"),
            value: r.get("value"),
            expired: r.get::<i64, _>("expired") != 0,
            updated_height: r.get::<i64, _>("updated_height") as u64,
        }))
    }
}

#[async_trait]
impl CursorStore for SqliteStore {
    async fn load_cursor(&self, sync_id: &str) -> Result<Option<Cursor>, SyncError> {
        let row = sqlx::query(
            "SELECT sync_id, block_hash, block_height, updated_at FROM cursors WHERE sync_id = ?",
        )
        .bind(sync_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;
        row.as_ref().map(cursor_from_row).transpose()
    }

    async fn save_cursor(&self, cursor: &Cursor) -> Result<(), SyncError> {
        save_cursor_with(&self.pool, cursor).await?;
        debug!(sync_id = %cursor.sync_id, height = cursor.block_height, "cursor saved");
        Ok(())
    }

    async fn delete_cursor(&self, sync_id: &str) -> Result<(), SyncError> {
        sqlx::query("DELETE FROM cursors WHERE sync_id = ?")
            .bind(sync_id)
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(())
    }
}

#[async_trait]
impl SyncTarget for SqliteStore {
    async fn apply_block(&self, ops: &[NameOperation], cursor: &Cursor) -> Result<(), SyncError> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;
        for op in ops {
            match op.kind {
                NameOpKind::FirstUpdate | NameOpKind::Update => {
                    upsert_with(&mut *tx, &op.name, &op.value, cursor.block_height).await?
                }
                NameOpKind::Expire => expire_with(&mut *tx, &op.name, cursor.block_height).await?,
            }
        }
        save_cursor_with(&mut *tx, cursor).await?;
        tx.commit().await.map_err(store_error)?;

        debug!(
            sync_id = %cursor.sync_id,
            height = cursor.block_height,
            ops = ops.len(),
            "block applied"
        );
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
