//! PostgreSQL name mirror.
//!
//! # Feature Flag
//! Requires the `postgres` feature:
//! ```toml
//! namesync-storage = { version = "0.2", features = ["postgres"] }
//! ```
//!
//! # Schema
//! Created automatically on first connect:
//! - `namesync_names` — current value per name (`BYTEA` key)
//! - `namesync_cursors` — sync progress per `sync_id`

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Executor, PgPool, Postgres, Row};
use tracing::{debug, info};

use namesync_core::{
    Cursor, CursorStore, NameOpKind, NameOperation, NameRecord, NameStore, SyncError, SyncTarget,
};

use crate::store_error;

// ─── Connection options ────────────────────────────────────────────────────────

/// Pool options for [`PostgresStore`].
#[derive(Debug, Clone)]
pub struct PostgresOptions {
    /// Maximum number of connections in the pool (default: 10)
    pub max_connections: u32,
    /// Minimum number of idle connections to keep open (default: 1)
    pub min_connections: u32,
    /// Connection acquire timeout in seconds (default: 30)
    pub connect_timeout_secs: u64,
}

impl Default for PostgresOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            connect_timeout_secs: 30,
        }
    }
}

// ─── PostgresStore ───────────────────────────────────────────────────────────

/// PostgreSQL-backed names and cursors. Cheap to clone.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect with default pool options and initialize the schema.
    pub async fn connect(database_url: &str) -> Result<Self, SyncError> {
        Self::connect_with_options(database_url, PostgresOptions::default()).await
    }

    pub async fn connect_with_options(
        database_url: &str,
        opts: PostgresOptions,
    ) -> Result<Self, SyncError> {
        let pool = PgPoolOptions::new()
            .max_connections(opts.max_connections)
            .min_connections(opts.min_connections)
            .acquire_timeout(std::time::Duration::from_secs(opts.connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| SyncError::Store(format!("postgres connect: {e}")))?;

        let store = Self { pool };
        store.init_schema().await?;
        info!("PostgresStore connected and schema initialized");
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), SyncError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS namesync_names (
                name           BYTEA   PRIMARY KEY,
                value          BYTEA   NOT NULL,
                expired        BOOLEAN NOT NULL DEFAULT FALSE,
                updated_height BIGINT  NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS namesync_cursors (
                sync_id      TEXT   PRIMARY KEY,
                block_hash   TEXT   NOT NULL,
                block_height BIGINT NOT NULL,
                updated_at   BIGINT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        debug!("PostgresStore schema initialized");
        Ok(())
    }

    pub async fn name_count(&self) -> Result<u64, SyncError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM namesync_names")
            .fetch_one(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(row.get::<i64, _>("cnt") as u64)
    }
}

async fn upsert_with<'e, E>(exec: E, name: &[u8], value: &[u8], height: u64) -> Result<(), SyncError>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        "INSERT INTO namesync_names (name, value, expired, updated_height)
         VALUES ($1, $2, FALSE, $3)
         ON CONFLICT (name) DO UPDATE SET
             value = EXCLUDED.value,
             expired = FALSE,
             updated_height = EXCLUDED.updated_height",
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
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query("UPDATE namesync_names SET expired = TRUE, updated_height = $1 WHERE name = $2")
        .bind(height as i64)
        .bind(name)
        .execute(exec)
        .await
        .map_err(store_error)?;
    Ok(())
}

async fn save_cursor_with<'e, E>(exec: E, cursor: &Cursor) -> Result<(), SyncError>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        "INSERT INTO namesync_cursors (sync_id, block_hash, block_height, updated_at)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (sync_id) DO UPDATE SET
             block_hash = EXCLUDED.block_hash,
             block_height = EXCLUDED.block_height,
             updated_at = EXCLUDED.updated_at",
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

fn cursor_from_row(row: &PgRow) -> Result<Cursor, SyncError> {
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

#[async_trait]
impl NameStore for PostgresStore {
    async fn upsert(&self, name: &[u8], value: &[u8], height: u64) -> Result<(), SyncError> {
        upsert_with(&self.pool, name, value, height).await
    }

    async fn mark_expired(&self, name: &[u8], height: u64) -> Result<(), SyncError> {
        expire_with(&self.pool, name, height).await
    }

    async fn get(&self, name: &[u8]) -> Result<Option<NameRecord>, SyncError> {
        let row = sqlx::query(
            "SELECT name, value, expired, updated_height FROM namesync_names WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(row.map(|r| NameRecord {
            name: r.get("name"),
            value: r.get("value"),
            expired: r.get("expired"),
            updated_height: r.get::<i64, _>("updated_height") as u64,
        }))
    }
}

#[async_trait]
impl CursorStore for PostgresStore {
    async fn load_cursor(&self, sync_id: &str) -> Result<Option<Cursor>, SyncError> {
        let row = sqlx::query(
            "SELECT sync_id, block_hash, block_height, updated_at
             FROM namesync_cursors WHERE sync_id = $1",
        )
        .bind(sync_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;
        row.as_ref().map(cursor_from_row).transpose()
    }

    async fn save_cursor(&self, cursor: &Cursor) -> Result<(), SyncError> {
        save_cursor_with(&self.pool, cursor).await
    }

    async fn delete_cursor(&self, sync_id: &str) -> Result<(), SyncError> {
        sqlx::query("DELETE FROM namesync_cursors WHERE sync_id = $1")
            .bind(sync_id)
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(())
    }
}

#[async_trait]
impl SyncTarget for PostgresStore {
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
        debug!(sync_id = %cursor.sync_id, height = cursor.block_height, ops = ops.len(), "block applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use namesync_core::{BlockHash, BlockRef};

    // Set DATABASE_URL to enable, e.g.
    // DATABASE_URL=postgresql://localhost/namesync_test

    #[tokio::test]
    #[ignore = "requires PostgreSQL (set DATABASE_URL to enable)"]
    async fn postgres_apply_block_roundtrip() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let store = PostgresStore::connect(&url).await.unwrap();

        let cursor = Cursor::new("pg-test", BlockRef::new(BlockHash::from_bytes([3; 32]), 42));
        let ops = vec![
            NameOperation::new(NameOpKind::FirstUpdate, "d/pg-test", "a"),
            NameOperation::new(NameOpKind::Update, "d/pg-test", "b"),
        ];
        store.apply_block(&ops, &cursor).await.unwrap();

        let record = store.get(b"d/pg-test").await.unwrap().unwrap();
        assert_eq!(record.value, b"b");
        assert_eq!(record.updated_height, 42);
        assert_eq!(store.load_cursor("pg-test").await.unwrap().unwrap().block_height, 42);

        store.delete_cursor("pg-test").await.unwrap();
        assert!(store.load_cursor("pg-test").await.unwrap().is_none());
    }
}
