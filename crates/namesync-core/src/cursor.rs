//! Sync cursor — the client's durable "last fully synchronized block".
//!
//! The cursor is advanced only at checkpoint boundaries, after every name
//! operation preceding that checkpoint has been applied. On restart the
//! client resumes from it and may re-apply operations that followed it,
//! which idempotent upserts make harmless.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::types::{BlockHash, BlockRef};

/// A persisted sync position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Identifies the mirror this cursor belongs to.
    pub sync_id: String,
    pub block_hash: BlockHash,
    pub block_height: u64,
    /// Unix timestamp of when this cursor was saved.
    pub updated_at: i64,
}

impl Cursor {
    pub fn new(sync_id: impl Into<String>, block: BlockRef) -> Self {
        Self {
            sync_id: sync_id.into(),
            block_hash: block.hash,
            block_height: block.height,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn block(&self) -> BlockRef {
        BlockRef::new(self.block_hash, self.block_height)
    }

    /// Move to a later checkpoint.
    pub fn advance(&mut self, block: BlockRef) {
        self.block_hash = block.hash;
        self.block_height = block.height;
        self.updated_at = chrono::Utc::now().timestamp();
    }
}

/// Storage for cursors.
///
/// Implementations include `MemoryStore`, `SqliteStore` and `PostgresStore`.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Load the cursor for `sync_id`, if one was ever saved.
    async fn load_cursor(&self, sync_id: &str) -> Result<Option<Cursor>, SyncError>;

    /// Save (upsert) a cursor.
    async fn save_cursor(&self, cursor: &Cursor) -> Result<(), SyncError>;

    /// Delete a cursor (e.g. when resetting a mirror).
    async fn delete_cursor(&self, sync_id: &str) -> Result<(), SyncError>;
}

/// Binds a [`CursorStore`] to one mirror and seeds its first position.
pub struct CursorManager<S: ?Sized> {
    store: std::sync::Arc<S>,
    sync_id: String,
    seed: BlockRef,
}

impl<S: CursorStore + ?Sized> CursorManager<S> {
    pub fn new(store: std::sync::Arc<S>, sync_id: impl Into<String>, seed: BlockRef) -> Self {
        Self {
            store,
            sync_id: sync_id.into(),
            seed,
        }
    }

    pub fn sync_id(&self) -> &str {
        &self.sync_id
    }

    /// Load the stored cursor, or the configured start block on first run.
    ///
    /// The seed is not persisted here; the first applied checkpoint is.
    pub async fn load_or_seed(&self) -> Result<Cursor, SyncError> {
        match self.store.load_cursor(&self.sync_id).await? {
            Some(cursor) => {
                tracing::info!(
                    sync_id = %self.sync_id,
                    height = cursor.block_height,
                    hash = %cursor.block_hash,
                    "resuming from stored cursor"
                );
                Ok(cursor)
            }
            None => {
                tracing::info!(
                    sync_id = %self.sync_id,
                    height = self.seed.height,
                    hash = %self.seed.hash,
                    "no stored cursor, starting from configured block"
                );
                Ok(Cursor::new(self.sync_id.clone(), self.seed))
            }
        }
    }

    pub async fn reset(&self) -> Result<(), SyncError> {
        self.store.delete_cursor(&self.sync_id).await
    }
}
