//! Downstream store traits and the in-memory store.
//!
//! Applying the same operations twice must leave the store in the same
//! state as applying them once: writes are keyed by name and the last write
//! in event order wins.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::cursor::{Cursor, CursorStore};
use crate::error::SyncError;
use crate::types::{NameOpKind, NameOperation};

/// Current state of one name in the mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameRecord {
    pub name: Vec<u8>,
    pub value: Vec<u8>,
    pub expired: bool,
    /// Height of the block holding the last applied operation.
    pub updated_height: u64,
}

/// Per-name mirror of the registry.
#[async_trait]
pub trait NameStore: Send + Sync {
    /// Insert or replace the value of `name`, clearing any expiry.
    async fn upsert(&self, name: &[u8], value: &[u8], height: u64) -> Result<(), SyncError>;

    /// Flag `name` as expired, keeping its last value. Unknown names are ignored.
    async fn mark_expired(&self, name: &[u8], height: u64) -> Result<(), SyncError>;

    async fn get(&self, name: &[u8]) -> Result<Option<NameRecord>, SyncError>;
}

/// A store that can take a block's operations together with the cursor
/// that follows them.
#[async_trait]
pub trait SyncTarget: NameStore + CursorStore {
    /// Apply `ops` in order, then save `cursor`.
    ///
    /// The default runs the steps one by one; a crash in between is safe
    /// because the cursor is written last. Transactional backends override it.
    async fn apply_block(&self, ops: &[NameOperation], cursor: &Cursor) -> Result<(), SyncError> {
        for op in ops {
            apply_op(self, op, cursor.block_height).await?;
        }
        self.save_cursor(cursor).await
    }
}

/// Route one operation to the matching [`NameStore`] call.
pub async fn apply_op<S: NameStore + ?Sized>(
    store: &S,
    op: &NameOperation,
    height: u64,
) -> Result<(), SyncError> {
    match op.kind {
        NameOpKind::FirstUpdate | NameOpKind::Update => store.upsert(&op.name, &op.value, height).await,
        NameOpKind::Expire => store.mark_expired(&op.name, height).await,
    }
}

// ─── In-memory store ──────────────────────────────────────────────────────────

/// In-memory names + cursors for tests and ephemeral mirrors.
#[derive(Default)]
pub struct MemoryStore {
    names: Mutex<BTreeMap<Vec<u8>, NameRecord>>,
    cursors: Mutex<HashMap<String, Cursor>>,
    failing_writes: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` name writes fail with a store error.
    pub fn fail_next_writes(&self, n: u32) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Snapshot of every record, ordered by name.
    pub fn snapshot(&self) -> Vec<NameRecord> {
        self.names.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.names.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.lock().is_empty()
    }

    fn check_write(&self) -> Result<(), SyncError> {
        let failing = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SyncError::Store("injected write failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl NameStore for MemoryStore {
    async fn upsert(&self, name: &[u8], value: &[u8], height: u64) -> Result<(), SyncError> {
        self.check_write()?;
        self.names.lock().insert(
            name.to_vec(),
            NameRecord {
                name: name.to_vec(),
                value: value.to_vec(),
                expired: false,
                updated_height: height,
            },
        );
        Ok(())
    }

    async fn mark_expired(&self, name: &[u8], height: u64) -> Result<(), SyncError> {
        self.check_write()?;
        if let Some(record) = self.names.lock().get_mut(name) {
            record.expired = true;
            record.updated_height = height;
        }
        Ok(())
    }

    async fn get(&self, name: &[u8]) -> Result<Option<NameRecord>, SyncError> {
        Ok(self.names.lock().get(name).cloned())
    }
}

#[async_trait]
impl CursorStore for MemoryStore {
    async fn load_cursor(&self, sync_id: &str) -> Result<Option<Cursor>, SyncError> {
        Ok(self.cursors.lock().get(sync_id).cloned())
    }

    async fn save_cursor(&self, cursor: &Cursor) -> Result<(), SyncError> {
        self.cursors.lock().insert(cursor.sync_id.clone(), cursor.clone());
        Ok(())
    }

    async fn delete_cursor(&self, sync_id: &str) -> Result<(), SyncError> {
        self.cursors.lock().remove(sync_id);
        Ok(())
    }
}

impl SyncTarget for MemoryStore {}
