//! Event extractor — turns a range of blocks into an ordered, resumable
//! stream of name operations and checkpoints.
//!
//! A call scans from the successor of `start` up to the tip sampled at call
//! time (or at long-poll wakeup). Whole blocks are always processed; the scan
//! stops after the block in which the emitted operation count first exceeds
//! `count`. A checkpoint follows every block that produced operations and
//! the last block scanned.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::SyncError;
use crate::ledger::Ledger;
use crate::script;
use crate::types::{BlockHash, BlockRef, EventBatch};

/// Anything that can answer a sync request: the extractor itself, or a
/// remote one reached over RPC.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn sync(
        &self,
        start: &BlockHash,
        count: i64,
        wait: bool,
    ) -> Result<EventBatch, SyncError>;
}

/// Stateless extraction over a shared [`Ledger`].
pub struct EventExtractor<L> {
    ledger: Arc<L>,
    shutdown: CancellationToken,
}

impl<L> Clone for EventExtractor<L> {
    fn clone(&self) -> Self {
        Self {
            ledger: Arc::clone(&self.ledger),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<L: Ledger> EventExtractor<L> {
    /// `shutdown` interrupts pending long polls with `ServiceStopping`.
    pub fn new(ledger: Arc<L>, shutdown: CancellationToken) -> Self {
        Self { ledger, shutdown }
    }

    /// Extract events following `start`.
    pub async fn sync(
        &self,
        start: &BlockHash,
        count: i64,
        wait: bool,
    ) -> Result<EventBatch, SyncError> {
        if count < 0 {
            return Ok(EventBatch::new());
        }

        // Subscribe before sampling the tip so an append in between is not lost.
        let mut tip_rx = self.ledger.subscribe_tip();
        let start_ref = self.resolve_start(start).await?;
        let mut tip = self.ledger.tip().await?;

        if wait && tip.hash == start_ref.hash {
            debug!(start = %start, height = start_ref.height, "waiting for a new tip");
            tip = self.wait_for_new_tip(&start_ref, &mut tip_rx).await?;
            self.ensure_canonical(&start_ref).await?;
        }

        let batch = self.scan(start_ref, tip.height, count as u64).await?;
        debug!(
            start = %start,
            count,
            wait,
            events = batch.len(),
            ops = batch.name_operation_count(),
            "sync extracted"
        );
        Ok(batch)
    }

    async fn resolve_start(&self, start: &BlockHash) -> Result<BlockRef, SyncError> {
        let start_ref = self
            .ledger
            .lookup_block(start)
            .await?
            .ok_or_else(|| SyncError::UnknownBlock(start.to_hex()))?;
        self.ensure_canonical(&start_ref).await?;
        Ok(start_ref)
    }

    async fn ensure_canonical(&self, block: &BlockRef) -> Result<(), SyncError> {
        match self.ledger.block_at_height(block.height).await? {
            Some(canonical) if canonical.hash == block.hash => Ok(()),
            _ => Err(SyncError::NotOnCanonicalChain {
                hash: block.hash.to_hex(),
                height: block.height,
            }),
        }
    }

    /// Suspend until the tip differs from `start`. No ledger lock is held
    /// while suspended; every wakeup re-reads the tip.
    async fn wait_for_new_tip(
        &self,
        start: &BlockRef,
        tip_rx: &mut watch::Receiver<BlockRef>,
    ) -> Result<BlockRef, SyncError> {
        loop {
            let tip = self.ledger.tip().await?;
            if tip.hash != start.hash {
                return Ok(tip);
            }
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Err(SyncError::ServiceStopping),
                changed = tip_rx.changed() => {
                    if changed.is_err() {
                        return Err(SyncError::ServiceStopping);
                    }
                }
            }
        }
    }

    async fn scan(
        &self,
        start: BlockRef,
        tip_height: u64,
        count: u64,
    ) -> Result<EventBatch, SyncError> {
        let mut batch = EventBatch::new();
        let mut emitted = 0u64;
        let mut last_scanned: Option<BlockRef> = None;
        let mut last_checkpoint: Option<BlockRef> = None;

        for height in start.height + 1..=tip_height {
            // The chain may have shrunk since the tip was sampled.
            let Some(block_ref) = self.ledger.block_at_height(height).await? else {
                break;
            };
            let block = self.ledger.read_block(&block_ref).await?;

            let before = emitted;
            for tx in &block.transactions {
                for output in &tx.outputs {
                    if let Some(op) = script::decode_output(&output.script) {
                        batch.push_op(op);
                        emitted += 1;
                    }
                }
            }

            let exhausted = emitted > count;
            last_scanned = Some(block_ref);
            if emitted > before || exhausted || height == tip_height {
                batch.push_checkpoint(block_ref);
                last_checkpoint = Some(block_ref);
            }
            if exhausted {
                break;
            }
        }

        if let Some(last) = last_scanned {
            if last_checkpoint != Some(last) {
                batch.push_checkpoint(last);
            }
        }
        Ok(batch)
    }
}

#[async_trait]
impl<L: Ledger + 'static> EventSource for EventExtractor<L> {
    async fn sync(
        &self,
        start: &BlockHash,
        count: i64,
        wait: bool,
    ) -> Result<EventBatch, SyncError> {
        EventExtractor::sync(self, start, count, wait).await
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
