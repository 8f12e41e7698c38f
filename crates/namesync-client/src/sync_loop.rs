//! The sync client loop.
//!
//! Each pass asks the source for the events after the cursor, applies every
//! block's operations together with that block's checkpoint, and repeats.
//! Transient failures back off and retry with the same cursor; a cursor the
//! source no longer recognizes stops the loop for operator intervention.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use namesync_core::{
    Cursor, CursorManager, EventBatch, EventSource, NameOperation, SyncError, SyncEvent, SyncTarget,
};
use namesync_rpc::RetryPolicy;

use crate::config::SyncConfig;

/// Receives `starting`, `synced to <height>`, `retrying (<attempt>)` and
/// `stopped`.
pub type StatusHook = Arc<dyn Fn(&str) + Send + Sync>;

/// How a [`SyncLoop::run`] ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncExit {
    /// The local shutdown token fired.
    Stopped,
    /// The source reported it is shutting down.
    RemoteStopping,
}

/// Result of one fetch-and-apply pass.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncProgress {
    pub cursor: Cursor,
    pub blocks_applied: usize,
    pub ops_applied: usize,
}

/// Drives an [`EventSource`] into a [`SyncTarget`].
///
/// Only one loop may own a given `sync_id` in a store at a time.
pub struct SyncLoop<E: ?Sized, S: ?Sized> {
    config: SyncConfig,
    source: Arc<E>,
    store: Arc<S>,
    cursor: CursorManager<S>,
    retry: RetryPolicy,
    status: Option<StatusHook>,
}

impl<E, S> SyncLoop<E, S>
where
    E: EventSource + ?Sized,
    S: SyncTarget + ?Sized,
{
    pub fn new(config: SyncConfig, source: Arc<E>, store: Arc<S>) -> Self {
        let cursor = CursorManager::new(Arc::clone(&store), config.sync_id.clone(), config.start());
        let retry = RetryPolicy::new(config.retry.clone());
        Self {
            config,
            source,
            store,
            cursor,
            retry,
            status: None,
        }
    }

    pub fn with_status_hook(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.status = Some(Arc::new(hook));
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The stored cursor, or the configured start on first run.
    pub async fn current_cursor(&self) -> Result<Cursor, SyncError> {
        self.cursor.load_or_seed().await
    }

    /// Run until `shutdown` fires, the source stops, or a fatal error.
    ///
    /// Cancellation abandons an in-flight call but never a block being
    /// applied, so the stored cursor always sits on a checkpoint.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<SyncExit, SyncError> {
        self.report("starting");
        let mut cursor = self.cursor.load_or_seed().await?;
        let mut attempt = 0u32;

        loop {
            let fetched = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(self.stopped(SyncExit::Stopped)),
                fetched = self.fetch(&cursor) => fetched,
            };

            let result = match fetched {
                // Deadline elapsed; re-issue without counting a failure.
                Ok(None) => continue,
                Ok(Some(batch)) => self.apply_batch(&mut cursor, &batch).await.map(|p| (batch, p)),
                Err(e) => Err(e),
            };

            match result {
                Ok((batch, progress)) => {
                    attempt = 0;
                    if progress.blocks_applied > 0 {
                        self.report(&format!("synced to {}", cursor.block_height));
                    }
                    if batch.is_empty() {
                        tokio::select! {
                            biased;
                            _ = shutdown.cancelled() => return Ok(self.stopped(SyncExit::Stopped)),
                            _ = tokio::time::sleep(self.config.idle_delay) => {}
                        }
                    }
                }
                Err(SyncError::ServiceStopping) => {
                    info!(sync_id = %cursor.sync_id, "source is stopping");
                    return Ok(self.stopped(SyncExit::RemoteStopping));
                }
                Err(e) if !e.is_transient() => {
                    error!(
                        sync_id = %cursor.sync_id,
                        height = cursor.block_height,
                        hash = %cursor.block_hash,
                        error = %e,
                        "sync halted"
                    );
                    return Err(e);
                }
                Err(e) => {
                    attempt += 1;
                    let Some(delay) = self.retry.next_delay(attempt) else {
                        error!(attempts = attempt, error = %e, "retries exhausted");
                        return Err(SyncError::RetriesExhausted {
                            attempts: attempt,
                            last: e.to_string(),
                        });
                    };
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "sync failed, backing off"
                    );
                    self.report(&format!("retrying ({attempt})"));
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => return Ok(self.stopped(SyncExit::Stopped)),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// A single fetch-and-apply pass from the stored cursor.
    pub async fn run_once(&self) -> Result<SyncProgress, SyncError> {
        let mut cursor = self.cursor.load_or_seed().await?;
        let batch = loop {
            if let Some(batch) = self.fetch(&cursor).await? {
                break batch;
            }
        };
        self.apply_batch(&mut cursor, &batch).await
    }

    /// Forget the stored cursor so the next run starts from the configured block.
    pub async fn reset(&self) -> Result<(), SyncError> {
        self.cursor.reset().await
    }

    async fn fetch(&self, cursor: &Cursor) -> Result<Option<EventBatch>, SyncError> {
        let call = self
            .source
            .sync(&cursor.block_hash, self.config.batch_size, self.config.wait);
        match self.config.call_deadline {
            Some(deadline) => match tokio::time::timeout(deadline, call).await {
                Ok(result) => result.map(Some),
                Err(_) => {
                    debug!(deadline_ms = deadline.as_millis() as u64, "sync call deadline elapsed");
                    Ok(None)
                }
            },
            None => call.await.map(Some),
        }
    }

    /// Apply `batch` block by block, advancing `cursor` after each commit.
    async fn apply_batch(
        &self,
        cursor: &mut Cursor,
        batch: &EventBatch,
    ) -> Result<SyncProgress, SyncError> {
        // Still on the configured start block: its height is operator input,
        // so the server's first checkpoint decides where the chain stands.
        let floor = if cursor.block_hash == self.config.start_block {
            if let Some(first) = batch.checkpoints().next() {
                if first.height <= cursor.block_height {
                    warn!(
                        configured = cursor.block_height,
                        first_checkpoint = first.height,
                        "configured start height is ahead of the chain; using server heights"
                    );
                }
            }
            None
        } else {
            Some(cursor.block_height)
        };
        validate_batch(floor, batch)?;

        let mut pending: Vec<NameOperation> = Vec::new();
        let mut blocks_applied = 0;
        let mut ops_applied = 0;
        for event in &batch.events {
            match event {
                SyncEvent::Name(op) => pending.push(op.clone()),
                SyncEvent::AtBlock(block) => {
                    let mut next = cursor.clone();
                    next.advance(*block);
                    self.store.apply_block(&pending, &next).await?;
                    *cursor = next;
                    blocks_applied += 1;
                    ops_applied += pending.len();
                    pending.clear();
                }
            }
        }

        if blocks_applied > 0 {
            debug!(
                sync_id = %cursor.sync_id,
                height = cursor.block_height,
                blocks = blocks_applied,
                ops = ops_applied,
                "batch applied"
            );
        }
        Ok(SyncProgress {
            cursor: cursor.clone(),
            blocks_applied,
            ops_applied,
        })
    }

    fn stopped(&self, exit: SyncExit) -> SyncExit {
        self.report("stopped");
        exit
    }

    fn report(&self, status: &str) {
        if let Some(hook) = &self.status {
            hook(status);
        }
    }
}

/// Reject a batch the cursor could not follow, before anything is applied.
///
/// With no `floor` the first checkpoint may sit at any height.
fn validate_batch(floor: Option<u64>, batch: &EventBatch) -> Result<(), SyncError> {
    let mut last_height = floor;
    let mut trailing_ops = 0usize;
    for event in &batch.events {
        match event {
            SyncEvent::Name(_) => trailing_ops += 1,
            SyncEvent::AtBlock(block) => {
                if let Some(last) = last_height.filter(|last| block.height <= *last) {
                    return Err(SyncError::InconsistentBatch(format!(
                        "checkpoint at height {} does not follow height {}",
                        block.height, last
                    )));
                }
                last_height = Some(block.height);
                trailing_ops = 0;
            }
        }
    }
    if trailing_ops > 0 {
        return Err(SyncError::InconsistentBatch(format!(
            "{trailing_ops} operations after the final checkpoint"
        )));
    }
    Ok(())
}
