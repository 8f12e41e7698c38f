//! End-to-end tests: MemoryLedger → EventExtractor → SyncLoop → MemoryStore,
//! in-process and through the `name_sync` RPC dispatcher.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use namesync_client::{SyncConfig, SyncConfigBuilder, SyncExit, SyncLoop};
use namesync_core::script::{encode_name_firstupdate, encode_name_update};
use namesync_core::{
    BlockHash, BlockRef, Cursor, CursorStore, EventBatch, EventExtractor, EventSource, MemoryLedger,
    MemoryStore, NameOpKind, NameOperation, NameRecord, NameStore, SyncError, SyncTarget,
    Transaction,
};
use namesync_rpc::{RetryConfig, RpcEventSource, SyncRpcHandler};

// ─── Fixtures ────────────────────────────────────────────────────────────────

fn firstupdate(name: &str, value: &str) -> Transaction {
    Transaction::from_scripts(vec![encode_name_firstupdate(
        name.as_bytes(),
        b"salt",
        value.as_bytes(),
        &[0x76, 0xa9],
    )])
}

fn update(name: &str, value: &str) -> Transaction {
    Transaction::from_scripts(vec![encode_name_update(name.as_bytes(), value.as_bytes(), &[])])
}

fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        initial_backoff_ms: 1,
        max_backoff_ms: 5,
        multiplier: 2.0,
        jitter_fraction: 0.0,
    }
}

fn config(start: BlockRef, wait: bool) -> SyncConfig {
    SyncConfigBuilder::new()
        .sync_id("test")
        .start_block(start)
        .batch_size(100)
        .wait(wait)
        .retry(fast_retry(5))
        .idle_delay(Duration::from_millis(5))
        .build_config()
}

/// Ledger with names in blocks 1 and 3 and an empty block 2.
fn sample_ledger() -> Arc<MemoryLedger> {
    let ledger = Arc::new(MemoryLedger::new());
    ledger.append(vec![firstupdate("d/a", "1")]);
    ledger.append_empty(1);
    ledger.append(vec![update("d/a", "2"), firstupdate("d/b", "x")]);
    ledger
}

fn extractor(ledger: &Arc<MemoryLedger>) -> Arc<EventExtractor<MemoryLedger>> {
    Arc::new(EventExtractor::new(Arc::clone(ledger), CancellationToken::new()))
}

type Statuses = Arc<Mutex<Vec<String>>>;

fn recording<E, S>(sync: SyncLoop<E, S>) -> (SyncLoop<E, S>, Statuses)
where
    E: EventSource + ?Sized,
    S: SyncTarget + ?Sized,
{
    let statuses: Statuses = Arc::default();
    let sink = Arc::clone(&statuses);
    (sync.with_status_hook(move |s| sink.lock().push(s.to_string())), statuses)
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    let reached = tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "timed out waiting for {what}");
}

// ─── Basic sync ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn syncs_chain_into_store() {
    let ledger = sample_ledger();
    let store = Arc::new(MemoryStore::new());
    let sync = SyncLoop::new(config(ledger.genesis(), false), extractor(&ledger), Arc::clone(&store));

    let progress = sync.run_once().await.unwrap();
    assert_eq!(progress.blocks_applied, 2);
    assert_eq!(progress.ops_applied, 3);
    assert_eq!(progress.cursor.block(), ledger.tip_ref());

    let a = store.get(b"d/a").await.unwrap().unwrap();
    assert_eq!(a.value, b"2");
    assert_eq!(a.updated_height, 3);
    assert_eq!(store.len(), 2);
    assert_eq!(store.load_cursor("test").await.unwrap().unwrap().block_height, 3);

    // At the tip without waiting: nothing new, cursor unchanged.
    let idle = sync.run_once().await.unwrap();
    assert_eq!(idle.blocks_applied, 0);
    assert_eq!(idle.cursor.block_height, 3);
}

#[tokio::test]
async fn wrong_start_height_is_corrected_by_first_checkpoint() {
    let ledger = sample_ledger();
    let store = Arc::new(MemoryStore::new());
    let start = BlockRef::new(ledger.genesis().hash, 50);
    let sync = SyncLoop::new(config(start, false), extractor(&ledger), Arc::clone(&store));

    let progress = sync.run_once().await.unwrap();
    assert_eq!(progress.blocks_applied, 2);
    assert_eq!(progress.cursor.block(), ledger.tip_ref());
    assert_eq!(store.load_cursor("test").await.unwrap().unwrap().block_height, 3);
}

#[tokio::test]
async fn small_batches_walk_the_chain() {
    let ledger = Arc::new(MemoryLedger::new());
    for i in 0..5 {
        ledger.append(vec![firstupdate(&format!("d/n{i}"), "v")]);
    }
    let store = Arc::new(MemoryStore::new());
    let mut cfg = config(ledger.genesis(), false);
    cfg.batch_size = 0;
    let sync = SyncLoop::new(cfg, extractor(&ledger), Arc::clone(&store));

    let mut passes = 0;
    loop {
        let progress = sync.run_once().await.unwrap();
        if progress.blocks_applied == 0 {
            break;
        }
        passes += 1;
        assert_eq!(progress.cursor.block_height, passes);
    }
    assert_eq!(passes, 5);
    assert_eq!(store.len(), 5);
}

#[tokio::test]
async fn reset_and_replay_leaves_same_state() {
    let ledger = sample_ledger();
    let store = Arc::new(MemoryStore::new());
    let sync = SyncLoop::new(config(ledger.genesis(), false), extractor(&ledger), Arc::clone(&store));

    sync.run_once().await.unwrap();
    let first = store.snapshot();

    sync.reset().await.unwrap();
    assert_eq!(sync.current_cursor().await.unwrap().block(), ledger.genesis());
    sync.run_once().await.unwrap();
    assert_eq!(store.snapshot(), first);
}

// ─── Crash / resume ──────────────────────────────────────────────────────────

/// Delegates to a `MemoryStore`, failing the `fail_at`-th name write.
struct CrashingStore {
    inner: MemoryStore,
    writes: AtomicU32,
    fail_at: u32,
}

impl CrashingStore {
    fn write(&self) -> Result<(), SyncError> {
        if self.writes.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_at {
            return Err(SyncError::Store("simulated crash".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl NameStore for CrashingStore {
    async fn upsert(&self, name: &[u8], value: &[u8], height: u64) -> Result<(), SyncError> {
        self.write()?;
        self.inner.upsert(name, value, height).await
    }

    async fn mark_expired(&self, name: &[u8], height: u64) -> Result<(), SyncError> {
        self.write()?;
        self.inner.mark_expired(name, height).await
    }

    async fn get(&self, name: &[u8]) -> Result<Option<NameRecord>, SyncError> {
        self.inner.get(name).await
    }
}

#[async_trait]
impl CursorStore for CrashingStore {
    async fn load_cursor(&self, sync_id: &str) -> Result<Option<Cursor>, SyncError> {
        self.inner.load_cursor(sync_id).await
    }

    async fn save_cursor(&self, cursor: &Cursor) -> Result<(), SyncError> {
        self.inner.save_cursor(cursor).await
    }

    async fn delete_cursor(&self, sync_id: &str) -> Result<(), SyncError> {
        self.inner.delete_cursor(sync_id).await
    }
}

impl SyncTarget for CrashingStore {}

#[tokio::test]
async fn failure_mid_batch_keeps_cursor_on_last_block_and_resumes() {
    let ledger = sample_ledger();
    // Writes: d/a (block 1), then d/a and d/b (block 3). The third one fails.
    let store = Arc::new(CrashingStore {
        inner: MemoryStore::new(),
        writes: AtomicU32::new(0),
        fail_at: 3,
    });
    let sync = SyncLoop::new(config(ledger.genesis(), false), extractor(&ledger), Arc::clone(&store));

    let err = sync.run_once().await.unwrap_err();
    assert!(matches!(err, SyncError::Store(_)));
    // Block 1 committed; block 3 half-applied but its cursor not saved.
    let stored = store.load_cursor("test").await.unwrap().unwrap();
    assert_eq!(stored.block_height, 1);
    assert_eq!(store.inner.get(b"d/a").await.unwrap().unwrap().value, b"2");

    sync.run_once().await.unwrap();

    let clean = Arc::new(MemoryStore::new());
    SyncLoop::new(config(ledger.genesis(), false), extractor(&ledger), Arc::clone(&clean))
        .run_once()
        .await
        .unwrap();
    assert_eq!(store.inner.snapshot(), clean.snapshot());
    assert_eq!(store.load_cursor("test").await.unwrap().unwrap().block_height, 3);
}

// ─── Long poll / shutdown ────────────────────────────────────────────────────

#[tokio::test]
async fn long_poll_picks_up_new_blocks_until_stopped() {
    let ledger = Arc::new(MemoryLedger::new());
    let store = Arc::new(MemoryStore::new());
    let (sync, statuses) = recording(SyncLoop::new(
        config(ledger.genesis(), true),
        extractor(&ledger),
        Arc::clone(&store),
    ));
    let sync = Arc::new(sync);
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn({
        let sync = Arc::clone(&sync);
        let shutdown = shutdown.clone();
        async move { sync.run(shutdown).await }
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    ledger.append(vec![firstupdate("d/live", "on")]);
    eventually("d/live", || store.len() == 1).await;

    ledger.append(vec![update("d/live", "off")]);
    eventually("synced to 2", || statuses.lock().iter().any(|s| s == "synced to 2")).await;

    shutdown.cancel();
    assert_eq!(handle.await.unwrap().unwrap(), SyncExit::Stopped);
    assert_eq!(store.snapshot()[0].value, b"off");

    let statuses = statuses.lock();
    assert_eq!(statuses.first().map(String::as_str), Some("starting"));
    assert_eq!(statuses.last().map(String::as_str), Some("stopped"));
}

#[tokio::test]
async fn remote_shutdown_ends_loop_gracefully() {
    let ledger = Arc::new(MemoryLedger::new());
    let server_shutdown = CancellationToken::new();
    let source = Arc::new(EventExtractor::new(Arc::clone(&ledger), server_shutdown.clone()));
    let store = Arc::new(MemoryStore::new());
    let sync = SyncLoop::new(config(ledger.genesis(), true), source, store);

    let run = tokio::spawn(async move { sync.run(CancellationToken::new()).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    server_shutdown.cancel();

    assert_eq!(run.await.unwrap().unwrap(), SyncExit::RemoteStopping);
}

#[tokio::test]
async fn call_deadline_reissues_without_backoff() {
    let ledger = Arc::new(MemoryLedger::new());
    let store = Arc::new(MemoryStore::new());
    let mut cfg = config(ledger.genesis(), true);
    cfg.call_deadline = Some(Duration::from_millis(10));
    let (sync, statuses) = recording(SyncLoop::new(cfg, extractor(&ledger), Arc::clone(&store)));
    let sync = Arc::new(sync);
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn({
        let sync = Arc::clone(&sync);
        let shutdown = shutdown.clone();
        async move { sync.run(shutdown).await }
    });

    // Several deadlines pass before the block arrives.
    tokio::time::sleep(Duration::from_millis(60)).await;
    ledger.append(vec![firstupdate("d/late", "1")]);
    eventually("d/late", || store.len() == 1).await;

    shutdown.cancel();
    assert_eq!(handle.await.unwrap().unwrap(), SyncExit::Stopped);
    assert!(!statuses.lock().iter().any(|s| s.starts_with("retrying")));
}

// ─── Errors ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn transient_read_failures_back_off_then_recover() {
    let ledger = sample_ledger();
    ledger.fail_next_reads(2);
    let store = Arc::new(MemoryStore::new());
    let (sync, statuses) = recording(SyncLoop::new(
        config(ledger.genesis(), false),
        extractor(&ledger),
        Arc::clone(&store),
    ));
    let sync = Arc::new(sync);
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn({
        let sync = Arc::clone(&sync);
        let shutdown = shutdown.clone();
        async move { sync.run(shutdown).await }
    });

    eventually("synced to 3", || statuses.lock().iter().any(|s| s == "synced to 3")).await;
    shutdown.cancel();
    assert_eq!(handle.await.unwrap().unwrap(), SyncExit::Stopped);

    let statuses = statuses.lock();
    assert!(statuses.iter().any(|s| s == "retrying (1)"));
    assert!(statuses.iter().any(|s| s == "retrying (2)"));
    assert!(!statuses.iter().any(|s| s == "retrying (3)"));
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn store_write_failures_back_off_then_recover() {
    let ledger = sample_ledger();
    let store = Arc::new(MemoryStore::new());
    store.fail_next_writes(1);
    let (sync, statuses) = recording(SyncLoop::new(
        config(ledger.genesis(), false),
        extractor(&ledger),
        Arc::clone(&store),
    ));
    let sync = Arc::new(sync);
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn({
        let sync = Arc::clone(&sync);
        let shutdown = shutdown.clone();
        async move { sync.run(shutdown).await }
    });

    eventually("synced to 3", || statuses.lock().iter().any(|s| s == "synced to 3")).await;
    shutdown.cancel();
    assert_eq!(handle.await.unwrap().unwrap(), SyncExit::Stopped);

    assert!(statuses.lock().iter().any(|s| s == "retrying (1)"));
    assert_eq!(store.get(b"d/a").await.unwrap().unwrap().value, b"2");
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn retries_are_bounded() {
    let ledger = sample_ledger();
    ledger.fail_next_reads(1_000);
    let mut cfg = config(ledger.genesis(), false);
    cfg.retry = fast_retry(2);
    let sync = SyncLoop::new(cfg, extractor(&ledger), Arc::new(MemoryStore::new()));

    let err = sync.run(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, SyncError::RetriesExhausted { attempts: 3, .. }), "{err}");
}

#[tokio::test]
async fn unknown_cursor_is_fatal() {
    let ledger = sample_ledger();
    let store = Arc::new(MemoryStore::new());
    let bogus = BlockRef::new(BlockHash::from_bytes([0xab; 32]), 7);
    let sync = SyncLoop::new(config(bogus, true), extractor(&ledger), Arc::clone(&store));

    let err = sync.run(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, SyncError::UnknownBlock(_)));
    assert!(store.is_empty());
    assert!(store.load_cursor("test").await.unwrap().is_none());
}

#[tokio::test]
async fn orphaned_cursor_is_fatal() {
    let ledger = sample_ledger();
    let store = Arc::new(MemoryStore::new());
    let sync = SyncLoop::new(config(ledger.genesis(), true), extractor(&ledger), Arc::clone(&store));
    sync.run_once().await.unwrap();

    ledger.reorganize(1, vec![vec![], vec![], vec![]]);
    let err = sync.run(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, SyncError::NotOnCanonicalChain { height: 3, .. }));
}

/// Returns a fixed batch on every call.
struct ScriptedSource(EventBatch);

#[async_trait]
impl EventSource for ScriptedSource {
    async fn sync(&self, _: &BlockHash, _: i64, _: bool) -> Result<EventBatch, SyncError> {
        Ok(self.0.clone())
    }
}

#[tokio::test]
async fn inconsistent_batch_is_fatal_and_applies_nothing() {
    let mut batch = EventBatch::new();
    batch.push_op(NameOperation::new(NameOpKind::FirstUpdate, "d/x", "1"));
    batch.push_checkpoint(BlockRef::new(BlockHash::from_bytes([1; 32]), 1));
    batch.push_op(NameOperation::new(NameOpKind::Update, "d/x", "2"));

    let store = Arc::new(MemoryStore::new());
    let start = BlockRef::new(BlockHash::from_bytes([0; 32]), 0);
    let sync = SyncLoop::new(config(start, true), Arc::new(ScriptedSource(batch)), Arc::clone(&store));

    let err = sync.run(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, SyncError::InconsistentBatch(_)));
    assert!(store.is_empty());
}

// ─── Over RPC ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn rpc_source_matches_in_process_source() {
    let ledger = sample_ledger();
    let handler = Arc::new(SyncRpcHandler::new(extractor(&ledger)));
    let remote = Arc::new(RpcEventSource::new(handler));

    let via_rpc = Arc::new(MemoryStore::new());
    SyncLoop::new(config(ledger.genesis(), false), remote, Arc::clone(&via_rpc))
        .run_once()
        .await
        .unwrap();

    let direct = Arc::new(MemoryStore::new());
    SyncLoop::new(config(ledger.genesis(), false), extractor(&ledger), Arc::clone(&direct))
        .run_once()
        .await
        .unwrap();

    assert_eq!(via_rpc.snapshot(), direct.snapshot());
}

#[tokio::test]
async fn rpc_unknown_block_is_fatal() {
    let ledger = sample_ledger();
    let remote = Arc::new(RpcEventSource::new(Arc::new(SyncRpcHandler::new(extractor(&ledger)))));
    let bogus = BlockRef::new(BlockHash::from_bytes([0xcd; 32]), 1);
    let sync = SyncLoop::new(config(bogus, false), remote, Arc::new(MemoryStore::new()));

    let err = sync.run(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, SyncError::UnknownBlock(_)));
}
