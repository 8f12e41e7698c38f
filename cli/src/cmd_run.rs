//! `namesync run` — keep a SQLite mirror in step with a `name_sync` server.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::info;

use namesync_client::{SyncConfigBuilder, SyncExit, SyncLoop};
use namesync_core::{BlockHash, BlockRef, CursorStore};
use namesync_rpc::{HttpClientConfig, HttpRpcClient, RetryConfig, RpcEventSource};
use namesync_storage::SqliteStore;

use crate::{shutdown_on_ctrl_c, RunArgs};

pub async fn run(args: RunArgs) -> Result<()> {
    let sync_id = args.store.sync_id.clone();
    let store = SqliteStore::open(&args.store.db)
        .await
        .with_context(|| format!("opening {}", args.store.db))?;

    let start = match &args.start_block {
        Some(hash) => {
            let hash: BlockHash = hash.parse().context("invalid --start-block")?;
            BlockRef::new(hash, args.start_height)
        }
        None => {
            if store.load_cursor(&sync_id).await?.is_none() {
                bail!("no stored cursor for '{sync_id}'; pass --start-block for the first run");
            }
            // Unused: the stored cursor takes precedence.
            BlockRef::new(BlockHash::default(), 0)
        }
    };

    let mut builder = SyncConfigBuilder::new()
        .sync_id(sync_id)
        .start_block(start)
        .batch_size(args.batch_size)
        .wait(!args.no_wait)
        .retry(RetryConfig {
            max_retries: args.max_retries,
            initial_backoff_ms: args.initial_backoff_ms,
            max_backoff_ms: args.max_backoff_ms,
            ..RetryConfig::default()
        });
    if let Some(secs) = args.call_deadline_secs {
        builder = builder.call_deadline(Duration::from_secs(secs));
    }
    let config = builder.build_config();

    let client = HttpRpcClient::new(
        args.source.clone(),
        HttpClientConfig {
            connect_timeout_ms: Some(10_000),
            ..HttpClientConfig::default()
        },
    )
    .context("building name_sync client")?;
    let source = Arc::new(RpcEventSource::new(Arc::new(client)));

    let sync = SyncLoop::new(config, source, Arc::new(store))
        .with_status_hook(|status| info!(status, "sync status"));

    if args.once {
        let progress = sync.run_once().await?;
        println!(
            "applied {} operations in {} blocks; cursor at {} ({})",
            progress.ops_applied,
            progress.blocks_applied,
            progress.cursor.block_height,
            progress.cursor.block_hash
        );
        return Ok(());
    }

    match sync.run(shutdown_on_ctrl_c()).await? {
        SyncExit::Stopped => info!("sync stopped"),
        SyncExit::RemoteStopping => info!("name_sync server is shutting down; exiting"),
    }
    Ok(())
}
