//! `namesync serve` — expose `name_sync` for a node.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use namesync_core::EventExtractor;
use namesync_rpc::{serve, HttpClientConfig, HttpRpcClient, NodeLedger, NodeLedgerConfig, SyncRpcHandler};

use crate::{shutdown_on_ctrl_c, ServeArgs};

pub async fn run(args: ServeArgs) -> Result<()> {
    let node = HttpRpcClient::new(
        args.node.node_url.clone(),
        HttpClientConfig {
            user: args.node.node_user.clone(),
            password: args.node.node_password.clone(),
            request_timeout_ms: Some(30_000),
            connect_timeout_ms: Some(5_000),
        },
    )
    .context("building node client")?;

    let ledger = NodeLedger::connect(
        Arc::new(node),
        NodeLedgerConfig {
            poll_interval_ms: args.poll_interval_ms,
        },
    )
    .await
    .with_context(|| format!("connecting to node at {}", args.node.node_url))?;
    let ledger = Arc::new(ledger);

    let shutdown = shutdown_on_ctrl_c();
    let poller = ledger.spawn_tip_poller(shutdown.clone());
    let extractor = Arc::new(EventExtractor::new(ledger, shutdown.clone()));
    let handler = Arc::new(SyncRpcHandler::new(extractor));

    info!(listen = %args.listen, node = %args.node.node_url, "starting name_sync server");
    let served = serve(args.listen, handler, shutdown.clone())
        .await
        .with_context(|| format!("serving on {}", args.listen));

    shutdown.cancel();
    poller.await.context("tip poller panicked")?;
    served
}
