//! [`Ledger`] backed by a Namecoin node's JSON-RPC interface.
//!
//! Queries `getbestblockhash`, `getblockheader`, `getblockhash` and
//! `getblock <hash> 2`. Tip changes are discovered by polling; start the
//! poller with [`NodeLedger::spawn_tip_poller`] before serving long polls.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use namesync_core::{Block, BlockHash, BlockRef, Ledger, SyncError, Transaction, TxOutput};

use crate::error::TransportError;
use crate::request::codes;
use crate::transport::{call, RpcTransport};

/// bitcoind's "block not found" fault.
const RPC_INVALID_ADDRESS_OR_KEY: i64 = -5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeLedgerConfig {
    /// How often the poller asks the node for its best block.
    pub poll_interval_ms: u64,
}

impl Default for NodeLedgerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
        }
    }
}

#[derive(Debug, Deserialize)]
struct HeaderInfo {
    height: u64,
}

#[derive(Debug, Deserialize)]
struct VerboseBlock {
    tx: Vec<VerboseTx>,
}

#[derive(Debug, Deserialize)]
struct VerboseTx {
    txid: String,
    vout: Vec<VerboseOutput>,
}

#[derive(Debug, Deserialize)]
struct VerboseOutput {
    #[serde(rename = "scriptPubKey")]
    script_pub_key: ScriptPubKey,
}

#[derive(Debug, Deserialize)]
struct ScriptPubKey {
    hex: String,
}

/// A node reached over an [`RpcTransport`].
pub struct NodeLedger<T: ?Sized> {
    transport: Arc<T>,
    config: NodeLedgerConfig,
    next_id: AtomicU64,
    tip_tx: watch::Sender<BlockRef>,
}

impl<T: RpcTransport + ?Sized> NodeLedger<T> {
    /// Connect and read the node's current tip.
    pub async fn connect(transport: Arc<T>, config: NodeLedgerConfig) -> Result<Self, SyncError> {
        let (tip_tx, _) = watch::channel(BlockRef::new(BlockHash::default(), 0));
        let ledger = Self {
            transport,
            config,
            next_id: AtomicU64::new(1),
            tip_tx,
        };
        let tip = ledger.fetch_tip().await?;
        ledger.tip_tx.send_replace(tip);
        debug!(url = ledger.transport.url(), height = tip.height, tip = %tip.hash, "connected to node");
        Ok(ledger)
    }

    /// Re-read the tip and notify subscribers if it moved.
    pub async fn refresh_tip(&self) -> Result<BlockRef, SyncError> {
        let tip = self.fetch_tip().await?;
        self.tip_tx.send_if_modified(|current| {
            if *current == tip {
                false
            } else {
                *current = tip;
                true
            }
        });
        Ok(tip)
    }

    /// Poll the node until `shutdown` fires.
    pub fn spawn_tip_poller(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let ledger = Arc::clone(self);
        let interval = Duration::from_millis(ledger.config.poll_interval_ms.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = ledger.refresh_tip().await {
                            warn!(error = %e, "tip poll failed");
                        }
                    }
                }
            }
            debug!("tip poller stopped");
        })
    }

    async fn rpc<R: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<R, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        call(self.transport.as_ref(), id, method, params).await
    }

    async fn fetch_tip(&self) -> Result<BlockRef, SyncError> {
        let best: String = self.rpc("getbestblockhash", vec![]).await.map_err(read_error)?;
        let hash: BlockHash = best.parse()?;
        let header: HeaderInfo = self
            .rpc("getblockheader", vec![json!(best), json!(true)])
            .await
            .map_err(read_error)?;
        Ok(BlockRef::new(hash, header.height))
    }
}

#[async_trait]
impl<T: RpcTransport + ?Sized> Ledger for NodeLedger<T> {
    async fn lookup_block(&self, hash: &BlockHash) -> Result<Option<BlockRef>, SyncError> {
        match self
            .rpc::<HeaderInfo>("getblockheader", vec![json!(hash.to_hex()), json!(true)])
            .await
        {
            Ok(header) => Ok(Some(BlockRef::new(*hash, header.height))),
            Err(TransportError::Rpc(fault)) if fault.code == RPC_INVALID_ADDRESS_OR_KEY => Ok(None),
            Err(e) => Err(read_error(e)),
        }
    }

    async fn read_block(&self, block: &BlockRef) -> Result<Block, SyncError> {
        let verbose: VerboseBlock = self
            .rpc("getblock", vec![json!(block.hash.to_hex()), json!(2)])
            .await
            .map_err(read_error)?;

        let mut transactions = Vec::with_capacity(verbose.tx.len());
        for tx in verbose.tx {
            let mut outputs = Vec::with_capacity(tx.vout.len());
            for out in tx.vout {
                let script = hex::decode(&out.script_pub_key.hex).map_err(|e| {
                    SyncError::LedgerRead(format!("bad script hex in tx {}: {e}", tx.txid))
                })?;
                outputs.push(TxOutput::new(script));
            }
            transactions.push(Transaction {
                txid: tx.txid,
                outputs,
            });
        }

        Ok(Block {
            hash: block.hash,
            height: block.height,
            transactions,
        })
    }

    async fn tip(&self) -> Result<BlockRef, SyncError> {
        self.fetch_tip().await
    }

    async fn block_at_height(&self, height: u64) -> Result<Option<BlockRef>, SyncError> {
        match self.rpc::<String>("getblockhash", vec![json!(height)]).await {
            Ok(hex) => Ok(Some(BlockRef::new(hex.parse()?, height))),
            // Height out of range.
            Err(TransportError::Rpc(fault)) if fault.code == codes::INVALID_PARAMETER => Ok(None),
            Err(e) => Err(read_error(e)),
        }
    }

    fn subscribe_tip(&self) -> watch::Receiver<BlockRef> {
        self.tip_tx.subscribe()
    }
}

fn read_error(err: TransportError) -> SyncError {
    SyncError::LedgerRead(err.to_string())
}
