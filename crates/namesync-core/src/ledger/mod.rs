//! Read-only ledger query interface consumed by the extractor.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::SyncError;
use crate::types::{BlockHash, BlockRef};

pub mod memory;

pub use memory::MemoryLedger;

/// A single transaction output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Raw output script bytes.
    pub script: Vec<u8>,
}

impl TxOutput {
    pub fn new(script: impl Into<Vec<u8>>) -> Self {
        Self { script: script.into() }
    }
}

/// A transaction, reduced to what name extraction needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub txid: String,
    /// Outputs in on-chain order.
    pub outputs: Vec<TxOutput>,
}

/// A fully read block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub hash: BlockHash,
    pub height: u64,
    /// Transactions in on-chain order.
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn block_ref(&self) -> BlockRef {
        BlockRef::new(self.hash, self.height)
    }
}

/// Read access to a blockchain's blocks and canonical chain.
///
/// Implementations must not hold internal locks across `.await` points so
/// that a long-polling reader never blocks block ingestion.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Resolve a hash to a known block, canonical or not.
    async fn lookup_block(&self, hash: &BlockHash) -> Result<Option<BlockRef>, SyncError>;

    /// Read a known block's transactions.
    async fn read_block(&self, block: &BlockRef) -> Result<Block, SyncError>;

    /// The current canonical tip.
    async fn tip(&self) -> Result<BlockRef, SyncError>;

    /// The canonical block at `height`, if the chain is that long.
    async fn block_at_height(&self, height: u64) -> Result<Option<BlockRef>, SyncError>;

    /// Subscribe to tip changes. The receiver yields every new tip.
    fn subscribe_tip(&self) -> watch::Receiver<BlockRef>;
}
