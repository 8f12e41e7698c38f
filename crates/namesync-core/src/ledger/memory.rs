//! In-memory ledger for tests, demos and embedding.
//!
//! Blocks are kept in a hash map (so orphaned blocks stay resolvable after a
//! reorganization) plus a vector of canonical hashes indexed by height.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tokio::sync::watch;

use super::{Block, Ledger, Transaction, TxOutput};
use crate::error::SyncError;
use crate::types::{BlockHash, BlockRef};

struct Inner {
    blocks: HashMap<BlockHash, Block>,
    /// Canonical chain; index = height.
    chain: Vec<BlockHash>,
    nonce: u64,
}

/// A mutable in-memory chain implementing [`Ledger`].
pub struct MemoryLedger {
    inner: RwLock<Inner>,
    tip_tx: watch::Sender<BlockRef>,
    failing_reads: AtomicU32,
    calls: AtomicU64,
}

impl MemoryLedger {
    /// Create a chain containing only an empty genesis block.
    pub fn new() -> Self {
        let genesis = Block {
            hash: block_hash(&BlockHash::default(), 0, 0, &[]),
            height: 0,
            transactions: vec![],
        };
        let tip = genesis.block_ref();
        let mut blocks = HashMap::new();
        blocks.insert(genesis.hash, genesis);
        let (tip_tx, _) = watch::channel(tip);
        Self {
            inner: RwLock::new(Inner {
                blocks,
                chain: vec![tip.hash],
                nonce: 1,
            }),
            tip_tx,
            failing_reads: AtomicU32::new(0),
            calls: AtomicU64::new(0),
        }
    }

    pub fn genesis(&self) -> BlockRef {
        let inner = self.inner.read();
        BlockRef::new(inner.chain[0], 0)
    }

    pub fn tip_ref(&self) -> BlockRef {
        let inner = self.inner.read();
        let height = inner.chain.len() as u64 - 1;
        BlockRef::new(inner.chain[height as usize], height)
    }

    /// Append a block on top of the canonical tip and notify waiters.
    pub fn append(&self, transactions: Vec<Transaction>) -> BlockRef {
        let new_tip = {
            let mut inner = self.inner.write();
            push_block(&mut inner, transactions)
        };
        self.tip_tx.send_replace(new_tip);
        new_tip
    }

    /// Append several blocks in one write; waiters see only the final tip.
    pub fn append_many(&self, blocks: Vec<Vec<Transaction>>) -> Vec<BlockRef> {
        let (refs, new_tip) = {
            let mut inner = self.inner.write();
            let refs: Vec<BlockRef> =
                blocks.into_iter().map(|txs| push_block(&mut inner, txs)).collect();
            let height = inner.chain.len() as u64 - 1;
            (refs, BlockRef::new(inner.chain[height as usize], height))
        };
        self.tip_tx.send_replace(new_tip);
        refs
    }

    /// Append `n` blocks without transactions.
    pub fn append_empty(&self, n: usize) -> Vec<BlockRef> {
        (0..n).map(|_| self.append(vec![])).collect()
    }

    /// Drop canonical blocks above `fork_height` and build `branch` on top.
    ///
    /// Dropped blocks remain resolvable by hash but are no longer canonical.
    pub fn reorganize(&self, fork_height: u64, branch: Vec<Vec<Transaction>>) -> Vec<BlockRef> {
        let (refs, new_tip) = {
            let mut inner = self.inner.write();
            inner.chain.truncate(fork_height as usize + 1);
            let refs: Vec<BlockRef> =
                branch.into_iter().map(|txs| push_block(&mut inner, txs)).collect();
            let height = inner.chain.len() as u64 - 1;
            (refs, BlockRef::new(inner.chain[height as usize], height))
        };
        tracing::debug!(fork_height, new_tip = new_tip.height, "memory ledger reorganized");
        self.tip_tx.send_replace(new_tip);
        refs
    }

    /// Make the next `n` calls to `read_block` fail with `LedgerRead`.
    pub fn fail_next_reads(&self, n: u32) {
        self.failing_reads.store(n, Ordering::SeqCst);
    }

    /// Number of `Ledger` query calls served so far.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

fn push_block(inner: &mut Inner, transactions: Vec<Transaction>) -> BlockRef {
    let height = inner.chain.len() as u64;
    let parent = inner.chain[height as usize - 1];
    let hash = block_hash(&parent, height, inner.nonce, &transactions);
    inner.nonce += 1;
    inner.blocks.insert(
        hash,
        Block {
            hash,
            height,
            transactions,
        },
    );
    inner.chain.push(hash);
    BlockRef::new(hash, height)
}

fn sha256d(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    Sha256::digest(first).into()
}

fn block_hash(parent: &BlockHash, height: u64, nonce: u64, txs: &[Transaction]) -> BlockHash {
    let mut buf = Vec::with_capacity(48 + txs.len() * 64);
    buf.extend_from_slice(parent.as_bytes());
    buf.extend_from_slice(&height.to_le_bytes());
    buf.extend_from_slice(&nonce.to_le_bytes());
    for tx in txs {
        buf.extend_from_slice(tx.txid.as_bytes());
    }
    BlockHash::from_bytes(sha256d(&buf))
}

impl Transaction {
    /// Build a transaction from output scripts; the txid is derived from them.
    pub fn from_scripts(scripts: Vec<Vec<u8>>) -> Self {
        let mut buf = Vec::new();
        for s in &scripts {
            buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
            buf.extend_from_slice(s);
        }
        Self {
            txid: hex::encode(sha256d(&buf)),
            outputs: scripts.into_iter().map(TxOutput::new).collect(),
        }
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn lookup_block(&self, hash: &BlockHash) -> Result<Option<BlockRef>, SyncError> {
        self.record_call();
        Ok(self.inner.read().blocks.get(hash).map(Block::block_ref))
    }

    async fn read_block(&self, block: &BlockRef) -> Result<Block, SyncError> {
        self.record_call();
        let failing = self
            .failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SyncError::LedgerRead(format!(
                "injected read failure at height {}",
                block.height
            )));
        }
        self.inner
            .read()
            .blocks
            .get(&block.hash)
            .cloned()
            .ok_or_else(|| SyncError::LedgerRead(format!("block {} vanished", block.hash)))
    }

    async fn tip(&self) -> Result<BlockRef, SyncError> {
        self.record_call();
        Ok(self.tip_ref())
    }

    async fn block_at_height(&self, height: u64) -> Result<Option<BlockRef>, SyncError> {
        self.record_call();
        let inner = self.inner.read();
        Ok(inner
            .chain
            .get(height as usize)
            .map(|hash| BlockRef::new(*hash, height)))
    }

    fn subscribe_tip(&self) -> watch::Receiver<BlockRef> {
        self.tip_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_extends_canonical_chain() {
        let ledger = MemoryLedger::new();
        let b1 = ledger.append(vec![]);
        let b2 = ledger.append(vec![Transaction::from_scripts(vec![vec![0x51]])]);

        assert_eq!(b1.height, 1);
        assert_eq!(b2.height, 2);
        assert_eq!(ledger.tip().await.unwrap(), b2);
        assert_eq!(ledger.block_at_height(1).await.unwrap(), Some(b1));
        assert!(ledger.block_at_height(3).await.unwrap().is_none());
        assert_eq!(ledger.read_block(&b2).await.unwrap().transactions.len(), 1);
    }

    #[tokio::test]
    async fn reorganize_orphans_old_blocks() {
        let ledger = MemoryLedger::new();
        let old = ledger.append_empty(3);
        let new = ledger.reorganize(1, vec![vec![], vec![], vec![]]);

        assert_eq!(ledger.tip().await.unwrap().height, 4);
        // Orphaned block is still known, but no longer canonical.
        assert_eq!(ledger.lookup_block(&old[2].hash).await.unwrap(), Some(old[2]));
        assert_eq!(ledger.block_at_height(3).await.unwrap(), Some(new[1]));
        assert_ne!(old[2].hash, new[1].hash);
    }

    #[tokio::test]
    async fn injected_read_failures_are_consumed() {
        let ledger = MemoryLedger::new();
        let b1 = ledger.append(vec![]);
        ledger.fail_next_reads(1);
        assert!(matches!(ledger.read_block(&b1).await, Err(SyncError::LedgerRead(_))));
        assert!(ledger.read_block(&b1).await.is_ok());
    }

    #[tokio::test]
    async fn subscribers_see_new_tip() {
        let ledger = MemoryLedger::new();
        let mut rx = ledger.subscribe_tip();
        let b1 = ledger.append(vec![]);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), b1);
    }
}
