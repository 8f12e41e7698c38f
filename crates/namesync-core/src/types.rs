//! Shared types for the sync pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::SyncError;

// ─── BlockHash ────────────────────────────────────────────────────────────────

/// A 32-byte block hash, rendered as 64 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct BlockHash([u8; 32]);

impl BlockHash {
    pub const LEN: usize = 32;

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for BlockHash {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out)
            .map_err(|e| SyncError::InvalidResponse(format!("bad block hash '{s}': {e}")))?;
        Ok(Self(out))
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({})", self.to_hex())
    }
}

impl Serialize for BlockHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for BlockHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ─── BlockRef ─────────────────────────────────────────────────────────────────

/// A handle to a block: its hash and height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRef {
    pub hash: BlockHash,
    pub height: u64,
}

impl BlockRef {
    pub fn new(hash: BlockHash, height: u64) -> Self {
        Self { hash, height }
    }
}

// ─── Name operations ──────────────────────────────────────────────────────────

/// The kind of change a name operation applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NameOpKind {
    /// Name created / claimed.
    FirstUpdate,
    /// Value changed.
    Update,
    /// Registration lapsed. Never produced by block scanning.
    Expire,
}

impl NameOpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FirstUpdate => "firstupdate",
            Self::Update => "update",
            Self::Expire => "expire",
        }
    }
}

impl fmt::Display for NameOpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded effect of one transaction output on the name registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameOperation {
    pub kind: NameOpKind,
    /// Raw name bytes (not necessarily valid UTF-8).
    pub name: Vec<u8>,
    /// Opaque value bytes. Empty for `Expire`.
    pub value: Vec<u8>,
}

impl NameOperation {
    pub fn new(kind: NameOpKind, name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            name: name.into(),
            value: value.into(),
        }
    }
}

// ─── Events ───────────────────────────────────────────────────────────────────

/// One element of an extraction response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Name(NameOperation),
    /// Checkpoint marker: everything up to and including this block was emitted.
    AtBlock(BlockRef),
}

impl SyncEvent {
    pub fn is_checkpoint(&self) -> bool {
        matches!(self, Self::AtBlock(_))
    }
}

/// The ordered result of one extraction call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventBatch {
    pub events: Vec<SyncEvent>,
}

impl EventBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_op(&mut self, op: NameOperation) {
        self.events.push(SyncEvent::Name(op));
    }

    pub fn push_checkpoint(&mut self, block: BlockRef) {
        self.events.push(SyncEvent::AtBlock(block));
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// All checkpoints, in emission order.
    pub fn checkpoints(&self) -> impl Iterator<Item = &BlockRef> {
        self.events.iter().filter_map(|e| match e {
            SyncEvent::AtBlock(b) => Some(b),
            SyncEvent::Name(_) => None,
        })
    }

    pub fn last_checkpoint(&self) -> Option<&BlockRef> {
        self.checkpoints().last()
    }

    pub fn name_operation_count(&self) -> usize {
        self.events.iter().filter(|e| !e.is_checkpoint()).count()
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
