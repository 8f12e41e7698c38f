//! Error types for the sync pipeline.

use thiserror::Error;

/// Errors that can occur during extraction or synchronization.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("unknown block {0}")]
    UnknownBlock(String),

    #[error("block {hash} at height {height} is not on the canonical chain")]
    NotOnCanonicalChain { hash: String, height: u64 },

    #[error("ledger read error: {0}")]
    LedgerRead(String),

    #[error("service is stopping")]
    ServiceStopping,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("inconsistent batch: {0}")]
    InconsistentBatch(String),

    #[error("giving up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

impl SyncError {
    /// Returns `true` if the same call, retried later from the same cursor,
    /// may succeed. Everything else halts the client loop.
    ///
    /// Downstream store failures and malformed responses count as transient:
    /// the cursor has not moved, so a retry replays the same batch.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::LedgerRead(_) | Self::Transport(_) | Self::Store(_) | Self::InvalidResponse(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(SyncError::LedgerRead("io".into()).is_transient());
        assert!(SyncError::Transport("refused".into()).is_transient());
        assert!(SyncError::Store("locked".into()).is_transient());
        assert!(SyncError::InvalidResponse("[]".into()).is_transient());
        assert!(!SyncError::ServiceStopping.is_transient());
        assert!(!SyncError::UnknownBlock("00".into()).is_transient());
        assert!(!SyncError::NotOnCanonicalChain { hash: "00".into(), height: 3 }.is_transient());
        assert!(!SyncError::InconsistentBatch("gap".into()).is_transient());
        assert!(!SyncError::RetriesExhausted { attempts: 3, last: "io".into() }.is_transient());
    }
}
