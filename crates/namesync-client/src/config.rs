//! Sync client configuration and its fluent builder.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use namesync_client::SyncConfigBuilder;
//!
//! let config = SyncConfigBuilder::new()
//!     .sync_id("dns-mirror")
//!     .batch_size(500)
//!     .call_deadline(Duration::from_secs(300))
//!     .build_config();
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use namesync_core::{BlockHash, BlockRef};
use namesync_rpc::RetryConfig;

/// Configuration for a [`SyncLoop`](crate::SyncLoop).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Key under which the cursor is stored.
    pub sync_id: String,
    /// Block to start after when no cursor is stored yet.
    pub start_block: BlockHash,
    pub start_height: u64,
    /// `count` sent with every sync call (soft cap on operations per batch).
    pub batch_size: i64,
    /// Long-poll at the tip.
    pub wait: bool,
    pub retry: RetryConfig,
    /// Abandon and re-issue a call that has not answered within this time.
    pub call_deadline: Option<Duration>,
    /// Pause after an empty batch. Only matters when `wait` is off.
    pub idle_delay: Duration,
}

impl SyncConfig {
    pub fn start(&self) -> BlockRef {
        BlockRef::new(self.start_block, self.start_height)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_id: "default".into(),
            start_block: BlockHash::default(),
            start_height: 0,
            batch_size: 1000,
            wait: true,
            retry: RetryConfig::default(),
            call_deadline: None,
            idle_delay: Duration::from_secs(1),
        }
    }
}

/// Fluent builder for [`SyncConfig`].
#[derive(Default)]
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SyncConfig::default(),
        }
    }

    /// Set the cursor key.
    pub fn sync_id(mut self, id: impl Into<String>) -> Self {
        self.config.sync_id = id.into();
        self
    }

    /// Set the first-run start block.
    pub fn start_block(mut self, block: BlockRef) -> Self {
        self.config.start_block = block.hash;
        self.config.start_height = block.height;
        self
    }

    pub fn batch_size(mut self, count: i64) -> Self {
        self.config.batch_size = count;
        self
    }

    pub fn wait(mut self, wait: bool) -> Self {
        self.config.wait = wait;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn call_deadline(mut self, deadline: Duration) -> Self {
        self.config.call_deadline = Some(deadline);
        self
    }

    pub fn idle_delay(mut self, delay: Duration) -> Self {
        self.config.idle_delay = delay;
        self
    }

    pub fn build_config(self) -> SyncConfig {
        self.config
    }
}
