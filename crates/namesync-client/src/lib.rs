//! namesync-client — keeps a downstream name store in step with the
//! registry.
//!
//! ```text
//! loop {
//!     batch = source.sync(cursor, batch_size, wait)
//!     for each block in batch: apply its ops, then persist its checkpoint
//! }
//! ```
//!
//! The cursor only moves at checkpoints, so a crash anywhere resumes from
//! the last committed block and re-applies at most one block's operations.

pub mod config;
pub mod sync_loop;

pub use config::{SyncConfig, SyncConfigBuilder};
pub use sync_loop::{StatusHook, SyncExit, SyncLoop, SyncProgress};
