//! namesync-core — foundation for name-registry change-data-capture.
//!
//! # Architecture
//!
//! ```text
//! Ledger ──► EventExtractor::sync(start, count, wait) ──► EventBatch
//!                                                            │
//!            SyncLoop (namesync-client) ◄── EventSource ◄────┘
//!                 ├── NameStore    (idempotent upsert per name)
//!                 └── CursorStore  (last fully synchronized block)
//! ```

pub mod cursor;
pub mod error;
pub mod extractor;
pub mod ledger;
pub mod script;
pub mod store;
pub mod types;
pub mod wire;

pub use cursor::{Cursor, CursorManager, CursorStore};
pub use error::SyncError;
pub use extractor::{EventExtractor, EventSource};
pub use ledger::{Block, Ledger, MemoryLedger, Transaction, TxOutput};
pub use store::{MemoryStore, NameRecord, NameStore, SyncTarget};
pub use types::{BlockHash, BlockRef, EventBatch, NameOpKind, NameOperation, SyncEvent};
