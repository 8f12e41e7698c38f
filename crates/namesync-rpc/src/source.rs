//! Client-side [`EventSource`] that calls `name_sync` over any transport.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::trace;

use namesync_core::{wire, BlockHash, EventBatch, EventSource, SyncError};

use crate::server::METHOD_NAME_SYNC;
use crate::transport::{call, RpcTransport};

/// Remote extractor reached through an [`RpcTransport`].
pub struct RpcEventSource<T: ?Sized> {
    transport: Arc<T>,
    next_id: AtomicU64,
}

impl<T: RpcTransport + ?Sized> RpcEventSource<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str {
        self.transport.url()
    }
}

#[async_trait]
impl<T: RpcTransport + ?Sized> EventSource for RpcEventSource<T> {
    async fn sync(&self, start: &BlockHash, count: i64, wait: bool) -> Result<EventBatch, SyncError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        trace!(id, url = self.transport.url(), %start, count, wait, "calling name_sync");
        let result: Value = call(
            self.transport.as_ref(),
            id,
            METHOD_NAME_SYNC,
            vec![json!(start.to_hex()), json!(count), json!(wait)],
        )
        .await?;
        wire::decode_batch(&result)
    }
}
