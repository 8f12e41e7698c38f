//! `name_sync` JSON-RPC server.
//!
//! Request params are positional `[blockHash, count, wait?]` or named
//! `{"blockHash": .., "count": .., "wait": ..}`. The response `result` is the
//! event tuple array produced by [`namesync_core::wire`].
//!
//! A long-polling request occupies only its own handler task; dropping the
//! connection drops the pending future with no side effects.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use namesync_core::{wire, BlockHash, EventSource, SyncError};

use crate::error::TransportError;
use crate::request::{codes, JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcId};
use crate::transport::RpcTransport;

pub const METHOD_NAME_SYNC: &str = "name_sync";

/// Parsed `name_sync` parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncParams {
    pub block_hash: BlockHash,
    pub count: i64,
    pub wait: bool,
}

/// Dispatches JSON-RPC requests to an [`EventSource`].
pub struct SyncRpcHandler<S: ?Sized> {
    source: Arc<S>,
}

impl<S: EventSource + ?Sized> SyncRpcHandler<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self { source }
    }

    /// Handle one decoded request.
    pub async fn handle(&self, req: JsonRpcRequest) -> JsonRpcResponse {
        let id = req.id.clone();
        if req.method != METHOD_NAME_SYNC {
            return JsonRpcResponse::failure(
                id,
                JsonRpcError::new(codes::METHOD_NOT_FOUND, format!("method not found: {}", req.method)),
            );
        }

        let params = match parse_params(&req.params) {
            Ok(p) => p,
            Err(fault) => return JsonRpcResponse::failure(id, fault),
        };
        debug!(
            start = %params.block_hash,
            count = params.count,
            wait = params.wait,
            "name_sync request"
        );

        match self
            .source
            .sync(&params.block_hash, params.count, params.wait)
            .await
        {
            Ok(batch) => JsonRpcResponse::success(id, wire::encode_batch(&batch)),
            Err(err) => {
                warn!(start = %params.block_hash, error = %err, "name_sync failed");
                JsonRpcResponse::failure(id, sync_error_to_fault(&err))
            }
        }
    }

    /// Handle a raw request body, answering parse failures with a fault.
    pub async fn handle_bytes(&self, body: &[u8]) -> JsonRpcResponse {
        let value: Value = match serde_json::from_slice(body) {
            Ok(value) => value,
            Err(e) => {
                return JsonRpcResponse::failure(
                    RpcId::Null,
                    JsonRpcError::new(codes::PARSE_ERROR, format!("parse error: {e}")),
                )
            }
        };
        // Well-formed JSON that is not a request object: echo the id if there is one.
        let id = value
            .get("id")
            .and_then(|id| serde_json::from_value::<RpcId>(id.clone()).ok())
            .unwrap_or_default();
        match serde_json::from_value::<JsonRpcRequest>(value) {
            Ok(req) => self.handle(req).await,
            Err(e) => JsonRpcResponse::failure(
                id,
                JsonRpcError::new(codes::INVALID_REQUEST, format!("invalid request: {e}")),
            ),
        }
    }
}

/// Map an extraction error to the fault sent over the wire.
pub fn sync_error_to_fault(err: &SyncError) -> JsonRpcError {
    match err {
        SyncError::UnknownBlock(hash) => JsonRpcError::new(codes::INVALID_PARAMETER, err.to_string())
            .with_data(json!({"kind": "unknown_block", "hash": hash})),
        SyncError::NotOnCanonicalChain { hash, height } => {
            JsonRpcError::new(codes::INVALID_PARAMETER, err.to_string())
                .with_data(json!({"kind": "not_canonical", "hash": hash, "height": height}))
        }
        SyncError::ServiceStopping => JsonRpcError::new(codes::CLIENT_NOT_CONNECTED, err.to_string()),
        _ => JsonRpcError::new(codes::INTERNAL_ERROR, err.to_string()),
    }
}

/// Parse positional or named `name_sync` params.
pub fn parse_params(params: &Value) -> Result<SyncParams, JsonRpcError> {
    let (hash, count, wait) = match params {
        Value::Array(items) => (items.first(), items.get(1), items.get(2)),
        Value::Object(map) => (map.get("blockHash"), map.get("count"), map.get("wait")),
        _ => return Err(JsonRpcError::new(codes::INVALID_PARAMS, "params must be an array or object")),
    };

    let hash = hash
        .and_then(Value::as_str)
        .ok_or_else(|| JsonRpcError::new(codes::INVALID_PARAMS, "blockHash must be a string"))?;
    let block_hash: BlockHash = hash.parse().map_err(|_| {
        JsonRpcError::new(codes::INVALID_PARAMETER, format!("invalid block hash '{hash}'"))
            .with_data(json!({"kind": "unknown_block", "hash": hash}))
    })?;
    let count = count
        .and_then(Value::as_i64)
        .ok_or_else(|| JsonRpcError::new(codes::INVALID_PARAMS, "count must be an integer"))?;
    let wait = match wait {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(_) => return Err(JsonRpcError::new(codes::INVALID_PARAMS, "wait must be a boolean")),
    };

    Ok(SyncParams {
        block_hash,
        count,
        wait,
    })
}

/// The handler doubles as an in-process transport.
#[async_trait]
impl<S: EventSource + ?Sized + 'static> RpcTransport for SyncRpcHandler<S> {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        Ok(self.handle(req).await)
    }

    fn url(&self) -> &str {
        "local"
    }
}

// ─── HTTP ─────────────────────────────────────────────────────────────────────

async fn rpc_endpoint<S: EventSource + ?Sized + 'static>(
    State(handler): State<Arc<SyncRpcHandler<S>>>,
    body: Bytes,
) -> Json<JsonRpcResponse> {
    Json(handler.handle_bytes(&body).await)
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

/// Build the router: `POST /` for JSON-RPC, `GET /health` for liveness.
pub fn router<S: EventSource + ?Sized + 'static>(handler: Arc<SyncRpcHandler<S>>) -> Router {
    Router::new()
        .route("/", post(rpc_endpoint::<S>))
        .route("/health", get(health))
        .with_state(handler)
        .layer(TraceLayer::new_for_http())
}

/// Serve until `shutdown` is cancelled.
pub async fn serve<S: EventSource + ?Sized + 'static>(
    addr: SocketAddr,
    handler: Arc<SyncRpcHandler<S>>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "name_sync server listening");
    axum::serve(listener, router(handler))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("name_sync server stopped");
    Ok(())
}
