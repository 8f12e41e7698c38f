//! The `RpcTransport` trait — how a client reaches a JSON-RPC endpoint.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::TransportError;
use crate::request::{JsonRpcRequest, JsonRpcResponse};

/// An async JSON-RPC transport. Object-safe; store as `Arc<dyn RpcTransport>`.
#[async_trait]
pub trait RpcTransport: Send + Sync + 'static {
    /// Send a single request and return the raw response.
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError>;

    /// The transport's identifier (URL or name).
    fn url(&self) -> &str;
}

/// Call `method` with positional `params` and deserialize the result.
pub async fn call<T, R>(
    transport: &T,
    id: u64,
    method: &str,
    params: Vec<Value>,
) -> Result<R, TransportError>
where
    T: RpcTransport + ?Sized,
    R: DeserializeOwned,
{
    let req = JsonRpcRequest::new(id, method, params);
    let resp = transport.send(req).await?;
    let result = resp.into_result().map_err(TransportError::Rpc)?;
    serde_json::from_value(result).map_err(TransportError::Deserialization)
}
