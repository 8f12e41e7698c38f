//! namesync-rpc — the RPC boundary between extractor and sync client.
//!
//! - [`request`] — JSON-RPC 2.0 wire types and fault codes
//! - [`RpcTransport`] — async transport trait, with [`HttpRpcClient`] over reqwest
//! - [`retry`] — bounded exponential backoff
//! - [`server`] — `name_sync` dispatcher and axum router
//! - [`RpcEventSource`] — client-side `EventSource` over any transport
//! - [`NodeLedger`] — `Ledger` backed by a Namecoin node's JSON-RPC

pub mod error;
pub mod http;
pub mod node;
pub mod request;
pub mod retry;
pub mod server;
pub mod source;
pub mod transport;

pub use error::TransportError;
pub use http::{HttpClientConfig, HttpRpcClient};
pub use node::{NodeLedger, NodeLedgerConfig};
pub use request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcId};
pub use retry::{RetryConfig, RetryPolicy};
pub use server::{router, serve, SyncRpcHandler};
pub use source::RpcEventSource;
pub use transport::RpcTransport;
