//! HTTP JSON-RPC client backed by `reqwest`.
//!
//! Sends each request once. Backoff belongs to the caller (the sync loop
//! retries with the same cursor), so this client never re-sends on its own.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::request::{JsonRpcRequest, JsonRpcResponse};
use crate::transport::RpcTransport;

/// Configuration for `HttpRpcClient`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    /// Basic-auth user (e.g. the node's `rpcuser`).
    pub user: Option<String>,
    pub password: Option<String>,
    /// Whole-request timeout in milliseconds. `None` disables it, which a
    /// long poll needs: the server holds the request until a block arrives.
    pub request_timeout_ms: Option<u64>,
    /// TCP connect timeout in milliseconds.
    pub connect_timeout_ms: Option<u64>,
}

/// HTTP JSON-RPC client.
pub struct HttpRpcClient {
    url: String,
    http: reqwest::Client,
    auth: Option<(String, Option<String>)>,
    request_timeout: Option<Duration>,
}

impl HttpRpcClient {
    /// Create a client for the given endpoint URL.
    pub fn new(url: impl Into<String>, config: HttpClientConfig) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder();
        let request_timeout = config.request_timeout_ms.map(Duration::from_millis);
        if let Some(timeout) = request_timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(ms) = config.connect_timeout_ms {
            builder = builder.connect_timeout(Duration::from_millis(ms));
        }
        let http = builder
            .build()
            .map_err(|e| TransportError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            url: url.into(),
            http,
            auth: config.user.map(|user| (user, config.password)),
            request_timeout,
        })
    }

    /// Create with default configuration (no auth, no request timeout).
    pub fn default_for(url: impl Into<String>) -> Result<Self, TransportError> {
        Self::new(url, HttpClientConfig::default())
    }

    fn map_send_error(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            let ms = self.request_timeout.map(|d| d.as_millis() as u64).unwrap_or_default();
            TransportError::Timeout { ms }
        } else {
            TransportError::Http(e.to_string())
        }
    }
}

#[async_trait]
impl RpcTransport for HttpRpcClient {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        let mut request = self.http.post(&self.url).json(&req);
        if let Some((user, password)) = &self.auth {
            request = request.basic_auth(user, password.as_ref());
        }

        let resp = request.send().await.map_err(|e| self.map_send_error(e))?;
        let status = resp.status();

        // bitcoind-style servers answer faults with HTTP 500 and a JSON body.
        let body = resp.bytes().await.map_err(|e| self.map_send_error(e))?;
        match serde_json::from_slice::<JsonRpcResponse>(&body) {
            Ok(parsed) if parsed.error.is_some() || status.is_success() => Ok(parsed),
            Err(e) if status.is_success() => Err(TransportError::Deserialization(e)),
            _ => Err(TransportError::Http(format!(
                "HTTP {}: {}",
                status.as_u16(),
                String::from_utf8_lossy(&body)
            ))),
        }
    }

    fn url(&self) -> &str {
        &self.url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use namesync_core::SyncError;

    #[test]
    fn builds_with_auth_and_timeouts() {
        let client = HttpRpcClient::new(
            "http://127.0.0.1:8336",
            HttpClientConfig {
                user: Some("rpc".into()),
                password: Some("secret".into()),
                request_timeout_ms: Some(5_000),
                connect_timeout_ms: Some(1_000),
            },
        )
        .unwrap();
        assert_eq!(client.url(), "http://127.0.0.1:8336");
        assert_eq!(client.auth.as_ref().unwrap().0, "rpc");
        assert_eq!(client.request_timeout, Some(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn connection_refused_is_transient() {
        // Port 9 (discard) is essentially never listening on loopback.
        let client = HttpRpcClient::default_for("http://127.0.0.1:9").unwrap();
        let err = client
            .send(JsonRpcRequest::new(1, "getblockcount", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Http(_)), "{err}");
        assert!(SyncError::from(err).is_transient());
    }
}
