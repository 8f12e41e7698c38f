//! Transport-level error types.

use thiserror::Error;

use namesync_core::SyncError;

use crate::request::{codes, JsonRpcError};

/// Errors that can occur during an RPC transport operation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request failed (connection refused, reset, timeout, bad status).
    #[error("HTTP error: {0}")]
    Http(String),

    /// JSON-RPC fault returned by the server.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// Request timed out after the configured duration.
    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Response could not be deserialized.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl From<TransportError> for SyncError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Rpc(fault) => fault_to_sync_error(fault),
            TransportError::Deserialization(e) => SyncError::InvalidResponse(e.to_string()),
            other => SyncError::Transport(other.to_string()),
        }
    }
}

/// Map a `name_sync` fault back to the error the server raised.
pub fn fault_to_sync_error(fault: JsonRpcError) -> SyncError {
    let kind = fault
        .data
        .as_ref()
        .and_then(|d| d.get("kind"))
        .and_then(|k| k.as_str());
    match (fault.code, kind) {
        (codes::INVALID_PARAMETER, Some("not_canonical")) => SyncError::NotOnCanonicalChain {
            hash: data_str(&fault, "hash"),
            height: fault
                .data
                .as_ref()
                .and_then(|d| d.get("height"))
                .and_then(|h| h.as_u64())
                .unwrap_or_default(),
        },
        (codes::INVALID_PARAMETER, _) => {
            let hash = data_str(&fault, "hash");
            SyncError::UnknownBlock(if hash.is_empty() { fault.message } else { hash })
        }
        (codes::CLIENT_NOT_CONNECTED, _) => SyncError::ServiceStopping,
        (codes::INTERNAL_ERROR, _) => SyncError::LedgerRead(fault.message),
        _ => SyncError::InvalidResponse(fault.to_string()),
    }
}

fn data_str(fault: &JsonRpcError, key: &str) -> String {
    fault
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn faults_map_back_to_sync_errors() {
        let unknown = JsonRpcError::new(codes::INVALID_PARAMETER, "unknown block")
            .with_data(json!({"kind": "unknown_block", "hash": "ab"}));
        assert!(matches!(fault_to_sync_error(unknown), SyncError::UnknownBlock(h) if h == "ab"));

        let orphan = JsonRpcError::new(codes::INVALID_PARAMETER, "not canonical")
            .with_data(json!({"kind": "not_canonical", "hash": "cd", "height": 12}));
        assert!(matches!(
            fault_to_sync_error(orphan),
            SyncError::NotOnCanonicalChain { height: 12, .. }
        ));

        let stopping = JsonRpcError::new(codes::CLIENT_NOT_CONNECTED, "shutting down");
        assert!(matches!(fault_to_sync_error(stopping), SyncError::ServiceStopping));

        let read = JsonRpcError::new(codes::INTERNAL_ERROR, "disk");
        assert!(fault_to_sync_error(read).is_transient());
    }

    #[test]
    fn http_errors_are_transient() {
        let err: SyncError = TransportError::Http("connection refused".into()).into();
        assert!(err.is_transient());
        let err: SyncError = TransportError::Timeout { ms: 10 }.into();
        assert!(err.is_transient());
    }
}
