//! JSON-RPC 2.0 wire types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fault codes used on the `name_sync` boundary (bitcoind numbering).
pub mod codes {
    /// Unknown, malformed or non-canonical block.
    pub const INVALID_PARAMETER: i64 = -8;
    /// The service is shutting down; reconnect later.
    pub const CLIENT_NOT_CONNECTED: i64 = -9;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    /// Ledger read failure.
    pub const INTERNAL_ERROR: i64 = -32603;
    pub const PARSE_ERROR: i64 = -32700;
}

/// JSON-RPC request ID (string, number or null).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Number(u64),
    String(String),
    Null,
}

impl Default for RpcId {
    fn default() -> Self {
        Self::Null
    }
}

impl std::fmt::Display for RpcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Null => write!(f, "null"),
        }
    }
}

/// A JSON-RPC 2.0 request. `params` is either positional (array) or named (object).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: RpcId,
}

fn default_version() -> String {
    "2.0".into()
}

impl JsonRpcRequest {
    /// Create a request with positional parameters.
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: default_version(),
            method: method.into(),
            params: Value::Array(params),
            id: RpcId::Number(id),
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: RpcId,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: RpcId, result: Value) -> Self {
        Self {
            jsonrpc: default_version(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: RpcId, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: default_version(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Unwrap the result value or return the error.
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_serialization() {
        let req = JsonRpcRequest::new(1, "name_sync", vec![json!("00"), json!(10)]);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"name_sync\""));
        assert!(json.contains("\"params\":[\"00\",10]"));
    }

    #[test]
    fn legacy_request_without_version_parses() {
        let req: JsonRpcRequest =
            serde_json::from_str(r#"{"method":"name_sync","params":{"blockHash":"00","count":5},"id":"a"}"#)
                .unwrap();
        assert_eq!(req.jsonrpc, "2.0");
        assert_eq!(req.id, RpcId::String("a".into()));
        assert!(req.params.is_object());
    }

    #[test]
    fn bitcoind_style_response_with_null_error() {
        let resp: JsonRpcResponse =
            serde_json::from_str(r#"{"result":[],"error":null,"id":1}"#).unwrap();
        assert_eq!(resp.into_result().unwrap(), json!([]));
    }

    #[test]
    fn response_into_result_error() {
        let resp = JsonRpcResponse::failure(
            RpcId::Number(1),
            JsonRpcError::new(codes::INVALID_PARAMETER, "unknown block"),
        );
        let err = resp.into_result().unwrap_err();
        assert_eq!(err.code, -8);
    }
}
