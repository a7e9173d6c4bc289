use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client -> daemon request.
/// Wire: `{ "jsonrpc": "2.0", "id": "abc", "method": "agent.list", "params": {...} }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: impl Serialize) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.into(),
            method: method.into(),
            params: Some(serde_json::to_value(params).unwrap_or(Value::Null)),
        }
    }

    /// `token` travels as the first logical field of `params` (:
    /// JSON-RPC 2.0 has no header channel over a raw socket).
    pub fn token(&self) -> Option<&str> {
        self.params.as_ref()?.get("token")?.as_str()
    }
}

/// Daemon -> client response. Exactly one of `result`/`error` is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn ok(id: Value, result: impl Serialize) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(serde_json::to_value(result).unwrap_or(Value::Null)),
            error: None,
        }
    }

    pub fn err(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
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

    pub fn with_data(mut self, data: impl Serialize) -> Self {
        self.data = Some(serde_json::to_value(data).unwrap_or(Value::Null));
        self
    }

    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    pub const UNAUTHORIZED: i64 = -32001;
    pub const NOT_FOUND: i64 = -32002;
    pub const ALREADY_EXISTS: i64 = -32003;

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(Self::INVALID_REQUEST, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(Self::METHOD_NOT_FOUND, format!("method not found: {method}"))
    }
}

impl From<hiboss_core::ErrorKind> for JsonRpcError {
    fn from(kind: hiboss_core::ErrorKind) -> Self {
        let code = kind.wire_code();
        let message = kind.message();
        if let hiboss_core::ErrorKind::AmbiguousIdPrefix(_) = &kind {
            Self::new(code, message).with_data(serde_json::json!({ "kind": "ambiguous-id-prefix" }))
        } else {
            Self::new(code, message)
        }
    }
}

/// Disambiguation hint for `ambiguous-id-prefix` errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmbiguousCandidate {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_roundtrips_through_json() {
        let req = JsonRpcRequest::new("1", "daemon.ping", serde_json::json!({"token": "abc"}));
        let line = serde_json::to_string(&req).unwrap();
        let parsed: JsonRpcRequest = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed.method, "daemon.ping");
        assert_eq!(parsed.token(), Some("abc"));
    }

    #[test]
    fn response_carries_exactly_one_of_result_or_error() {
        let ok = JsonRpcResponse::ok(Value::String("1".into()), serde_json::json!({"pong": true}));
        assert!(ok.result.is_some() && ok.error.is_none());

        let err = JsonRpcResponse::err(Value::String("1".into()), JsonRpcError::method_not_found("bogus"));
        assert!(err.result.is_none() && err.error.is_some());
    }

    #[test]
    fn error_kind_conversion_preserves_wire_codes() {
        let e: JsonRpcError = hiboss_core::ErrorKind::NotFound("agent x".into()).into();
        assert_eq!(e.code, -32002);
    }
}
