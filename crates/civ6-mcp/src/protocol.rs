//! JSON-RPC 2.0 framing for MCP
//!
//! One JSON object per line. Requests without an `id` are notifications and
//! never get a response.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Version string every message must carry.
pub const JSONRPC_VERSION: &str = "2.0";

/// An incoming JSON-RPC 2.0 request or notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Must be "2.0"
    pub jsonrpc: String,
    /// Method name, e.g. `tools/call`
    pub method: String,
    /// Method parameters (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Absent for notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
}

impl Request {
    /// Notifications get no response, even when they carry an id.
    pub fn is_notification(&self) -> bool {
        self.id.is_none() || self.method.starts_with("notifications/")
    }
}

/// JSON-RPC request ID
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric ID
    Number(i64),
    /// String ID
    String(String),
    /// Used when replying to a message whose id could not be read
    Null,
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

/// A JSON-RPC 2.0 response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Always "2.0"
    pub jsonrpc: String,
    /// Result (present on success)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error (present on failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
    /// ID of the request being answered
    pub id: RequestId,
}

impl Response {
    /// Create a successful response
    pub fn success(id: RequestId, result: Value) -> Self {
        Response {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Create an error response from an [`RpcError`]
    pub fn from_error(id: RequestId, err: RpcError) -> Self {
        Response {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(err.into()),
            id,
        }
    }
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorObject {
    /// Error code
    pub code: i32,
    /// Human-readable message
    pub message: String,
}

impl From<RpcError> for ErrorObject {
    fn from(err: RpcError) -> Self {
        ErrorObject {
            code: err.code(),
            message: err.message(),
        }
    }
}

/// Standard JSON-RPC error codes used by the server.
#[derive(Debug, Clone)]
pub enum RpcError {
    /// -32700: the line was not valid JSON
    ParseError(String),
    /// -32600: valid JSON but not a request
    InvalidRequest(String),
    /// -32601
    MethodNotFound(String),
    /// -32602: includes unknown tool names
    InvalidParams(String),
    /// -32603
    InternalError(String),
}

impl RpcError {
    /// Numeric JSON-RPC error code
    pub fn code(&self) -> i32 {
        match self {
            RpcError::ParseError(_) => -32700,
            RpcError::InvalidRequest(_) => -32600,
            RpcError::MethodNotFound(_) => -32601,
            RpcError::InvalidParams(_) => -32602,
            RpcError::InternalError(_) => -32603,
        }
    }

    /// Error message, prefixed with the standard phrase for the code
    pub fn message(&self) -> String {
        match self {
            RpcError::ParseError(msg) => format!("Parse error: {}", msg),
            RpcError::InvalidRequest(msg) => format!("Invalid Request: {}", msg),
            RpcError::MethodNotFound(method) => format!("Method not found: {}", method),
            RpcError::InvalidParams(msg) => format!("Invalid params: {}", msg),
            RpcError::InternalError(msg) => format!("Internal error: {}", msg),
        }
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for RpcError {}

/// Parse one line into a request. Bad JSON is a parse error; a wrong
/// `jsonrpc` version is an invalid request.
pub fn parse_request_str(text: &str) -> Result<Request, RpcError> {
    let request: Request =
        serde_json::from_str(text).map_err(|e| RpcError::ParseError(e.to_string()))?;
    if request.jsonrpc != JSONRPC_VERSION {
        return Err(RpcError::InvalidRequest(format!(
            "expected jsonrpc '{}', got '{}'",
            JSONRPC_VERSION, request.jsonrpc
        )));
    }
    Ok(request)
}

/// Serialize a response to a single line (no trailing newline).
pub fn serialize_response_string(response: &Response) -> Result<String, RpcError> {
    serde_json::to_string(response).map_err(|e| RpcError::InternalError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request_and_notification() {
        let req = parse_request_str(r#"{"jsonrpc":"2.0","method":"tools/list","id":1}"#).unwrap();
        assert_eq!(req.id, Some(RequestId::Number(1)));
        assert!(!req.is_notification());

        let note = parse_request_str(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).unwrap();
        assert!(note.id.is_none());
        assert!(note.is_notification());
    }

    #[test]
    fn test_bad_version_and_bad_json() {
        let err = parse_request_str(r#"{"jsonrpc":"1.0","method":"x","id":"a"}"#).unwrap_err();
        assert_eq!(err.code(), -32600);
        assert_eq!(parse_request_str("{not json").unwrap_err().code(), -32700);
    }

    #[test]
    fn test_error_response_shape() {
        let resp = Response::from_error(RequestId::from("abc"), RpcError::MethodNotFound("nope".into()));
        let json = serialize_response_string(&resp).unwrap();
        assert!(json.contains("-32601"));
        assert!(json.contains("\"id\":\"abc\""));
        assert!(!json.contains("\"result\""));
    }
}
