//! JSON-RPC 2.0 Envelope
//!
//! Request, response and error message shapes for the line-delimited protocol.
//!
//! # Output Contract
//! - Success: `{"jsonrpc": "2.0", "id": <id>, "result": {...}}`
//! - Error: `{"jsonrpc": "2.0", "id": <id>, "error": {"code": -32000, "message": "...", "data": "..."}}`
//!
//! A response carries exactly one of `result` and `error`. A request without
//! an id (or with a null id) is answered with id `-1`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GateError;

/// Protocol version tag carried by every message
pub const JSONRPC_VERSION: &str = "2.0";

/// The single error code used for every failure class
pub const ERROR_CODE: i32 = -32000;

/// Id echoed when the request carried none
pub const MISSING_ID: i64 = -1;

/// JSON-RPC 2.0 Request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsonrpc: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,

    pub method: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    #[must_use]
    pub fn new(id: Option<Value>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self { jsonrpc: Some(JSONRPC_VERSION.to_string()), id, method: method.into(), params }
    }

    /// Id to echo in the response
    #[must_use]
    pub fn response_id(&self) -> Value {
        response_id(self.id.as_ref())
    }
}

/// JSON-RPC 2.0 Response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,

    pub id: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 Error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,

    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    #[must_use]
    pub fn success(id: Value, result: Value) -> Self {
        Self { jsonrpc: JSONRPC_VERSION.to_string(), id, result: Some(result), error: None }
    }

    #[must_use]
    pub fn error(id: Value, code: i32, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(JsonRpcError { code, message: message.into(), data }),
        }
    }

    /// Error response for a dispatch failure; the detail travels as `data`
    #[must_use]
    pub fn from_error(id: Value, err: &GateError) -> Self {
        Self::error(id, ERROR_CODE, err.message(), Some(Value::String(err.detail())))
    }

    /// Error response for a line that could not be decoded
    #[must_use]
    pub fn decode_failure(err: &impl std::fmt::Display) -> Self {
        Self::error(
            Value::from(MISSING_ID),
            ERROR_CODE,
            "Internal server error",
            Some(Value::String(format!("Failed to process request: {err}"))),
        )
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Serialize as one protocol line (no trailing newline)
    ///
    /// # Errors
    /// Only fails if a contained value cannot be represented as JSON.
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Id to echo for a request id that may be absent or null
#[must_use]
pub fn response_id(id: Option<&Value>) -> Value {
    match id {
        Some(id) if !id.is_null() => id.clone(),
        _ => Value::from(MISSING_ID),
    }
}

/// Decode one input line into a request.
///
/// # Errors
/// Returns the parser error for invalid JSON, a non-object, or a missing or
/// null `method`.
pub fn decode(line: &str) -> serde_json::Result<JsonRpcRequest> {
    serde_json::from_str(line)
}

/// Encode a success response line
///
/// # Errors
/// Only fails if `result` cannot be represented as JSON.
pub fn encode_success(id: Value, result: Value) -> serde_json::Result<String> {
    JsonRpcResponse::success(id, result).to_line()
}

/// Encode an error response line
///
/// # Errors
/// Only fails if `data` cannot be represented as JSON.
pub fn encode_error(
    id: Value,
    code: i32,
    message: impl Into<String>,
    data: Option<Value>,
) -> serde_json::Result<String> {
    JsonRpcResponse::error(id, code, message, data).to_line()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_decode_full_request() {
        let request =
            decode(r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"query"}}"#).unwrap();
        assert_eq!(request.method, "tools/call");
        assert_eq!(request.response_id(), json!(7));
        assert_eq!(request.params, Some(json!({"name": "query"})));
    }

    #[test]
    fn test_missing_and_null_id_answer_minus_one() {
        let request = decode(r#"{"method":"tools/list"}"#).unwrap();
        assert_eq!(request.response_id(), json!(-1));

        let request = decode(r#"{"id":null,"method":"tools/list"}"#).unwrap();
        assert_eq!(request.response_id(), json!(-1));
    }

    #[test]
    fn test_string_id_is_echoed_verbatim() {
        let request = decode(r#"{"id":"abc-1","method":"initialize"}"#).unwrap();
        assert_eq!(request.response_id(), json!("abc-1"));
    }

    #[test]
    fn test_decode_rejects_missing_or_null_method() {
        assert!(decode(r#"{"id":1}"#).is_err());
        assert!(decode(r#"{"id":1,"method":null}"#).is_err());
        assert!(decode("not json").is_err());
        assert!(decode("[1,2,3]").is_err());
    }

    #[test]
    fn test_success_round_trip_preserves_id_and_result() {
        let result = json!({"content": [{"type": "text", "text": "ok"}], "isError": false});
        let line = encode_success(json!(42), result.clone()).unwrap();

        let decoded: JsonRpcResponse = serde_json::from_str(&line).unwrap();
        assert_eq!(decoded.id, json!(42));
        assert_eq!(decoded.result, Some(result));
        assert!(decoded.error.is_none());
    }

    #[test]
    fn test_error_line_has_no_result() {
        let line = encode_error(json!(3), ERROR_CODE, "Method not found: x", Some(json!("Unknown method: x")))
            .unwrap();
        insta::assert_snapshot!(line, @r#"{"jsonrpc":"2.0","id":3,"error":{"code":-32000,"message":"Method not found: x","data":"Unknown method: x"}}"#);
    }

    #[test]
    fn test_decode_failure_response() {
        let err = decode("{broken").unwrap_err();
        let response = JsonRpcResponse::decode_failure(&err);

        assert_eq!(response.id, json!(-1));
        let error = response.error.unwrap();
        assert_eq!(error.code, -32000);
        assert_eq!(error.message, "Internal server error");
        let data = error.data.unwrap();
        assert!(data.as_str().unwrap().starts_with("Failed to process request: "));
    }

    #[test]
    fn test_from_error_uses_message_and_detail() {
        let response = JsonRpcResponse::from_error(json!(1), &GateError::tool_not_found("drop_all"));
        let error = response.error.unwrap();
        assert_eq!(error.message, "Unknown tool: drop_all");
        assert_eq!(error.data, Some(json!("Tool not found: drop_all")));
    }
}
