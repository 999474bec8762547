//! Wire types for the stdio tool-provider protocol.
//!
//! One JSON-RPC 2.0 message per line in both directions. Incoming lines are
//! classified by shape: a message with `method` is a provider-initiated
//! request (or notification if it lacks an `id`), a message with `result`
//! or `error` is a response to one of ours.

use quill_core::{ToolDefinition, ToolError};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// A tool as described by a provider in its `tools/list` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_object")]
    pub input_schema: Value,
}

fn empty_object() -> Value {
    json!({})
}

impl From<ToolSpec> for ToolDefinition {
    fn from(spec: ToolSpec) -> Self {
        ToolDefinition {
            name: spec.name,
            description: spec.description,
            parameters: spec.input_schema,
        }
    }
}

/// The result shape of a `tools/call` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallResult {
    #[serde(default)]
    pub output: String,
    #[serde(default = "default_true")]
    pub success: bool,
}

fn default_true() -> bool {
    true
}

/// An incoming message, classified by shape.
#[derive(Debug, Clone)]
pub enum Incoming {
    /// A response to one of our requests.
    Response {
        id: u64,
        result: Result<Value, RpcError>,
    },
    /// A provider-initiated request (e.g. `sampling/complete`).
    Request { id: u64, method: String, params: Value },
    /// A notification; carries no id and expects no reply.
    Notification { method: String, params: Value },
}

/// A JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

/// Parse one line of provider output.
pub fn parse_incoming(line: &str) -> Result<Incoming, ToolError> {
    let value: Value = serde_json::from_str(line)
        .map_err(|e| ToolError::Protocol(format!("unparseable message: {e}")))?;

    let id = value.get("id").and_then(Value::as_u64);

    if let Some(method) = value.get("method").and_then(Value::as_str) {
        let params = value.get("params").cloned().unwrap_or(Value::Null);
        return Ok(match id {
            Some(id) => Incoming::Request {
                id,
                method: method.to_string(),
                params,
            },
            None => Incoming::Notification {
                method: method.to_string(),
                params,
            },
        });
    }

    let id = id.ok_or_else(|| ToolError::Protocol("response without id".into()))?;

    if let Some(error) = value.get("error") {
        let rpc_error: RpcError = serde_json::from_value(error.clone())
            .unwrap_or_else(|_| RpcError {
                code: -32603,
                message: error.to_string(),
            });
        return Ok(Incoming::Response {
            id,
            result: Err(rpc_error),
        });
    }

    match value.get("result") {
        Some(result) => Ok(Incoming::Response {
            id,
            result: Ok(result.clone()),
        }),
        None => Err(ToolError::Protocol(
            "message has neither method, result nor error".into(),
        )),
    }
}

/// Serialize an outgoing request line.
pub fn request_line(id: u64, method: &str, params: Value) -> String {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    })
    .to_string()
}

/// Serialize an outgoing success-response line (replying to a
/// provider-initiated request).
pub fn response_line(id: u64, result: Value) -> String {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    })
    .to_string()
}

/// Serialize an outgoing error-response line.
pub fn error_line(id: u64, code: i64, message: &str) -> String {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message },
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_response_with_result() {
        let line = r#"{"jsonrpc":"2.0","id":7,"result":{"tools":[]}}"#;
        match parse_incoming(line).unwrap() {
            Incoming::Response { id, result } => {
                assert_eq!(id, 7);
                assert!(result.unwrap().get("tools").is_some());
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn parse_response_with_error() {
        let line = r#"{"jsonrpc":"2.0","id":3,"error":{"code":-32601,"message":"no such method"}}"#;
        match parse_incoming(line).unwrap() {
            Incoming::Response { id, result } => {
                assert_eq!(id, 3);
                let err = result.unwrap_err();
                assert_eq!(err.code, -32601);
                assert!(err.message.contains("no such method"));
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn parse_provider_request() {
        let line = r#"{"jsonrpc":"2.0","id":1,"method":"sampling/complete","params":{"prompt":"hi"}}"#;
        match parse_incoming(line).unwrap() {
            Incoming::Request { id, method, params } => {
                assert_eq!(id, 1);
                assert_eq!(method, "sampling/complete");
                assert_eq!(params["prompt"], "hi");
            }
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn parse_notification() {
        let line = r#"{"jsonrpc":"2.0","method":"log","params":{"level":"info"}}"#;
        match parse_incoming(line).unwrap() {
            Incoming::Notification { method, .. } => assert_eq!(method, "log"),
            other => panic!("expected notification, got {other:?}"),
        }
    }

    #[test]
    fn parse_garbage_is_protocol_error() {
        assert!(parse_incoming("not json").is_err());
        assert!(parse_incoming(r#"{"jsonrpc":"2.0"}"#).is_err());
    }

    #[test]
    fn request_line_shape() {
        let line = request_line(5, "tools/call", json!({"name": "echo"}));
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["id"], 5);
        assert_eq!(value["method"], "tools/call");
        assert_eq!(value["params"]["name"], "echo");
        assert!(!line.contains('\n'));
    }

    #[test]
    fn tool_spec_into_definition() {
        let spec: ToolSpec = serde_json::from_str(
            r#"{"name":"add","description":"Add numbers","input_schema":{"type":"object"}}"#,
        )
        .unwrap();
        let def: ToolDefinition = spec.into();
        assert_eq!(def.name, "add");
        assert_eq!(def.parameters["type"], "object");
    }

    #[test]
    fn call_result_defaults() {
        let result: CallResult = serde_json::from_str(r#"{"output":"4"}"#).unwrap();
        assert!(result.success);
        assert_eq!(result.output, "4");
    }
}
