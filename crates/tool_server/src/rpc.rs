//! Line-delimited JSON-RPC 2.0 framing shared by the tool server and its clients.
//!
//! Each message is one JSON object terminated by `\n`. Tool results use the
//! MCP content shape: `{"content": [{"type": "text", "text": ...}], "isError": bool}`.

use std::io::{BufRead, Write};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// Inbound request or notification. Notifications carry no `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl RpcRequest {
    #[must_use]
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(Value::from(id)),
            method: method.into(),
            params,
        }
    }

    #[must_use]
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
}

impl RpcErrorObject {
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    #[must_use]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
}

impl RpcResponse {
    #[must_use]
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    #[must_use]
    pub fn failure(id: Value, error: RpcErrorObject) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Converts to the `result` value, or the error object.
    pub fn into_result(self) -> Result<Value, RpcErrorObject> {
        match (self.result, self.error) {
            (_, Some(error)) => Err(error),
            (Some(result), None) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }
}

fn default_version() -> String {
    JSONRPC_VERSION.to_string()
}

/// Builds an MCP-shaped tool result carrying one text item.
#[must_use]
pub fn text_tool_result(text: impl Into<String>, is_error: bool) -> Value {
    json!({
        "content": [{ "type": "text", "text": text.into() }],
        "isError": is_error,
    })
}

/// Parses one inbound line. Returns a ready-made error response when the line
/// is not a valid request.
pub fn parse_request_line(line: &str) -> Result<RpcRequest, RpcResponse> {
    let value: Value = serde_json::from_str(line).map_err(|error| {
        RpcResponse::failure(
            Value::Null,
            RpcErrorObject::new(PARSE_ERROR, format!("Parse error: {error}")),
        )
    })?;
    let id = value.get("id").cloned().unwrap_or(Value::Null);
    serde_json::from_value(value).map_err(|error| {
        RpcResponse::failure(
            id,
            RpcErrorObject::new(INVALID_REQUEST, format!("Invalid request: {error}")),
        )
    })
}

/// Serves requests from `reader` until EOF, writing one response line per
/// request. Notifications are handled but never answered.
pub fn serve_lines<R, W, F>(reader: R, mut writer: W, mut handle: F) -> std::io::Result<()>
where
    R: BufRead,
    W: Write,
    F: FnMut(&RpcRequest) -> Result<Value, RpcErrorObject>,
{
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let response = match parse_request_line(&line) {
            Ok(request) => {
                let outcome = handle(&request);
                let Some(id) = request.id else {
                    continue;
                };
                match outcome {
                    Ok(result) => RpcResponse::success(id, result),
                    Err(error) => RpcResponse::failure(id, error),
                }
            }
            Err(response) => response,
        };

        let encoded = serde_json::to_string(&response).map_err(std::io::Error::other)?;
        writeln!(writer, "{encoded}")?;
        writer.flush()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn serve(input: &str) -> Vec<Value> {
        let mut output = Vec::new();
        serve_lines(input.as_bytes(), &mut output, |request| {
            match request.method.as_str() {
                "echo" => Ok(request.params.clone()),
                other => Err(RpcErrorObject::method_not_found(other)),
            }
        })
        .expect("serve should finish at EOF");

        String::from_utf8(output)
            .expect("utf-8 output")
            .lines()
            .map(|line| serde_json::from_str(line).expect("json line"))
            .collect()
    }

    #[test]
    fn answers_requests_and_skips_notifications() {
        let responses = serve(concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"echo","params":{"a":1}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n\n",
            r#"{"jsonrpc":"2.0","id":"x","method":"missing"}"#,
            "\n",
        ));

        assert_eq!(
            responses,
            vec![
                json!({"jsonrpc": "2.0", "id": 1, "result": {"a": 1}}),
                json!({
                    "jsonrpc": "2.0",
                    "id": "x",
                    "error": {"code": METHOD_NOT_FOUND, "message": "Method not found: missing"},
                }),
            ]
        );
    }

    #[test]
    fn malformed_line_yields_parse_error() {
        let responses = serve("{nope\n");
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["error"]["code"], PARSE_ERROR);
        assert_eq!(responses[0]["id"], Value::Null);
    }

    #[test]
    fn request_without_method_is_invalid() {
        let responses = serve("{\"jsonrpc\":\"2.0\",\"id\":7}\n");
        assert_eq!(responses[0]["error"]["code"], INVALID_REQUEST);
        assert_eq!(responses[0]["id"], 7);
    }

    #[test]
    fn response_into_result_prefers_error() {
        let response = RpcResponse::failure(json!(1), RpcErrorObject::invalid_params("bad"));
        assert_eq!(
            response.into_result(),
            Err(RpcErrorObject::new(INVALID_PARAMS, "bad"))
        );
        assert_eq!(
            RpcResponse::success(json!(2), json!({})).into_result(),
            Ok(json!({}))
        );
    }
}
