//! Tool-execution backend for `lrm-relay`.
//!
//! `lrm-tool-server` runs as a child process of the relay and answers
//! line-delimited JSON-RPC 2.0 on stdio:
//!
//! - `initialize` returns server info and capabilities
//! - `tools/list` returns the tool schemas
//! - `tools/call {name, arguments}` runs one tool and returns an MCP-shaped
//!   result (`content` text items plus `isError`)
//! - `ping` returns `{}` and is used for health checks
//!
//! Tool failures are reported in-band with `isError: true`; only protocol
//! problems (unknown method, malformed params) become JSON-RPC errors.

pub mod rpc;
pub mod tools;

use serde_json::{json, Value};

use rpc::{text_tool_result, RpcErrorObject, RpcRequest};
use tools::{tool_definitions, ToolCall, ToolExecutor};

pub const SERVER_NAME: &str = "lrm-tool-server";

/// Dispatches one request against `executor`.
pub fn handle_request<E: ToolExecutor>(
    executor: &mut E,
    request: &RpcRequest,
) -> Result<Value, RpcErrorObject> {
    match request.method.as_str() {
        "initialize" => Ok(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": { "tools": {} },
            "serverInfo": {
                "name": SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            },
        })),
        "tools/list" => Ok(json!({ "tools": tool_definitions() })),
        "tools/call" => {
            let name = request
                .params
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| RpcErrorObject::invalid_params("tools/call requires `name`"))?;
            let arguments = request
                .params
                .get("arguments")
                .cloned()
                .unwrap_or_else(|| json!({}));

            let output = match ToolCall::parse(name, &arguments) {
                Ok(call) => {
                    tracing::debug!(tool = name, "executing tool");
                    executor.execute(call)
                }
                Err(message) => tools::ToolOutput::fail(message),
            };
            if !output.ok {
                tracing::debug!(tool = name, "tool reported an error");
            }
            Ok(text_tool_result(output.content, !output.ok))
        }
        "ping" => Ok(json!({})),
        method if method.starts_with("notifications/") => Ok(Value::Null),
        method => Err(RpcErrorObject::method_not_found(method)),
    }
}
