//! Caller-facing JSON-RPC server on stdio.
//!
//! Exposes `reason`, `reset_conversation`, and direct pass-through of each
//! dispatcher tool. Requests are handled concurrently; responses are written
//! as they complete, one JSON object per line.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tool_server::rpc::{
    parse_request_line, text_tool_result, RpcErrorObject, RpcRequest, RpcResponse,
};

use crate::controller::{LoopController, ReasonRequest};
use crate::diff::DiffRequest;
use crate::dispatch::ToolName;
use crate::normalize::ToolResult;

pub const SERVER_NAME: &str = "lrm-relay";
pub const REASON_TOOL: &str = "reason";
pub const RESET_TOOL: &str = "reset_conversation";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReasonArgs {
    prompt: String,
    #[serde(default)]
    files: Vec<String>,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    diff_from: Option<String>,
    #[serde(default)]
    diff_to: Option<String>,
    #[serde(default)]
    diff_unstaged: Option<bool>,
}

impl ReasonArgs {
    fn into_request(self) -> Result<ReasonRequest, String> {
        let diff = match self.diff_from.filter(|from| !from.trim().is_empty()) {
            Some(from) => Some(DiffRequest {
                from,
                to: self.diff_to.filter(|to| !to.trim().is_empty()),
                unstaged: self.diff_unstaged,
            }),
            None if self.diff_to.is_some() || self.diff_unstaged.is_some() => {
                return Err("diff_to and diff_unstaged require diff_from".to_string());
            }
            None => None,
        };

        Ok(ReasonRequest {
            prompt: self.prompt,
            files: self.files,
            conversation_id: self.conversation_id,
            diff,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ResetArgs {
    conversation_id: String,
}

pub struct RelayServer {
    controller: Arc<LoopController>,
}

impl RelayServer {
    #[must_use]
    pub fn new(controller: Arc<LoopController>) -> Self {
        Self { controller }
    }

    #[must_use]
    pub fn controller(&self) -> &Arc<LoopController> {
        &self.controller
    }

    /// Handles one request and returns its `result` value.
    pub async fn handle(&self, request: &RpcRequest) -> Result<Value, RpcErrorObject> {
        match request.method.as_str() {
            "initialize" => Ok(json!({
                "protocolVersion": "2024-11-05",
                "capabilities": { "tools": {} },
                "serverInfo": { "name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION") },
            })),
            "tools/list" => Ok(json!({ "tools": caller_tools() })),
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
                Ok(self.call_tool(name, arguments).await)
            }
            "ping" => Ok(json!({})),
            method if method.starts_with("notifications/") => Ok(Value::Null),
            method => Err(RpcErrorObject::method_not_found(method)),
        }
    }

    /// Runs one caller tool and returns an MCP-shaped result.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Value {
        match name {
            REASON_TOOL => self.call_reason(arguments).await,
            RESET_TOOL => self.call_reset(arguments),
            _ => {
                let result = self.controller.dispatcher().dispatch(name, &arguments).await;
                tool_result_value(&result)
            }
        }
    }

    async fn call_reason(&self, arguments: Value) -> Value {
        let request = match serde_json::from_value::<ReasonArgs>(arguments)
            .map_err(|error| format!("invalid reason arguments: {error}"))
            .and_then(ReasonArgs::into_request)
        {
            Ok(request) => request,
            Err(message) => return text_tool_result(message, true),
        };

        match self.controller.reason(request).await {
            Ok(outcome) => text_tool_result(
                format!(
                    "{}\n\nConversation ID: {}",
                    outcome.text, outcome.conversation_id
                ),
                false,
            ),
            Err(error) => {
                tracing::warn!(%error, "reason failed");
                text_tool_result(format!("Error: {error}"), true)
            }
        }
    }

    fn call_reset(&self, arguments: Value) -> Value {
        let args = match serde_json::from_value::<ResetArgs>(arguments) {
            Ok(args) => args,
            Err(error) => {
                return text_tool_result(
                    format!("invalid reset_conversation arguments: {error}"),
                    true,
                );
            }
        };

        match self.controller.reset_conversation(&args.conversation_id) {
            Ok(()) => text_tool_result(
                format!("Conversation {} has been reset.", args.conversation_id),
                false,
            ),
            Err(error) => text_tool_result(format!("Error: {error}"), true),
        }
    }

    /// Serves line-delimited requests until `reader` reaches EOF, then waits
    /// for in-flight requests before returning.
    pub async fn serve<R, W>(self: Arc<Self>, reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (sender, mut receiver) = mpsc::unbounded_channel::<RpcResponse>();
        let writer_task = tokio::spawn(async move {
            while let Some(response) = receiver.recv().await {
                let mut line = serde_json::to_string(&response).map_err(std::io::Error::other)?;
                line.push('\n');
                writer.write_all(line.as_bytes()).await?;
                writer.flush().await?;
            }
            Ok::<(), std::io::Error>(())
        });

        let mut in_flight = JoinSet::new();
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let request = match parse_request_line(&line) {
                Ok(request) => request,
                Err(response) => {
                    let _ = sender.send(response);
                    continue;
                }
            };

            let server = Arc::clone(&self);
            let sender = sender.clone();
            in_flight.spawn(async move {
                let outcome = server.handle(&request).await;
                let Some(id) = request.id else {
                    return;
                };
                let response = match outcome {
                    Ok(result) => RpcResponse::success(id, result),
                    Err(error) => RpcResponse::failure(id, error),
                };
                let _ = sender.send(response);
            });

            while let Some(joined) = in_flight.try_join_next() {
                if let Err(error) = joined {
                    tracing::error!(%error, "request handler panicked");
                }
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            if let Err(error) = joined {
                tracing::error!(%error, "request handler panicked");
            }
        }
        drop(sender);

        writer_task.await.map_err(std::io::Error::other)?
    }
}

fn tool_result_value(result: &ToolResult) -> Value {
    let content: Vec<Value> = result
        .segments
        .iter()
        .map(|segment| json!({ "type": "text", "text": segment }))
        .collect();
    json!({ "content": content, "isError": result.is_error })
}

/// Tool schemas exposed to the calling agent.
#[must_use]
pub fn caller_tools() -> Vec<Value> {
    let mut tools = vec![
        json!({
            "name": REASON_TOOL,
            "description": "Delegate a task to the reasoning model. It may read, search, edit, and (with confirmation) write files or run commands before answering. Prior exchanges in the same conversation are replayed as context.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "prompt": { "type": "string", "description": "The task or question" },
                    "files": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Absolute paths of files to attach",
                    },
                    "conversation_id": { "type": "string", "description": "Conversation to continue; defaults to this session's conversation" },
                    "diff_from": { "type": "string", "description": "Git ref to diff from" },
                    "diff_to": { "type": "string", "description": "Git ref to diff to" },
                    "diff_unstaged": { "type": "boolean", "description": "Diff against the working tree when diff_to is absent (default true)" },
                },
                "required": ["prompt"],
            },
        }),
        json!({
            "name": RESET_TOOL,
            "description": "Forget a conversation and delete its stored history.",
            "inputSchema": {
                "type": "object",
                "properties": { "conversation_id": { "type": "string" } },
                "required": ["conversation_id"],
            },
        }),
    ];
    tools.extend(ToolName::ALL.into_iter().map(|tool| {
        json!({
            "name": tool.as_str(),
            "description": tool.description(),
            "inputSchema": tool.input_schema(),
        })
    }));
    tools
}
