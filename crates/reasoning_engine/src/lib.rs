//! Minimal provider-agnostic contract for one reasoning-engine exchange.
//!
//! This crate defines only the request/response shapes shared by the loop
//! controller and engine adapters. It excludes transport details, streaming
//! protocol payloads, and multi-iteration orchestration concerns.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Author role for message input items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    System,
    Developer,
}

impl Role {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::System => "system",
            Self::Developer => "developer",
        }
    }
}

/// One model-facing input item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputItem {
    Message { role: Role, text: String },
    FunctionCallOutput { call_id: String, output: String },
}

impl InputItem {
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::Message {
            role: Role::User,
            text: text.into(),
        }
    }

    #[must_use]
    pub fn system(text: impl Into<String>) -> Self {
        Self::Message {
            role: Role::System,
            text: text.into(),
        }
    }

    #[must_use]
    pub fn function_call_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self::FunctionCallOutput {
            call_id: call_id.into(),
            output: output.into(),
        }
    }

    /// Renders the item in the Responses API `input` list shape.
    #[must_use]
    pub fn to_wire(&self) -> Value {
        match self {
            Self::Message { role, text } => json!({
                "role": role.as_str(),
                "content": [{ "type": "input_text", "text": text }],
            }),
            Self::FunctionCallOutput { call_id, output } => json!({
                "type": "function_call_output",
                "call_id": call_id,
                "output": output,
            }),
        }
    }
}

/// One engine-emitted output item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputItem {
    /// Assistant message; each segment is one output text part.
    Message { segments: Vec<String> },
    /// Function-call request. `arguments` is the raw JSON text sent by the engine.
    FunctionCall {
        name: String,
        call_id: Option<String>,
        arguments: String,
    },
    /// Reasoning, web-search, and other items the caller does not act on.
    Other { item_type: String },
}

impl OutputItem {
    /// Parses a Responses API output item.
    #[must_use]
    pub fn from_wire(value: &Value) -> Self {
        let item_type = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default();

        match item_type {
            "message" => {
                let segments = value
                    .get("content")
                    .and_then(Value::as_array)
                    .map(|parts| {
                        parts
                            .iter()
                            .filter(|part| {
                                matches!(
                                    part.get("type").and_then(Value::as_str),
                                    Some("output_text") | Some("text")
                                )
                            })
                            .filter_map(|part| part.get("text").and_then(Value::as_str))
                            .map(ToString::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                Self::Message { segments }
            }
            "function_call" => Self::FunctionCall {
                name: value
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                call_id: value
                    .get("call_id")
                    .or_else(|| value.get("id"))
                    .and_then(Value::as_str)
                    .filter(|id| !id.trim().is_empty())
                    .map(ToString::to_string),
                arguments: match value.get("arguments") {
                    Some(Value::String(raw)) => raw.clone(),
                    Some(Value::Null) | None => String::new(),
                    Some(other) => other.to_string(),
                },
            },
            other => Self::Other {
                item_type: other.to_string(),
            },
        }
    }
}

/// Three-level knob shared by reasoning effort and search context size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Low,
    #[default]
    Medium,
    High,
}

impl Level {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!(
                "unsupported level '{other}'; expected one of low, medium, high"
            )),
        }
    }
}

/// How the engine may choose tools.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
    Required,
}

impl ToolChoice {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::None => "none",
            Self::Required => "required",
        }
    }
}

/// Function tool definition exposed to the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

impl ToolDefinition {
    /// Renders the definition as a Responses API function tool.
    #[must_use]
    pub fn to_wire(&self) -> Value {
        json!({
            "type": "function",
            "name": self.name,
            "description": self.description.clone().unwrap_or_default(),
            "parameters": self.input_schema,
        })
    }
}

/// Input required for one engine exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineRequest {
    pub instructions: String,
    pub input: Vec<InputItem>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: ToolChoice,
    /// Lets the engine recall its own prior turn without the caller resending it.
    pub previous_response_id: Option<String>,
    pub reasoning_effort: Level,
    pub search_context_size: Level,
}

/// Ordered output of one engine exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineResponse {
    pub id: Option<String>,
    pub output: Vec<OutputItem>,
}

impl EngineResponse {
    /// Concatenates the text segments of every message item.
    #[must_use]
    pub fn message_text(&self) -> String {
        self.output
            .iter()
            .filter_map(|item| match item {
                OutputItem::Message { segments } => Some(segments.concat()),
                _ => None,
            })
            .collect()
    }
}

/// Failure talking to the reasoning engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("engine configuration error: {0}")]
    Config(String),
    #[error("engine transport error: {0}")]
    Transport(String),
    #[error("engine rejected request: {0}")]
    Rejected(String),
    #[error("engine response incomplete: {0}")]
    Incomplete(String),
}

/// Immutable metadata describing an engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineProfile {
    pub engine_id: String,
    pub model_id: String,
}

/// Engine interface for one request/response exchange.
#[async_trait]
pub trait ReasoningEngine: Send + Sync + 'static {
    /// Returns engine/model identity metadata.
    fn profile(&self) -> EngineProfile;

    /// Sends one request and returns the engine's complete ordered output.
    async fn respond(&self, request: EngineRequest) -> Result<EngineResponse, EngineError>;
}
