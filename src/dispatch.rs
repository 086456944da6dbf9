//! Tool dispatch with the confirmation gate for mutating tools.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use reasoning_engine::ToolDefinition;
use serde_json::{json, Map, Value};

use crate::backend::ToolBackend;
use crate::normalize::{normalize_result, ToolResult};

/// Literal value the `confirm` argument must carry for gated tools.
pub const CONFIRMATION_VALUE: &str = "yes";

/// Tools the engine and callers may invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    View,
    Edit,
    List,
    Write,
    Bash,
    Grep,
}

impl ToolName {
    pub const ALL: [ToolName; 6] = [
        Self::View,
        Self::Edit,
        Self::List,
        Self::Write,
        Self::Bash,
        Self::Grep,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Edit => "edit",
            Self::List => "list",
            Self::Write => "write",
            Self::Bash => "bash",
            Self::Grep => "grep",
        }
    }

    /// Tool name understood by the backend.
    #[must_use]
    pub fn backend_name(self) -> &'static str {
        match self {
            Self::View => "read_file",
            Self::Edit => "edit_file",
            Self::List => "list_directory",
            Self::Write => "write_file",
            Self::Bash => "bash",
            Self::Grep => "grep",
        }
    }

    /// Whether the tool only runs with `confirm: "yes"`.
    #[must_use]
    pub fn requires_confirmation(self) -> bool {
        matches!(self, Self::Write | Self::Bash)
    }

    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::View => "Read a text file. Lines are numbered from 1; use offset and limit for large files.",
            Self::Edit => "Replace exactly one occurrence of old_string with new_string in a file. An empty old_string creates a new file.",
            Self::List => "List the entries of a directory. Directories end with '/'. Defaults to the current directory.",
            Self::Write => "Write content to a file, creating parent directories. Requires confirm set to \"yes\".",
            Self::Bash => "Run a shell command and return its status, stdout, and stderr. Requires confirm set to \"yes\".",
            Self::Grep => "Search file contents with a regular expression and report file:line:text matches.",
        }
    }

    #[must_use]
    pub fn input_schema(self) -> Value {
        let confirm = json!({
            "type": "string",
            "enum": [CONFIRMATION_VALUE],
            "description": "Must be \"yes\" to perform this action",
        });
        match self {
            Self::View => json!({
                "type": "object",
                "properties": {
                    "file_path": { "type": "string", "description": "Absolute path of the file" },
                    "offset": { "type": "integer", "description": "First line to return (1-based)" },
                    "limit": { "type": "integer", "description": "Maximum number of lines" },
                },
                "required": ["file_path"],
            }),
            Self::Edit => json!({
                "type": "object",
                "properties": {
                    "file_path": { "type": "string", "description": "Absolute path of the file" },
                    "old_string": { "type": "string" },
                    "new_string": { "type": "string" },
                },
                "required": ["file_path", "old_string", "new_string"],
            }),
            Self::List => json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Directory to list" },
                },
            }),
            Self::Write => json!({
                "type": "object",
                "properties": {
                    "file_path": { "type": "string", "description": "Absolute path of the file" },
                    "content": { "type": "string" },
                    "confirm": confirm,
                },
                "required": ["file_path", "content", "confirm"],
            }),
            Self::Bash => json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string" },
                    "timeout_sec": { "type": "integer" },
                    "confirm": confirm,
                },
                "required": ["command", "confirm"],
            }),
            Self::Grep => json!({
                "type": "object",
                "properties": {
                    "pattern": { "type": "string", "description": "Regular expression" },
                    "path": { "type": "string", "description": "Directory or file to search" },
                    "include": { "type": "string", "description": "File name filter such as *.rs" },
                },
                "required": ["pattern"],
            }),
        }
    }

    #[must_use]
    pub fn definition(self) -> ToolDefinition {
        ToolDefinition {
            name: self.as_str().to_string(),
            description: Some(self.description().to_string()),
            input_schema: self.input_schema(),
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolName {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == value)
            .ok_or_else(|| format!("unknown tool '{value}'"))
    }
}

/// The fixed tool schema sent with every engine request.
#[must_use]
pub fn tool_definitions() -> Vec<ToolDefinition> {
    ToolName::ALL.into_iter().map(ToolName::definition).collect()
}

/// Routes named tool calls to the backend and normalizes the results.
#[derive(Clone)]
pub struct Dispatcher {
    backend: Arc<dyn ToolBackend>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(backend: Arc<dyn ToolBackend>) -> Self {
        Self { backend }
    }

    #[must_use]
    pub fn backend(&self) -> &Arc<dyn ToolBackend> {
        &self.backend
    }

    /// Executes one call. Never fails: problems become error results.
    pub async fn dispatch(&self, name: &str, arguments: &Value) -> ToolResult {
        let tool = match name.parse::<ToolName>() {
            Ok(tool) => tool,
            Err(message) => return ToolResult::error(message),
        };
        let Some(arguments) = arguments.as_object() else {
            return ToolResult::error(format!("{tool} arguments must be a JSON object"));
        };

        if tool.requires_confirmation() && !is_confirmed(arguments) {
            tracing::info!(%tool, "refusing unconfirmed tool call");
            return ToolResult::error(format!(
                "{tool} requires explicit confirmation: set \"confirm\" to \"{CONFIRMATION_VALUE}\" to proceed. Nothing was executed."
            ));
        }

        let mut forwarded: Map<String, Value> = arguments.clone();
        forwarded.remove("confirm");

        tracing::debug!(%tool, backend_tool = tool.backend_name(), "dispatching tool call");
        match self
            .backend
            .call_tool(tool.backend_name(), Value::Object(forwarded))
            .await
        {
            Ok(result) => normalize_result(&result),
            Err(error) => {
                tracing::warn!(%tool, %error, "tool backend call failed");
                ToolResult::error(format!("{tool} failed: {error}"))
            }
        }
    }
}

fn is_confirmed(arguments: &Map<String, Value>) -> bool {
    arguments.get("confirm").and_then(Value::as_str) == Some(CONFIRMATION_VALUE)
}
