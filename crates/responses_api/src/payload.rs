use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Canonical request payload shape for the responses endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesRequest {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    pub input: Value,
    /// Default: true. Stored responses are required for `previous_response_id`.
    #[serde(default = "default_true")]
    pub store: bool,
    /// Default: true.
    #[serde(default = "default_true")]
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    #[serde(default)]
    pub parallel_tool_calls: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ResponsesReasoning>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
}

fn default_true() -> bool {
    true
}

impl ResponsesRequest {
    pub fn new(
        model: impl Into<String>,
        input: impl Into<Value>,
        instructions: Option<String>,
    ) -> Self {
        Self {
            model: model.into(),
            input: input.into(),
            instructions,
            store: true,
            stream: true,
            tool_choice: Some("auto".to_string()),
            parallel_tool_calls: true,
            previous_response_id: None,
            reasoning: None,
            tools: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesReasoning {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effort: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}
