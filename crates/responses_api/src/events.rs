use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Canonical terminal state mapped from responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Completed,
    Incomplete,
    Failed,
    Cancelled,
    Queued,
    InProgress,
}

impl ResponseStatus {
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "completed" => Self::Completed,
            "incomplete" => Self::Incomplete,
            "failed" => Self::Failed,
            "cancelled" => Self::Cancelled,
            "queued" => Self::Queued,
            "in_progress" => Self::InProgress,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Incomplete => "incomplete",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
        }
    }
}

/// Stream event emitted by the parser after normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ResponsesStreamEvent {
    #[serde(rename = "response.created")]
    ResponseCreated { id: Option<String> },
    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta { delta: String },
    /// One finished output item, kept as raw JSON.
    #[serde(rename = "response.output_item.done")]
    OutputItemDone { item: Value },
    #[serde(rename = "response.completed")]
    ResponseCompleted {
        id: Option<String>,
        status: ResponseStatus,
    },
    #[serde(rename = "response.failed")]
    ResponseFailed { message: Option<String> },
    #[serde(rename = "error")]
    Error {
        code: Option<String>,
        message: Option<String>,
    },
}
