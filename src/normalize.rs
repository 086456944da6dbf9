//! Uniform text-bearing shape for backend tool results.

use serde_json::Value;

pub const NO_CONTENT: &str = "no content received";

/// Normalized tool output: ordered text segments plus an error flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub segments: Vec<String>,
    pub is_error: bool,
}

impl ToolResult {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            segments: vec![text.into()],
            is_error: false,
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            segments: vec![message.into()],
            is_error: true,
        }
    }

    /// Segments joined by newlines, as fed back to the engine.
    #[must_use]
    pub fn joined_text(&self) -> String {
        self.segments.join("\n")
    }
}

/// Converts a backend result (`{content: [...], isError}`) into a [`ToolResult`].
///
/// Missing or empty content is an error. Content items map by `type`:
/// `text` passes through, `image` becomes a placeholder naming its media
/// type, `resource` yields its text or else its uri, anything else is
/// serialized as JSON.
#[must_use]
pub fn normalize_result(result: &Value) -> ToolResult {
    let items = match result.get("content").and_then(Value::as_array) {
        Some(items) if !items.is_empty() => items,
        _ => return ToolResult::error(NO_CONTENT),
    };

    let segments = items.iter().map(normalize_item).collect();
    let is_error = result
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    ToolResult { segments, is_error }
}

fn normalize_item(item: &Value) -> String {
    match item.get("type").and_then(Value::as_str) {
        Some("text") => item
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        Some("image") => {
            let media_type = item
                .get("mimeType")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            format!("[image: {media_type}]")
        }
        Some("resource") => {
            let resource = item.get("resource").unwrap_or(item);
            resource
                .get("text")
                .and_then(Value::as_str)
                .or_else(|| resource.get("uri").and_then(Value::as_str))
                .map(str::to_string)
                .unwrap_or_else(|| resource.to_string())
        }
        _ => item.to_string(),
    }
}
