use serde_json::Value;

use crate::events::{ResponseStatus, ResponsesStreamEvent};

/// Incremental parser for SSE text streams.
#[derive(Debug, Default)]
pub struct SseStreamParser {
    buffer: String,
}

impl SseStreamParser {
    /// Feed arbitrary bytes into the parser and drain complete events.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<ResponsesStreamEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));
        if self.buffer.contains('\r') {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }
        let mut events = Vec::new();

        while let Some(split) = self.buffer.find("\n\n") {
            let frame = self.buffer[..split].to_string();
            self.buffer.drain(0..split + 2);

            if let Some(payload) = extract_data_payload(&frame) {
                if payload == "[DONE]" || payload.is_empty() {
                    continue;
                }

                if let Ok(value) = serde_json::from_str::<Value>(&payload) {
                    if let Some(event) = map_event(value) {
                        events.push(event);
                    }
                }
            }
        }

        events
    }

    /// Parse a complete SSE payload string in one shot.
    pub fn parse_frames(input: &str) -> Vec<ResponsesStreamEvent> {
        let mut parser = Self::default();
        parser.feed(input.as_bytes())
    }

    pub fn is_empty_buffer(&self) -> bool {
        self.buffer.trim().is_empty()
    }
}

fn extract_data_payload(frame: &str) -> Option<String> {
    let data_lines: Vec<&str> = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .collect();

    if data_lines.is_empty() {
        None
    } else {
        Some(data_lines.join("\n"))
    }
}

fn response_id(value: &Value) -> Option<String> {
    value
        .get("response")
        .and_then(|response| response.get("id"))
        .and_then(|value| value.as_str())
        .map(ToString::to_string)
}

fn map_event(value: Value) -> Option<ResponsesStreamEvent> {
    let event_type = value.get("type")?.as_str()?;

    match event_type {
        "response.created" => Some(ResponsesStreamEvent::ResponseCreated {
            id: response_id(&value),
        }),
        "response.output_text.delta" => {
            let delta = value
                .get("delta")
                .and_then(|value| value.as_str())
                .unwrap_or("");
            Some(ResponsesStreamEvent::OutputTextDelta {
                delta: delta.to_owned(),
            })
        }
        "response.output_item.done" => {
            let item = value.get("item")?.clone();
            Some(ResponsesStreamEvent::OutputItemDone { item })
        }
        "response.completed" | "response.done" | "response.incomplete" => {
            let status = value
                .get("response")
                .and_then(|response| response.get("status"))
                .and_then(|status| status.as_str())
                .and_then(ResponseStatus::parse)
                .unwrap_or(if event_type == "response.incomplete" {
                    ResponseStatus::Incomplete
                } else {
                    ResponseStatus::Completed
                });

            Some(ResponsesStreamEvent::ResponseCompleted {
                id: response_id(&value),
                status,
            })
        }
        "response.failed" => {
            let message = value
                .get("response")
                .and_then(|response| response.get("error"))
                .and_then(|error| error.get("message"))
                .and_then(|value| value.as_str())
                .map(ToString::to_string);
            Some(ResponsesStreamEvent::ResponseFailed { message })
        }
        "error" => {
            let code = value
                .get("code")
                .and_then(|value| value.as_str())
                .map(ToString::to_string);
            let message = value
                .get("message")
                .and_then(|value| value.as_str())
                .map(ToString::to_string);
            Some(ResponsesStreamEvent::Error { code, message })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::SseStreamParser;
    use crate::events::ResponsesStreamEvent;

    #[test]
    fn parse_sse_frames_incrementally() {
        let mut parser = SseStreamParser::default();
        let mut events = Vec::new();

        events.extend(parser.feed(b"data: {\"type\":\"response.created\",\"response\""));
        assert!(events.is_empty());
        assert!(!parser.is_empty_buffer());

        events.extend(parser.feed(b":{\"id\":\"resp_1\"}}\n\n"));
        assert_eq!(
            events,
            vec![ResponsesStreamEvent::ResponseCreated {
                id: Some("resp_1".to_string()),
            }]
        );

        events.extend(parser.feed(b"data: [DONE]\n\n"));
        assert_eq!(events.len(), 1);
        assert!(parser.is_empty_buffer());
    }

    #[test]
    fn crlf_framing_is_accepted() {
        let events = SseStreamParser::parse_frames(
            "data: {\"type\":\"response.output_text.delta\",\"delta\":\"hi\"}\r\n\r\n",
        );
        assert_eq!(
            events,
            vec![ResponsesStreamEvent::OutputTextDelta {
                delta: "hi".to_string(),
            }]
        );
    }
}
