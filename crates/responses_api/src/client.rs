use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response};

use crate::config::ResponsesApiConfig;
use crate::error::{parse_error_message, ResponsesApiError};
use crate::events::{ResponseStatus, ResponsesStreamEvent};
use crate::headers::build_headers;
use crate::payload::ResponsesRequest;
use crate::sse::SseStreamParser;
use crate::url::normalize_responses_url;

#[derive(Debug)]
pub struct ResponsesApiClient {
    http: Client,
    config: ResponsesApiConfig,
}

#[derive(Debug, Clone, Default)]
pub struct StreamResult {
    pub events: Vec<ResponsesStreamEvent>,
    /// Identifier announced by `response.created` or `response.completed`.
    pub response_id: Option<String>,
    pub terminal: Option<ResponseStatus>,
}

impl ResponsesApiClient {
    pub fn new(config: ResponsesApiConfig) -> Result<Self, ResponsesApiError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(ResponsesApiError::from)?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ResponsesApiConfig {
        &self.config
    }

    pub fn normalized_endpoint(&self) -> String {
        normalize_responses_url(&self.config.base_url)
    }

    pub fn build_headers(&self) -> Result<HeaderMap, ResponsesApiError> {
        let headers = build_headers(&self.config)?;
        let mut out = HeaderMap::new();
        for (key, value) in headers {
            out.insert(
                HeaderName::from_bytes(key.as_bytes()).map_err(|_| {
                    ResponsesApiError::InvalidHeader(format!("invalid header key: {key}"))
                })?,
                HeaderValue::from_str(&value).map_err(|_| {
                    ResponsesApiError::InvalidHeader(format!("invalid header value for {key}"))
                })?,
            );
        }
        Ok(out)
    }

    pub fn build_request(
        &self,
        request: &ResponsesRequest,
    ) -> Result<reqwest::RequestBuilder, ResponsesApiError> {
        validate_request_payload_shape(request)?;

        let headers = self.build_headers()?;
        let mut payload = request.clone();
        payload.stream = true;
        Ok(self
            .http
            .post(self.normalized_endpoint())
            .headers(headers)
            .json(&payload))
    }

    /// Sends the request once. Non-success statuses become [`ResponsesApiError::Status`].
    pub async fn send(&self, request: &ResponsesRequest) -> Result<Response, ResponsesApiError> {
        let response = self.build_request(request)?.send().await?;
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(ResponsesApiError::Status(
            status,
            parse_error_message(status, &body),
        ))
    }

    pub async fn stream_with_handler<F>(
        &self,
        request: &ResponsesRequest,
        mut on_event: F,
    ) -> Result<(Option<String>, Option<ResponseStatus>), ResponsesApiError>
    where
        F: FnMut(ResponsesStreamEvent),
    {
        let response = self.send(request).await?;
        let mut bytes = response.bytes_stream();
        let mut parser = SseStreamParser::default();
        let mut tracker = StreamTracker::default();

        while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(ResponsesApiError::from)?;
            for event in parser.feed(&chunk) {
                tracker.process(event, &mut on_event)?;
            }
        }

        Ok((tracker.response_id, tracker.terminal))
    }

    pub async fn stream(&self, request: &ResponsesRequest) -> Result<StreamResult, ResponsesApiError> {
        let mut events = Vec::new();
        let (response_id, terminal) = self
            .stream_with_handler(request, |event| {
                events.push(event);
            })
            .await?;

        Ok(StreamResult {
            events,
            response_id,
            terminal,
        })
    }
}

#[derive(Debug, Default)]
struct StreamTracker {
    response_id: Option<String>,
    terminal: Option<ResponseStatus>,
}

impl StreamTracker {
    fn process<F>(
        &mut self,
        event: ResponsesStreamEvent,
        on_event: &mut F,
    ) -> Result<(), ResponsesApiError>
    where
        F: FnMut(ResponsesStreamEvent),
    {
        match &event {
            ResponsesStreamEvent::ResponseCreated { id } => {
                if let Some(id) = id {
                    self.response_id = Some(id.clone());
                }
            }
            ResponsesStreamEvent::ResponseCompleted { id, status } => {
                if let Some(id) = id {
                    self.response_id = Some(id.clone());
                }
                self.terminal = Some(*status);
            }
            ResponsesStreamEvent::ResponseFailed { message } => {
                return Err(ResponsesApiError::StreamFailed {
                    code: None,
                    message: message
                        .clone()
                        .unwrap_or_else(|| "response failed".to_owned()),
                });
            }
            ResponsesStreamEvent::Error { code, message } => {
                return Err(ResponsesApiError::StreamFailed {
                    code: code.clone(),
                    message: message
                        .clone()
                        .or_else(|| code.clone())
                        .unwrap_or_else(|| "unknown stream error".to_owned()),
                });
            }
            _ => {}
        }

        on_event(event);
        Ok(())
    }
}

fn validate_request_payload_shape(request: &ResponsesRequest) -> Result<(), ResponsesApiError> {
    if request.input.is_array() {
        return Ok(());
    }

    Err(ResponsesApiError::InvalidRequestPayload(format!(
        "'input' must be a JSON array/list, got {}",
        value_type_name(&request.input)
    )))
}

fn value_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
