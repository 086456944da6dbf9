//! Responses API-backed implementation of the shared `reasoning_engine` contract.
//!
//! This adapter translates `responses_api` stream semantics into one complete
//! [`EngineResponse`] per request. It never retries: a failed exchange is
//! reported once and the caller decides what to do with it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reasoning_engine::{
    EngineError, EngineProfile, EngineRequest, EngineResponse, Level, OutputItem, ReasoningEngine,
};
use responses_api::payload::ResponsesReasoning;
use responses_api::{
    ResponseStatus, ResponsesApiClient, ResponsesApiConfig, ResponsesApiError, ResponsesRequest,
    ResponsesStreamEvent, StreamResult,
};
use serde_json::{json, Value};

/// Stable engine identifier used for startup selection.
pub const RESPONSES_ENGINE_ID: &str = "responses";

/// Model used when configuration leaves it blank.
pub const DEFAULT_MODEL_ID: &str = "o3";

/// Runtime configuration for the Responses engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsesEngineConfig {
    pub api_key: String,
    pub model_id: String,
    pub base_url: Option<String>,
    pub organization: Option<String>,
    pub project: Option<String>,
    pub timeout: Option<Duration>,
}

impl ResponsesEngineConfig {
    #[must_use]
    pub fn new(api_key: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model_id: model_id.into(),
            base_url: None,
            organization: None,
            project: None,
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    #[must_use]
    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    #[must_use]
    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn into_api_config(self) -> ResponsesApiConfig {
        let mut config = ResponsesApiConfig::new(self.api_key);

        if let Some(base_url) = self.base_url {
            config = config.with_base_url(base_url);
        }

        if let Some(organization) = self.organization {
            config = config.with_organization(organization);
        }

        if let Some(project) = self.project {
            config = config.with_project(project);
        }

        if let Some(timeout) = self.timeout {
            config = config.with_timeout(timeout);
        }

        config
    }
}

#[async_trait]
trait StreamClient: Send + Sync {
    async fn stream(&self, request: &ResponsesRequest) -> Result<StreamResult, ResponsesApiError>;
}

#[derive(Debug)]
struct DefaultStreamClient {
    client: ResponsesApiClient,
}

#[async_trait]
impl StreamClient for DefaultStreamClient {
    async fn stream(&self, request: &ResponsesRequest) -> Result<StreamResult, ResponsesApiError> {
        self.client.stream(request).await
    }
}

/// `ReasoningEngine` adapter backed by `responses_api` transport primitives.
pub struct ResponsesEngine {
    model_id: String,
    stream_client: Arc<dyn StreamClient>,
}

impl ResponsesEngine {
    /// Creates an engine using real Responses API transport.
    pub fn new(config: ResponsesEngineConfig) -> Result<Self, EngineError> {
        if config.api_key.trim().is_empty() {
            return Err(EngineError::Config(
                "an API key is required for the responses engine".to_string(),
            ));
        }

        let model_id = sanitize_model_id(&config.model_id);
        let client = ResponsesApiClient::new(config.into_api_config()).map_err(|error| {
            EngineError::Config(format!("failed to initialize responses client: {error}"))
        })?;

        Ok(Self {
            model_id,
            stream_client: Arc::new(DefaultStreamClient { client }),
        })
    }

    fn build_request(&self, request: EngineRequest) -> ResponsesRequest {
        let input = Value::Array(request.input.iter().map(|item| item.to_wire()).collect());
        let instructions = Some(request.instructions).filter(|value| !value.trim().is_empty());

        let mut payload = ResponsesRequest::new(self.model_id.clone(), input, instructions);
        payload.tool_choice = Some(request.tool_choice.as_str().to_string());
        payload.previous_response_id = request.previous_response_id;
        payload.reasoning = Some(ResponsesReasoning {
            effort: Some(request.reasoning_effort.as_str().to_string()),
            summary: None,
        });
        payload.tools = request.tools.iter().map(|tool| tool.to_wire()).collect();
        payload
            .tools
            .push(web_search_tool(request.search_context_size));
        payload
    }

    #[cfg(test)]
    fn with_stream_client_for_tests(model_id: &str, stream_client: Arc<dyn StreamClient>) -> Self {
        Self {
            model_id: sanitize_model_id(model_id),
            stream_client,
        }
    }
}

#[async_trait]
impl ReasoningEngine for ResponsesEngine {
    fn profile(&self) -> EngineProfile {
        EngineProfile {
            engine_id: RESPONSES_ENGINE_ID.to_string(),
            model_id: self.model_id.clone(),
        }
    }

    async fn respond(&self, request: EngineRequest) -> Result<EngineResponse, EngineError> {
        let payload = self.build_request(request);
        tracing::debug!(
            model = %payload.model,
            previous_response_id = ?payload.previous_response_id,
            "sending responses request"
        );

        let result = self
            .stream_client
            .stream(&payload)
            .await
            .map_err(map_transport_error)?;

        collect_response(result)
    }
}

fn collect_response(result: StreamResult) -> Result<EngineResponse, EngineError> {
    match result.terminal {
        Some(ResponseStatus::Completed) => {}
        Some(status) => {
            return Err(EngineError::Incomplete(format!(
                "response ended with non-complete status '{}'",
                status.as_str()
            )));
        }
        None => {
            return Err(EngineError::Incomplete(
                "stream ended without terminal status".to_string(),
            ));
        }
    }

    let output = result
        .events
        .iter()
        .filter_map(|event| match event {
            ResponsesStreamEvent::OutputItemDone { item } => Some(OutputItem::from_wire(item)),
            _ => None,
        })
        .collect();

    Ok(EngineResponse {
        id: result.response_id,
        output,
    })
}

fn web_search_tool(search_context_size: Level) -> Value {
    json!({
        "type": "web_search_preview",
        "search_context_size": search_context_size.as_str(),
    })
}

fn map_transport_error(error: ResponsesApiError) -> EngineError {
    match error {
        ResponsesApiError::MissingApiKey | ResponsesApiError::InvalidHeader(_) => {
            EngineError::Config(error.to_string())
        }
        ResponsesApiError::Status(status, _) if status.is_client_error() => {
            EngineError::Rejected(error.to_string())
        }
        ResponsesApiError::InvalidRequestPayload(_) => EngineError::Rejected(error.to_string()),
        other => EngineError::Transport(other.to_string()),
    }
}

fn sanitize_model_id(model_id: &str) -> String {
    let trimmed = model_id.trim();
    if trimmed.is_empty() {
        DEFAULT_MODEL_ID.to_string()
    } else {
        trimmed.to_string()
    }
}
