use std::time::Duration;

use crate::url::DEFAULT_BASE_URL;

/// Transport configuration for Responses API requests.
#[derive(Debug, Clone)]
pub struct ResponsesApiConfig {
    /// API key passed as a bearer token in `Authorization`.
    pub api_key: String,
    /// Base URL for the endpoint.
    pub base_url: String,
    /// Optional `OpenAI-Organization` header value.
    pub organization: Option<String>,
    /// Optional `OpenAI-Project` header value.
    pub project: Option<String>,
    /// Optional request timeout.
    pub timeout: Option<Duration>,
}

impl Default for ResponsesApiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            organization: None,
            project: None,
            timeout: None,
        }
    }
}

impl ResponsesApiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
