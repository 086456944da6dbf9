use std::collections::BTreeMap;

use crate::config::ResponsesApiConfig;
use crate::error::ResponsesApiError;

pub const HEADER_ACCEPT: &str = "accept";
pub const HEADER_CONTENT_TYPE: &str = "content-type";
pub const HEADER_AUTHORIZATION: &str = "authorization";
pub const HEADER_ORGANIZATION: &str = "openai-organization";
pub const HEADER_PROJECT: &str = "openai-project";
pub const HEADER_USER_AGENT: &str = "user-agent";

/// Build a deterministic header map for Responses transport requests.
pub fn build_headers(
    config: &ResponsesApiConfig,
) -> Result<BTreeMap<String, String>, ResponsesApiError> {
    let mut headers = BTreeMap::new();

    if config.api_key.trim().is_empty() {
        return Err(ResponsesApiError::MissingApiKey);
    }

    headers.insert(
        HEADER_AUTHORIZATION.to_owned(),
        format!("Bearer {}", config.api_key.trim()),
    );
    headers.insert(HEADER_ACCEPT.to_owned(), "text/event-stream".to_owned());
    headers.insert(
        HEADER_CONTENT_TYPE.to_owned(),
        "application/json".to_owned(),
    );

    if let Some(organization) = config.organization.as_deref().and_then(sanitize_nonempty) {
        headers.insert(HEADER_ORGANIZATION.to_owned(), organization);
    }
    if let Some(project) = config.project.as_deref().and_then(sanitize_nonempty) {
        headers.insert(HEADER_PROJECT.to_owned(), project);
    }

    headers.insert(HEADER_USER_AGENT.to_owned(), default_user_agent());

    Ok(headers)
}

fn sanitize_nonempty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}

fn default_user_agent() -> String {
    format!(
        "lrm-relay/{} ({}; {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}
