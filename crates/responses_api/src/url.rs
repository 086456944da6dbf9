/// Default base URL for Responses transport requests.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Normalize a base URL to a `/responses` endpoint.
///
/// Normalization rules:
/// 1) keep a URL already ending in `/responses` unchanged
/// 2) append `/responses` when path ends in `/v1`
/// 3) append `/v1/responses` otherwise
pub fn normalize_responses_url(input: &str) -> String {
    let base = if input.trim().is_empty() {
        DEFAULT_BASE_URL
    } else {
        input.trim()
    };

    let trimmed = base.trim_end_matches('/');
    if trimmed.ends_with("/responses") {
        return trimmed.to_string();
    }
    if trimmed.ends_with("/v1") {
        return format!("{trimmed}/responses");
    }
    format!("{trimmed}/v1/responses")
}
