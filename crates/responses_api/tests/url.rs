use responses_api::normalize_responses_url;

#[test]
fn url_normalization_appends_endpoint_suffixes() {
    assert_eq!(
        normalize_responses_url("https://api.openai.com/v1"),
        "https://api.openai.com/v1/responses"
    );
    assert_eq!(
        normalize_responses_url("https://proxy.internal/"),
        "https://proxy.internal/v1/responses"
    );
    assert_eq!(
        normalize_responses_url("http://localhost:8080/v1/responses/"),
        "http://localhost:8080/v1/responses"
    );
}

#[test]
fn blank_url_falls_back_to_default_base() {
    assert_eq!(
        normalize_responses_url("   "),
        "https://api.openai.com/v1/responses"
    );
}
