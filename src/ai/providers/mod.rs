//! Response Providers
//!
//! Concrete implementations of the ResponseCapability trait, plus the
//! request plumbing shared by the HTTP-backed ones.

pub mod fallback;
pub mod openai;

pub use fallback::FallbackResponder;
pub use openai::OpenAiResponder;

use crate::ai::{AiError, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::StatusCode;
use std::time::Duration;

/// Retry hint used when a 429 carries no usable `Retry-After`
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Longest error body kept in an error message
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Default headers for a chat endpoint
///
/// The bearer token is marked sensitive so it never shows up in debug
/// output of the client.
pub fn build_headers(api_key: &str, organization: Option<&str>) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    let mut bearer = HeaderValue::from_str(&format!("Bearer {api_key}"))
        .map_err(|_| AiError::InvalidRequest("API key contains invalid characters".into()))?;
    bearer.set_sensitive(true);
    headers.insert(AUTHORIZATION, bearer);

    if let Some(org) = organization.filter(|o| !o.is_empty()) {
        let value = HeaderValue::from_str(org)
            .map_err(|e| AiError::InvalidRequest(format!("Invalid organization: {e}")))?;
        headers.insert("OpenAI-Organization", value);
    }
    Ok(headers)
}

/// Client whose whole-request timeout bounds one reply
pub fn build_client(timeout_seconds: u64, headers: HeaderMap) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_seconds))
        .default_headers(headers)
        .build()?)
}

/// Pass a successful response through, map everything else to `AiError`
pub async fn handle_api_error(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
    let body = response.text().await.unwrap_or_default();

    Err(classify_status(status, retry_after, truncate_body(&body)))
}

fn classify_status(status: StatusCode, retry_after: u64, body: String) -> AiError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AiError::AuthenticationError(body),
        StatusCode::TOO_MANY_REQUESTS => AiError::RateLimitExceeded { retry_after },
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => AiError::InvalidRequest(body),
        s if s.is_server_error() => AiError::ProviderError(format!("{s}: {body}")),
        s => AiError::ApiError(format!("{s}: {body}")),
    }
}

fn truncate_body(body: &str) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY_CHARS) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
