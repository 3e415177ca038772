//! Shared HTTP error handling for the wire adapters

use reqwest::Response;
use serde_json::Value;

use crate::llm::provider::{LLMError, LLMErrorMetadata};

pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_TOO_MANY_REQUESTS: u16 = 429;

/// Common rate limit error patterns (pre-lowercased for efficient matching)
const RATE_LIMIT_PATTERNS: &[&str] = &[
    "resource_exhausted",
    "rate limit",
    "rate_limit",
    "ratelimit",
    "too many requests",
];

/// Pass successful responses through; turn failures into a typed error.
pub async fn handle_http_error(response: Response, provider: &str) -> Result<Response, LLMError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status().as_u16();
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    let request_id = response
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    let error_text = response.text().await.unwrap_or_default();

    tracing::warn!(
        provider,
        status,
        body = %error_text,
        "backend HTTP error"
    );

    Err(parse_api_error(
        provider,
        status,
        &error_text,
        retry_after,
        request_id,
    ))
}

#[inline]
pub fn is_rate_limit_error(status_code: u16, error_text: &str) -> bool {
    if status_code == STATUS_TOO_MANY_REQUESTS {
        return true;
    }

    let lower = error_text.to_lowercase();
    RATE_LIMIT_PATTERNS
        .iter()
        .any(|pattern| lower.contains(pattern))
}

#[inline]
pub fn format_network_error(provider: &str, error: &reqwest::Error) -> LLMError {
    if error.is_timeout() {
        return LLMError::Timeout {
            message: format!("{provider}: {error}"),
            metadata: None,
        };
    }
    LLMError::Network {
        message: format!("{provider}: {error}"),
        metadata: None,
    }
}

#[inline]
pub fn format_parse_error(provider: &str, error: &impl std::fmt::Display) -> LLMError {
    LLMError::Provider {
        message: format!("{provider}: Failed to parse response: {error}"),
        metadata: None,
    }
}

/// Extract the upstream message from the common provider error shapes.
///
/// - OpenAI-compatible and Gemini: `{"error": {"message": "..."}}`
/// - Plain: `{"error": "..."}`
///
/// Falls back to the raw body.
pub fn extract_error_message(body: &str) -> String {
    let Ok(json) = serde_json::from_str::<Value>(body) else {
        return body.to_owned();
    };
    let error = json.get("error");
    error
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .or_else(|| error.and_then(Value::as_str))
        .or_else(|| {
            error
                .and_then(|e| e.get("status"))
                .and_then(Value::as_str)
        })
        .map(str::to_owned)
        .unwrap_or_else(|| body.to_owned())
}

pub fn parse_api_error(
    provider: &str,
    status_code: u16,
    body: &str,
    retry_after: Option<String>,
    request_id: Option<String>,
) -> LLMError {
    let error_message = extract_error_message(body);
    let metadata = |code: Option<&str>| {
        Some(LLMErrorMetadata::new(
            provider,
            Some(status_code),
            code.map(str::to_owned),
            request_id.clone(),
            retry_after.clone(),
            Some(body.to_owned()),
        ))
    };

    match status_code {
        401 | 403 => LLMError::Authentication {
            message: format!("{provider}: {error_message}"),
            metadata: metadata(Some("authentication_error")),
        },
        429 => LLMError::RateLimit {
            metadata: metadata(Some("rate_limit_error")),
        },
        STATUS_BAD_REQUEST if is_rate_limit_error(status_code, body) => LLMError::RateLimit {
            metadata: metadata(Some("quota_exceeded")),
        },
        STATUS_BAD_REQUEST => LLMError::InvalidRequest {
            message: format!("{provider}: {error_message}"),
            metadata: metadata(Some("invalid_request")),
        },
        _ => LLMError::Provider {
            message: format!("{provider}: HTTP {status_code}: {error_message}"),
            metadata: metadata(None),
        },
    }
}
