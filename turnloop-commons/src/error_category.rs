//! Canonical error taxonomy for backend and tool failures.
//!
//! Every failure the orchestration loop can observe is folded into one
//! [`ErrorCategory`]. The category alone decides whether a backend call is
//! retried, so the retry loop never has to inspect provider-specific errors.
//!
//! Errors are divided into **retryable** (transient) and **non-retryable**
//! (permanent) categories. A request that violated a backend's wire contract
//! is its own category: resending the same body fails the same way, so it is
//! never retried.

use std::fmt;
use std::time::Duration;

use crate::llm::LLMError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorCategory {
    // === Retryable (Transient) ===
    /// Network connectivity issue (connection reset, DNS failure, etc.)
    Network,
    /// Request timed out or deadline exceeded
    Timeout,
    /// Rate limit exceeded (HTTP 429, provider throttling)
    RateLimit,
    /// External service temporarily unavailable (HTTP 5xx)
    ServiceUnavailable,

    // === Non-Retryable (Permanent) ===
    /// Invalid API key or expired token
    Authentication,
    /// The request was rejected as malformed (HTTP 4xx)
    InvalidParameters,
    /// The request broke a backend's reasoning-preservation contract
    ProtocolViolation,
    /// Quota, billing, or spending limit reached
    ResourceExhausted,
    /// The session was cancelled by its caller
    Cancelled,
    /// Catch-all for unclassified failures
    ExecutionError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// Exponential backoff with base delay and maximum cap.
    Exponential { base: Duration, max: Duration },
}

impl BackoffStrategy {
    /// Delay before retry number `attempt` (1-based), without jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            BackoffStrategy::Exponential { base, max } => {
                let exponent = attempt.saturating_sub(1).min(16);
                base.saturating_mul(1_u32 << exponent).min(*max)
            }
        }
    }
}

impl ErrorCategory {
    #[inline]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Network
                | ErrorCategory::Timeout
                | ErrorCategory::RateLimit
                | ErrorCategory::ServiceUnavailable
        )
    }

    /// Get a concise, user-friendly label for this error category.
    pub const fn user_label(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "Network error",
            ErrorCategory::Timeout => "Request timed out",
            ErrorCategory::RateLimit => "Rate limit exceeded",
            ErrorCategory::ServiceUnavailable => "Service temporarily unavailable",
            ErrorCategory::Authentication => "Authentication failed",
            ErrorCategory::InvalidParameters => "Invalid request",
            ErrorCategory::ProtocolViolation => "Backend protocol violation",
            ErrorCategory::ResourceExhausted => "Resource limit reached",
            ErrorCategory::Cancelled => "Operation cancelled",
            ErrorCategory::ExecutionError => "Execution failed",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.user_label())
    }
}

/// Classify an error message string into an `ErrorCategory`.
///
/// Marker groups are checked in priority order to handle overlapping patterns
/// (e.g. "quota exceeded" is exhaustion, not a rate limit).
pub fn classify_error_message(msg: &str) -> ErrorCategory {
    let msg = msg.to_ascii_lowercase();

    if contains_any(
        &msg,
        &[
            "invalid api key",
            "authentication failed",
            "unauthorized",
            "invalid credentials",
        ],
    ) {
        return ErrorCategory::Authentication;
    }

    if contains_any(
        &msg,
        &[
            "insufficient credits",
            "insufficient_quota",
            "quota exceeded",
            "billing",
            "payment required",
        ],
    ) {
        return ErrorCategory::ResourceExhausted;
    }

    if contains_any(&msg, &["cancelled", "canceled"]) {
        return ErrorCategory::Cancelled;
    }

    if contains_any(&msg, &["rate limit", "too many requests", "429", "throttl"]) {
        return ErrorCategory::RateLimit;
    }

    if contains_any(&msg, &["timeout", "timed out", "deadline exceeded"]) {
        return ErrorCategory::Timeout;
    }

    if contains_any(
        &msg,
        &[
            "service unavailable",
            "temporarily unavailable",
            "internal server error",
            "bad gateway",
            "gateway timeout",
            "overloaded",
            "500",
            "502",
            "503",
            "504",
        ],
    ) {
        return ErrorCategory::ServiceUnavailable;
    }

    if contains_any(
        &msg,
        &[
            "network",
            "connection reset",
            "connection refused",
            "broken pipe",
            "dns",
            "tls handshake",
            "econnreset",
        ],
    ) {
        return ErrorCategory::Network;
    }

    if contains_any(
        &msg,
        &["invalid request", "malformed", "missing required", "unknown field"],
    ) {
        return ErrorCategory::InvalidParameters;
    }

    ErrorCategory::ExecutionError
}

#[inline]
fn contains_any(message: &str, markers: &[&str]) -> bool {
    markers.iter().any(|marker| message.contains(marker))
}

impl From<&LLMError> for ErrorCategory {
    fn from(err: &LLMError) -> Self {
        match err {
            LLMError::Authentication { .. } => ErrorCategory::Authentication,
            LLMError::RateLimit { .. } => ErrorCategory::RateLimit,
            LLMError::InvalidRequest { .. } => ErrorCategory::InvalidParameters,
            LLMError::Network { .. } => ErrorCategory::Network,
            LLMError::Timeout { .. } => ErrorCategory::Timeout,
            LLMError::Provider { message, metadata } => {
                if let Some(status) = metadata.as_ref().and_then(|meta| meta.status) {
                    return match status {
                        401 | 403 => ErrorCategory::Authentication,
                        402 => ErrorCategory::ResourceExhausted,
                        408 => ErrorCategory::Timeout,
                        429 => ErrorCategory::RateLimit,
                        500..=599 => ErrorCategory::ServiceUnavailable,
                        400..=499 => ErrorCategory::InvalidParameters,
                        _ => classify_error_message(message),
                    };
                }
                classify_error_message(message)
            }
        }
    }
}

impl LLMError {
    #[inline]
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::from(self)
    }
}
