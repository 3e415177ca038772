//! Core LLM types shared across the project

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub cached_prompt_tokens: Option<u32>,
    pub reasoning_tokens: Option<u32>,
}

impl Usage {
    /// Fold another usage report into this one. Optional counters stay `None`
    /// until at least one side reports them.
    pub fn accumulate(&mut self, other: &Usage) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self
            .completion_tokens
            .saturating_add(other.completion_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
        self.cached_prompt_tokens =
            add_optional(self.cached_prompt_tokens, other.cached_prompt_tokens);
        self.reasoning_tokens = add_optional(self.reasoning_tokens, other.reasoning_tokens);
    }
}

fn add_optional(left: Option<u32>, right: Option<u32>) -> Option<u32> {
    match (left, right) {
        (None, None) => None,
        (l, r) => Some(l.unwrap_or(0).saturating_add(r.unwrap_or(0))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error(String),
}

impl FinishReason {
    /// Map the finish reason strings used by OpenAI-compatible and Gemini APIs.
    pub fn from_wire(reason: &str) -> Self {
        match reason {
            "stop" | "STOP" | "end_turn" => FinishReason::Stop,
            "length" | "MAX_TOKENS" => FinishReason::Length,
            "tool_calls" | "function_call" | "FUNCTION_CALL" => FinishReason::ToolCalls,
            "content_filter" | "SAFETY" | "RECITATION" => FinishReason::ContentFilter,
            other => FinishReason::Error(other.to_owned()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LLMErrorMetadata {
    pub provider: Option<String>,
    pub status: Option<u16>,
    pub code: Option<String>,
    pub request_id: Option<String>,
    pub retry_after: Option<String>,
    pub message: Option<String>,
}

impl LLMErrorMetadata {
    pub fn new(
        provider: impl Into<String>,
        status: Option<u16>,
        code: Option<String>,
        request_id: Option<String>,
        retry_after: Option<String>,
        message: Option<String>,
    ) -> Box<Self> {
        Box::new(Self {
            provider: Some(provider.into()),
            status,
            code,
            request_id,
            retry_after,
            message,
        })
    }

    /// `Retry-After` in whole seconds, when the provider sent a numeric value.
    pub fn retry_after_seconds(&self) -> Option<u64> {
        self.retry_after
            .as_deref()
            .and_then(|value| value.trim().parse::<u64>().ok())
    }
}

/// LLM error types with optional provider metadata
#[derive(Debug, thiserror::Error, Serialize, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LLMError {
    #[error("Authentication failed: {message}")]
    Authentication {
        message: String,
        metadata: Option<Box<LLMErrorMetadata>>,
    },
    #[error("Rate limit exceeded")]
    RateLimit {
        metadata: Option<Box<LLMErrorMetadata>>,
    },
    #[error("Invalid request: {message}")]
    InvalidRequest {
        message: String,
        metadata: Option<Box<LLMErrorMetadata>>,
    },
    #[error("Network error: {message}")]
    Network {
        message: String,
        metadata: Option<Box<LLMErrorMetadata>>,
    },
    #[error("Request timed out: {message}")]
    Timeout {
        message: String,
        metadata: Option<Box<LLMErrorMetadata>>,
    },
    #[error("Provider error: {message}")]
    Provider {
        message: String,
        metadata: Option<Box<LLMErrorMetadata>>,
    },
}

impl LLMError {
    pub fn metadata(&self) -> Option<&LLMErrorMetadata> {
        match self {
            LLMError::Authentication { metadata, .. }
            | LLMError::RateLimit { metadata }
            | LLMError::InvalidRequest { metadata, .. }
            | LLMError::Network { metadata, .. }
            | LLMError::Timeout { metadata, .. }
            | LLMError::Provider { metadata, .. } => metadata.as_deref(),
        }
    }

    /// HTTP status reported by the backend, if the error came from a response.
    pub fn status(&self) -> Option<u16> {
        self.metadata().and_then(|meta| meta.status)
    }

    /// Raw upstream body or message carried in metadata, falling back to the display text.
    pub fn upstream_message(&self) -> String {
        self.metadata()
            .and_then(|meta| meta.message.clone())
            .unwrap_or_else(|| self.to_string())
    }
}
