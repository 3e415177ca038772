pub use turnloop_commons::llm::{FinishReason, Usage};

use super::ToolCall;
use crate::llm::envelope::ReasoningEnvelope;

/// Normalized result of one backend exchange
#[derive(Debug, Clone)]
pub struct LLMResponse {
    pub content: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub model: String,
    pub usage: Option<Usage>,
    pub finish_reason: FinishReason,
    /// Human-readable reasoning, when the backend surfaces it
    pub reasoning: Option<String>,
    /// Reasoning state to echo on the next request, copied verbatim
    pub envelope: Option<ReasoningEnvelope>,
    /// Response body as received
    pub raw: Option<String>,
}

impl LLMResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: None,
            model: String::new(),
            usage: None,
            finish_reason: FinishReason::Stop,
            reasoning: None,
            envelope: None,
            raw: None,
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls
            .as_ref()
            .is_some_and(|calls| !calls.is_empty())
    }

    pub fn content_text(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}
