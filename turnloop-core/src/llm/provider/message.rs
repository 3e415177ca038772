use serde::{Deserialize, Serialize};

use super::ToolCall;
use crate::llm::envelope::ReasoningEnvelope;

/// One turn of a session transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Message {
    #[serde(default)]
    pub role: MessageRole,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Name of the tool that produced a tool-result turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_tool: Option<String>,
    /// Whether the tool call behind a tool-result turn succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    /// Reasoning state to echo back on later requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub envelope: Option<ReasoningEnvelope>,
}

impl Message {
    pub fn system(content: String) -> Self {
        Self {
            role: MessageRole::System,
            content,
            ..Default::default()
        }
    }

    pub fn user(content: String) -> Self {
        Self {
            role: MessageRole::User,
            content,
            ..Default::default()
        }
    }

    pub fn assistant(content: String) -> Self {
        Self {
            role: MessageRole::Assistant,
            content,
            ..Default::default()
        }
    }

    pub fn assistant_with_tools(content: String, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content,
            tool_calls: Some(tool_calls),
            ..Default::default()
        }
    }

    /// Tool result paired to `tool_call_id`
    pub fn tool_response(tool_call_id: String, tool_name: String, content: String) -> Self {
        Self {
            role: MessageRole::Tool,
            content,
            tool_call_id: Some(tool_call_id),
            origin_tool: Some(tool_name),
            ..Default::default()
        }
    }

    pub fn with_success(mut self, success: bool) -> Self {
        self.success = Some(success);
        self
    }

    pub fn with_envelope(mut self, envelope: Option<ReasoningEnvelope>) -> Self {
        self.envelope = envelope;
        self
    }

    #[inline]
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls
            .as_ref()
            .is_some_and(|calls| !calls.is_empty())
    }

    pub fn get_tool_calls(&self) -> Option<&[ToolCall]> {
        self.tool_calls.as_deref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    #[default]
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn as_openai_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        }
    }

    /// Gemini has no system or tool roles in `contents`; function responses travel as user turns.
    pub fn as_gemini_str(&self) -> &'static str {
        match self {
            MessageRole::Assistant => "model",
            MessageRole::System | MessageRole::User | MessageRole::Tool => "user",
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_openai_str())
    }
}
