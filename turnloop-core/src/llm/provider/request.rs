use std::sync::Arc;

use super::{Message, ToolDefinition};

/// Provider-neutral request for one backend exchange
#[derive(Debug, Clone, Default)]
pub struct LLMRequest {
    /// Full outgoing transcript, system turn included
    pub messages: Vec<Message>,
    pub tools: Option<Arc<Vec<ToolDefinition>>>,
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub frequency_penalty: Option<f32>,
    /// Reasoning effort (`low`, `medium`, `high`). Presence enables reasoning mode.
    pub reasoning_effort: Option<String>,
    pub parallel_tool_calls: Option<bool>,
}

/// Ordinary decoding parameters that some backends reject in reasoning mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecodingParam {
    Temperature,
    TopP,
    PresencePenalty,
    FrequencyPenalty,
}

impl DecodingParam {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecodingParam::Temperature => "temperature",
            DecodingParam::TopP => "top_p",
            DecodingParam::PresencePenalty => "presence_penalty",
            DecodingParam::FrequencyPenalty => "frequency_penalty",
        }
    }
}

impl LLMRequest {
    pub fn reasoning_mode(&self) -> bool {
        self.reasoning_effort
            .as_deref()
            .is_some_and(|effort| !effort.trim().is_empty())
    }

    /// Clear `param`, returning whether it had been set.
    pub fn drop_param(&mut self, param: DecodingParam) -> bool {
        let slot = match param {
            DecodingParam::Temperature => &mut self.temperature,
            DecodingParam::TopP => &mut self.top_p,
            DecodingParam::PresencePenalty => &mut self.presence_penalty,
            DecodingParam::FrequencyPenalty => &mut self.frequency_penalty,
        };
        slot.take().is_some()
    }
}
