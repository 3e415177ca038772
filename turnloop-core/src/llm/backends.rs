//! Built-in backend table.
//!
//! Adding a backend that speaks an existing wire format is a new row here;
//! the invoker and session loop read everything they need from [`BackendSpec`].

use super::envelope::{BackendFamily, EnvelopePolicy, policy_for};
use super::provider::DecodingParam;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// `POST {base}/chat/completions`
    OpenAiChat,
    /// `POST {base}/models/{model}:generateContent`
    GeminiGenerateContent,
}

/// How a backend is asked to run in reasoning mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasoningParam {
    /// `"thinking": {"type": "enabled"}`
    ThinkingToggle,
    /// `"reasoning": {"effort": ...}`
    ReasoningObject,
    /// `"reasoning_effort": ...`
    ReasoningEffortField,
    /// `generationConfig.thinkingConfig`
    GeminiThinkingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendSpec {
    pub id: &'static str,
    pub family: BackendFamily,
    pub wire: WireFormat,
    pub default_base_url: &'static str,
    pub default_model: &'static str,
    pub api_key_env: &'static str,
    /// Parameters removed from the request while reasoning mode is active
    pub dropped_in_reasoning: &'static [DecodingParam],
    pub reasoning_param: ReasoningParam,
}

impl BackendSpec {
    pub fn envelope_policy(&self) -> &'static EnvelopePolicy {
        policy_for(self.family)
    }
}

pub const BACKENDS: [BackendSpec; 5] = [
    BackendSpec {
        id: "deepseek",
        family: BackendFamily::A,
        wire: WireFormat::OpenAiChat,
        default_base_url: "https://api.deepseek.com/v1",
        default_model: "deepseek-reasoner",
        api_key_env: "DEEPSEEK_API_KEY",
        dropped_in_reasoning: &[
            DecodingParam::Temperature,
            DecodingParam::TopP,
            DecodingParam::PresencePenalty,
            DecodingParam::FrequencyPenalty,
        ],
        reasoning_param: ReasoningParam::ThinkingToggle,
    },
    BackendSpec {
        id: "moonshot",
        family: BackendFamily::A,
        wire: WireFormat::OpenAiChat,
        default_base_url: "https://api.moonshot.ai/v1",
        default_model: "kimi-k2-thinking",
        api_key_env: "MOONSHOT_API_KEY",
        dropped_in_reasoning: &[DecodingParam::Temperature, DecodingParam::TopP],
        reasoning_param: ReasoningParam::ThinkingToggle,
    },
    BackendSpec {
        id: "gemini",
        family: BackendFamily::B,
        wire: WireFormat::GeminiGenerateContent,
        default_base_url: "https://generativelanguage.googleapis.com/v1beta",
        default_model: "gemini-3-pro-preview",
        api_key_env: "GEMINI_API_KEY",
        dropped_in_reasoning: &[],
        reasoning_param: ReasoningParam::GeminiThinkingConfig,
    },
    BackendSpec {
        id: "openrouter",
        family: BackendFamily::C,
        wire: WireFormat::OpenAiChat,
        default_base_url: "https://openrouter.ai/api/v1",
        default_model: "anthropic/claude-sonnet-4.5",
        api_key_env: "OPENROUTER_API_KEY",
        dropped_in_reasoning: &[DecodingParam::Temperature, DecodingParam::TopP],
        reasoning_param: ReasoningParam::ReasoningObject,
    },
    BackendSpec {
        id: "openai",
        family: BackendFamily::D,
        wire: WireFormat::OpenAiChat,
        default_base_url: "https://api.openai.com/v1",
        default_model: "gpt-5",
        api_key_env: "OPENAI_API_KEY",
        dropped_in_reasoning: &[DecodingParam::Temperature, DecodingParam::TopP],
        reasoning_param: ReasoningParam::ReasoningEffortField,
    },
];

pub fn builtin_backend(id: &str) -> Option<&'static BackendSpec> {
    let id = id.trim();
    BACKENDS
        .iter()
        .find(|spec| spec.id.eq_ignore_ascii_case(id))
}
