//! Chat-completions adapter shared by every OpenAI-compatible backend.
//!
//! Request and response bodies go through typed structs rather than
//! `serde_json::Value` so that reasoning blocks stay [`RawValue`]s end to end
//! and are written back exactly as they were received.

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use super::error_handling::{format_network_error, format_parse_error, handle_http_error};
use crate::llm::backends::{BackendSpec, ReasoningParam};
use crate::llm::envelope::{EnvelopeShape, ReasoningEnvelope};
use crate::llm::factory::ProviderConfig;
use crate::llm::provider::{
    FinishReason, LLMError, LLMProvider, LLMRequest, LLMResponse, Message, ToolCall,
    ToolDefinition, Usage,
};

pub struct OpenAiCompatProvider {
    spec: BackendSpec,
    api_key: Option<String>,
    http_client: HttpClient,
    base_url: String,
    model: String,
}

impl OpenAiCompatProvider {
    pub fn from_config(spec: BackendSpec, config: ProviderConfig) -> Self {
        let http_client = config.http_client();
        let base_url = config
            .base_url
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| spec.default_base_url.to_owned());
        let model = config
            .model
            .filter(|model| !model.trim().is_empty())
            .unwrap_or_else(|| spec.default_model.to_owned());

        Self {
            spec,
            api_key: config.api_key.filter(|key| !key.is_empty()),
            http_client,
            base_url,
            model,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    pub(crate) fn build_payload<'a>(&'a self, request: &'a LLMRequest) -> ChatRequest<'a> {
        let model = if request.model.trim().is_empty() {
            self.model.as_str()
        } else {
            request.model.as_str()
        };

        let reasoning = request
            .reasoning_effort
            .as_deref()
            .filter(|_| request.reasoning_mode());
        let tools = request
            .tools
            .as_deref()
            .filter(|tools| !tools.is_empty())
            .map(Vec::as_slice);

        let mut payload = ChatRequest {
            model,
            messages: request.messages.iter().map(WireMessage::from_message).collect(),
            tools,
            tool_choice: tools.map(|_| "auto"),
            parallel_tool_calls: tools.and(request.parallel_tool_calls),
            temperature: request.temperature,
            top_p: request.top_p,
            presence_penalty: request.presence_penalty,
            frequency_penalty: request.frequency_penalty,
            max_tokens: request.max_tokens,
            thinking: None,
            reasoning: None,
            reasoning_effort: None,
            stream: false,
        };

        if let Some(effort) = reasoning {
            match self.spec.reasoning_param {
                ReasoningParam::ThinkingToggle => {
                    payload.thinking = Some(ThinkingToggle { kind: "enabled" });
                }
                ReasoningParam::ReasoningObject => {
                    payload.reasoning = Some(ReasoningObject { effort });
                }
                ReasoningParam::ReasoningEffortField | ReasoningParam::GeminiThinkingConfig => {
                    payload.reasoning_effort = Some(effort);
                }
            }
        }

        payload
    }

    /// Normalize a chat-completions body, copying reasoning state verbatim.
    pub(crate) fn parse_response(&self, body: &str) -> Result<LLMResponse, LLMError> {
        let response: ChatResponse =
            serde_json::from_str(body).map_err(|err| format_parse_error(self.spec.id, &err))?;

        let Some(choice) = response.choices.into_iter().next() else {
            return Err(format_parse_error(self.spec.id, &"response contained no choices"));
        };
        let message = choice.message;

        let tool_calls: Vec<ToolCall> = message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| {
                let id = call
                    .id
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
                ToolCall::function(
                    id,
                    call.function.name,
                    call.function.arguments.unwrap_or_default(),
                )
            })
            .collect();

        let envelope = match self.spec.envelope_policy().shape {
            EnvelopeShape::MirroredText => message
                .reasoning_content
                .clone()
                .map(ReasoningEnvelope::Text),
            EnvelopeShape::ReasoningBlocks => message
                .reasoning_details
                .filter(|blocks| !blocks.is_empty())
                .map(ReasoningEnvelope::Blocks),
            EnvelopeShape::CallSignatures | EnvelopeShape::None => None,
        };

        let finish_reason = choice
            .finish_reason
            .as_deref()
            .map(FinishReason::from_wire)
            .unwrap_or(FinishReason::Stop);

        Ok(LLMResponse {
            content: message.content.filter(|text| !text.is_empty()),
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            model: response.model.unwrap_or_else(|| self.model.clone()),
            usage: response.usage.map(WireUsage::into_usage),
            finish_reason,
            reasoning: message
                .reasoning_content
                .or(message.reasoning)
                .filter(|text| !text.trim().is_empty()),
            envelope,
            raw: Some(body.to_owned()),
        })
    }
}

#[async_trait]
impl LLMProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        self.spec.id
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: LLMRequest) -> Result<LLMResponse, LLMError> {
        let payload = self.build_payload(&request);

        let mut builder = self.http_client.post(self.endpoint()).json(&payload);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| format_network_error(self.spec.id, &err))?;
        let response = handle_http_error(response, self.spec.id).await?;
        let body = response
            .text()
            .await
            .map_err(|err| format_network_error(self.spec.id, &err))?;

        self.parse_response(&body)
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolDefinition]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parallel_tool_calls: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<ThinkingToggle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning: Option<ReasoningObject<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<&'a str>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ThinkingToggle {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ReasoningObject<'a> {
    effort: &'a str,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<&'a [ToolCall]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_details: Option<&'a [Box<RawValue>]>,
}

impl<'a> WireMessage<'a> {
    fn from_message(message: &'a Message) -> Self {
        let tool_calls = message.get_tool_calls().filter(|calls| !calls.is_empty());
        let content = if tool_calls.is_some() && message.content.is_empty() {
            None
        } else {
            Some(message.content.as_str())
        };

        let (reasoning_content, reasoning_details) = match &message.envelope {
            Some(ReasoningEnvelope::Text(text)) => (Some(text.as_str()), None),
            Some(ReasoningEnvelope::Blocks(blocks)) => (None, Some(blocks.as_slice())),
            Some(ReasoningEnvelope::Signatures(_)) | None => (None, None),
        };

        Self {
            role: message.role.as_openai_str(),
            content,
            tool_calls,
            tool_call_id: message.tool_call_id.as_deref(),
            reasoning_content,
            reasoning_details,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ResponseToolCall>>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    reasoning_details: Option<Vec<Box<RawValue>>>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    #[serde(default)]
    id: Option<String>,
    function: ResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ResponseFunction {
    name: String,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
    #[serde(default)]
    prompt_tokens_details: Option<PromptTokensDetails>,
    #[serde(default)]
    completion_tokens_details: Option<CompletionTokensDetails>,
    /// DeepSeek reports cache hits at the top level
    #[serde(default)]
    prompt_cache_hit_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct PromptTokensDetails {
    #[serde(default)]
    cached_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct CompletionTokensDetails {
    #[serde(default)]
    reasoning_tokens: Option<u32>,
}

impl WireUsage {
    fn into_usage(self) -> Usage {
        Usage {
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            total_tokens: self.total_tokens,
            cached_prompt_tokens: self
                .prompt_tokens_details
                .and_then(|details| details.cached_tokens)
                .or(self.prompt_cache_hit_tokens),
            reasoning_tokens: self
                .completion_tokens_details
                .and_then(|details| details.reasoning_tokens),
        }
    }
}
