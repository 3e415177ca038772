use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::error_handling::{format_network_error, format_parse_error, handle_http_error};
use crate::llm::backends::BackendSpec;
use crate::llm::envelope::{CallSignature, ReasoningEnvelope};
use crate::llm::factory::ProviderConfig;
use crate::llm::provider::{
    FinishReason, LLMError, LLMProvider, LLMRequest, LLMResponse, Message, MessageRole, ToolCall,
    Usage,
};

pub struct GeminiProvider {
    spec: BackendSpec,
    api_key: Option<String>,
    http_client: HttpClient,
    base_url: String,
    model: String,
}

impl GeminiProvider {
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

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            model
        )
    }

    fn resolve_model<'a>(&'a self, request: &'a LLMRequest) -> &'a str {
        if request.model.trim().is_empty() {
            &self.model
        } else {
            &request.model
        }
    }

    pub(crate) fn build_payload<'a>(&self, request: &'a LLMRequest) -> GenerateContentRequest<'a> {
        let mut system_parts = Vec::new();
        let mut contents: Vec<Content<'a>> = Vec::new();

        for message in &request.messages {
            match message.role {
                MessageRole::System => system_parts.push(Part::text(&message.content)),
                MessageRole::User => contents.push(Content {
                    role: MessageRole::User.as_gemini_str(),
                    parts: vec![Part::text(&message.content)],
                }),
                MessageRole::Assistant => contents.push(Content {
                    role: MessageRole::Assistant.as_gemini_str(),
                    parts: assistant_parts(message),
                }),
                MessageRole::Tool => {
                    let part = function_response_part(message);
                    // Responses to one turn's calls travel together in a single content.
                    match contents.last_mut() {
                        Some(last) if last.parts.iter().all(|p| p.function_response.is_some()) => {
                            last.parts.push(part);
                        }
                        _ => contents.push(Content {
                            role: MessageRole::Tool.as_gemini_str(),
                            parts: vec![part],
                        }),
                    }
                }
            }
        }

        let tools = request
            .tools
            .as_deref()
            .filter(|tools| !tools.is_empty())
            .map(|tools| {
                vec![GeminiTool {
                    function_declarations: tools
                        .iter()
                        .map(|tool| FunctionDeclaration {
                            name: tool.function.name.clone(),
                            description: tool.function.description.clone(),
                            parameters: tool.function.parameters.clone(),
                        })
                        .collect(),
                }]
            });

        let thinking_config = request.reasoning_mode().then(|| ThinkingConfig {
            include_thoughts: true,
            thinking_level: request.reasoning_effort.clone(),
        });

        GenerateContentRequest {
            contents,
            system_instruction: (!system_parts.is_empty()).then(|| SystemInstruction {
                parts: system_parts,
            }),
            tools,
            generation_config: Some(GenerationConfig {
                temperature: request.temperature,
                top_p: request.top_p,
                max_output_tokens: request.max_tokens,
                thinking_config,
            }),
        }
    }

    pub(crate) fn parse_response(&self, body: &str) -> Result<LLMResponse, LLMError> {
        let response: GenerateContentResponse =
            serde_json::from_str(body).map_err(|err| format_parse_error(self.spec.id, &err))?;

        let Some(candidate) = response.candidates.into_iter().next() else {
            return Err(format_parse_error(self.spec.id, &"response contained no candidates"));
        };

        let mut text = String::new();
        let mut thoughts = String::new();
        let mut tool_calls = Vec::new();
        let mut signatures = Vec::new();

        for part in candidate.content.map(|content| content.parts).unwrap_or_default() {
            if let Some(call) = part.function_call {
                let id = call
                    .id
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
                let arguments = call
                    .args
                    .map(|args| args.to_string())
                    .unwrap_or_else(|| "{}".to_owned());
                if let Some(signature) = part.thought_signature {
                    signatures.push(CallSignature {
                        call_id: id.clone(),
                        signature,
                    });
                }
                tool_calls.push(ToolCall::function(id, call.name, arguments));
                continue;
            }

            if let Some(fragment) = part.text {
                if part.thought.unwrap_or(false) {
                    thoughts.push_str(&fragment);
                } else {
                    text.push_str(&fragment);
                }
            }
        }

        let finish_reason = if tool_calls.is_empty() {
            candidate
                .finish_reason
                .as_deref()
                .map(FinishReason::from_wire)
                .unwrap_or(FinishReason::Stop)
        } else {
            FinishReason::ToolCalls
        };

        Ok(LLMResponse {
            content: (!text.is_empty()).then_some(text),
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            model: response.model_version.unwrap_or_else(|| self.model.clone()),
            usage: response.usage_metadata.map(UsageMetadata::into_usage),
            finish_reason,
            reasoning: (!thoughts.trim().is_empty()).then_some(thoughts),
            envelope: (!signatures.is_empty()).then_some(ReasoningEnvelope::Signatures(signatures)),
            raw: Some(body.to_owned()),
        })
    }
}

fn assistant_parts(message: &Message) -> Vec<Part<'_>> {
    let mut parts = Vec::new();
    if !message.content.is_empty() {
        parts.push(Part::text(&message.content));
    }
    for call in message.get_tool_calls().unwrap_or_default() {
        let args = call.parsed_arguments().unwrap_or_else(|_| json!({}));
        parts.push(Part {
            function_call: Some(FunctionCallPart {
                name: &call.function.name,
                args,
            }),
            thought_signature: message
                .envelope
                .as_ref()
                .and_then(|envelope| envelope.signature_for(&call.id)),
            ..Part::default()
        });
    }
    if parts.is_empty() {
        parts.push(Part::text(""));
    }
    parts
}

fn function_response_part(message: &Message) -> Part<'_> {
    let name = message.origin_tool.as_deref().unwrap_or_default();
    Part {
        function_response: Some(FunctionResponsePart {
            name,
            response: json!({ "name": name, "content": message.content }),
        }),
        ..Part::default()
    }
}

#[async_trait]
impl LLMProvider for GeminiProvider {
    fn name(&self) -> &str {
        self.spec.id
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: LLMRequest) -> Result<LLMResponse, LLMError> {
        let payload = self.build_payload(&request);
        let url = self.endpoint(self.resolve_model(&request));

        let mut builder = self.http_client.post(url).json(&payload);
        if let Some(api_key) = &self.api_key {
            builder = builder.header("x-goog-api-key", api_key);
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
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<GeminiTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct SystemInstruction<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct Part<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCallPart<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_response: Option<FunctionResponsePart<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thought_signature: Option<&'a str>,
}

impl<'a> Part<'a> {
    fn text(text: &'a str) -> Self {
        Self {
            text: Some(text),
            ..Self::default()
        }
    }
}

#[derive(Debug, Serialize)]
struct FunctionCallPart<'a> {
    name: &'a str,
    args: Value,
}

#[derive(Debug, Serialize)]
struct FunctionResponsePart<'a> {
    name: &'a str,
    response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiTool {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct FunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking_config: Option<ThinkingConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    include_thoughts: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking_level: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thought: Option<bool>,
    #[serde(default)]
    function_call: Option<ResponseFunctionCall>,
    #[serde(default)]
    thought_signature: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseFunctionCall {
    name: String,
    #[serde(default)]
    args: Option<Value>,
    #[serde(default)]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
    #[serde(default)]
    cached_content_token_count: Option<u32>,
    #[serde(default)]
    thoughts_token_count: Option<u32>,
}

impl UsageMetadata {
    fn into_usage(self) -> Usage {
        Usage {
            prompt_tokens: self.prompt_token_count,
            completion_tokens: self.candidates_token_count,
            total_tokens: self.total_token_count,
            cached_prompt_tokens: self.cached_content_token_count,
            reasoning_tokens: self.thoughts_token_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::backends::builtin_backend;
    use pretty_assertions::assert_eq;

    fn provider() -> GeminiProvider {
        let spec = *builtin_backend("gemini").expect("gemini registered");
        GeminiProvider::from_config(spec, ProviderConfig::default())
    }

    const PARALLEL_CALLS: &str = r#"{
        "candidates": [{
            "content": {"role": "model", "parts": [
                {"text": "Planning the lookups", "thought": true},
                {"functionCall": {"name": "web_search", "args": {"query": "a"}}, "thoughtSignature": "CiQB/sig+first=="},
                {"functionCall": {"name": "read_file", "args": {"path": "b"}}}
            ]},
            "finishReason": "STOP"
        }],
        "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 4, "totalTokenCount": 14, "thoughtsTokenCount": 2},
        "modelVersion": "gemini-3-pro-preview"
    }"#;

    #[test]
    fn captures_signatures_per_call_in_order() {
        let response = provider().parse_response(PARALLEL_CALLS).expect("parses");
        let calls = response.tool_calls.clone().expect("tool calls");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].function.arguments, r#"{"query":"a"}"#);
        assert_eq!(response.finish_reason, FinishReason::ToolCalls);
        assert_eq!(response.reasoning.as_deref(), Some("Planning the lookups"));
        assert_eq!(response.content, None);
        assert_eq!(
            response.usage.as_ref().and_then(|usage| usage.reasoning_tokens),
            Some(2)
        );

        let envelope = response.envelope.expect("signatures captured");
        assert_eq!(envelope.signature_for(&calls[0].id), Some("CiQB/sig+first=="));
        assert_eq!(envelope.signature_for(&calls[1].id), None);
    }

    #[test]
    fn echoes_signatures_on_matching_function_calls() {
        let provider = provider();
        let response = provider.parse_response(PARALLEL_CALLS).expect("parses");
        let calls = response.tool_calls.clone().expect("tool calls");

        let request = LLMRequest {
            messages: vec![
                Message::system("be brief".into()),
                Message::user("question".into()),
                Message::assistant_with_tools(String::new(), calls.clone())
                    .with_envelope(response.envelope),
                Message::tool_response(calls[0].id.clone(), "web_search".into(), "r1".into()),
                Message::tool_response(calls[1].id.clone(), "read_file".into(), "r2".into()),
            ],
            ..Default::default()
        };

        let body = serde_json::to_value(provider.build_payload(&request)).expect("serializes");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be brief");
        let contents = body["contents"].as_array().expect("contents");
        assert_eq!(contents.len(), 3);

        let model_parts = &contents[1]["parts"];
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(model_parts[0]["thoughtSignature"], "CiQB/sig+first==");
        assert!(model_parts[1].get("thoughtSignature").is_none());

        let responses = contents[2]["parts"].as_array().expect("parts");
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[1]["functionResponse"]["name"], "read_file");
    }

    #[test]
    fn thinking_config_only_in_reasoning_mode() {
        let provider = provider();
        let plain = LLMRequest::default();
        let body = serde_json::to_value(provider.build_payload(&plain)).expect("serializes");
        assert!(body["generationConfig"].get("thinkingConfig").is_none());

        let reasoning = LLMRequest {
            reasoning_effort: Some("high".into()),
            temperature: Some(0.2),
            ..Default::default()
        };
        let body = serde_json::to_value(provider.build_payload(&reasoning)).expect("serializes");
        assert_eq!(
            body["generationConfig"]["thinkingConfig"]["thinkingLevel"],
            "high"
        );
        assert!(body["generationConfig"]["temperature"].is_number());
    }

    #[test]
    fn config_overrides_shape_the_endpoint() {
        let spec = *builtin_backend("gemini").expect("gemini registered");
        let provider = GeminiProvider::from_config(
            spec,
            ProviderConfig {
                api_key: Some("g-key".into()),
                base_url: Some("http://127.0.0.1:9000/".into()),
                model: Some("gemini-2.5-flash".into()),
                ..Default::default()
            },
        );
        assert_eq!(
            provider.endpoint("gemini-2.5-flash"),
            "http://127.0.0.1:9000/models/gemini-2.5-flash:generateContent"
        );
        assert_eq!(provider.default_model(), "gemini-2.5-flash");
        assert_eq!(provider.api_key.as_deref(), Some("g-key"));
    }
}
