use async_trait::async_trait;

use super::{LLMRequest, LLMResponse};
pub use turnloop_commons::llm::{LLMError, LLMErrorMetadata};

/// Wire adapter for one backend
///
/// `generate` performs a single request/response exchange. Envelope
/// preparation, parameter compatibility and retries are applied by the
/// invoker before and around it.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Provider name (e.g., "gemini", "openrouter")
    fn name(&self) -> &str;

    /// Model used when the request leaves `model` blank
    fn default_model(&self) -> &str;

    async fn generate(&self, request: LLMRequest) -> Result<LLMResponse, LLMError>;
}
