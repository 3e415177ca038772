//! Provider-neutral request, response and transcript types.

mod message;
mod provider_trait;
mod request;
mod response;
mod tool;

pub use message::{Message, MessageRole};
pub use provider_trait::{LLMError, LLMErrorMetadata, LLMProvider};
pub use request::{DecodingParam, LLMRequest};
pub use response::{FinishReason, LLMResponse, Usage};
pub use tool::{FunctionCall, FunctionDefinition, ToolCall, ToolDefinition};
