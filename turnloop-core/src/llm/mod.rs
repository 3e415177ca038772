//! Backend plumbing: provider-neutral types, the backend and envelope
//! tables, wire adapters, and the invoker that wraps a single exchange.

pub mod backends;
pub mod envelope;
pub mod factory;
pub mod invoker;
pub mod provider;
pub mod providers;

pub use backends::{BACKENDS, BackendSpec, ReasoningParam, WireFormat, builtin_backend};
pub use envelope::{
    BackendFamily, CallSignature, ENVELOPE_POLICIES, EnvelopePolicy, ReasoningEnvelope, policy_for,
};
pub use factory::{LLMFactory, ProviderConfig};
pub use invoker::{BackendInvoker, InvocationParams, InvokeError, RetryPolicy};
pub use provider::{
    FinishReason, LLMError, LLMProvider, LLMRequest, LLMResponse, Message, MessageRole, ToolCall,
    ToolDefinition, Usage,
};
