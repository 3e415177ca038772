//! Shared contracts reused across the turnloop crates: the provider-neutral
//! LLM value types, the canonical error taxonomy that drives retry decisions,
//! and small HTTP client builders.

pub mod error_category;
pub mod http;
pub mod llm;

pub use error_category::{BackoffStrategy, ErrorCategory, classify_error_message};
pub use llm::{FinishReason, LLMError, LLMErrorMetadata, Usage};
