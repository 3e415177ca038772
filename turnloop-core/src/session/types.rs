use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use turnloop_commons::{ErrorCategory, Usage};
use turnloop_config::{BackendConfig, LoopConfig};

use crate::llm::invoker::RetryPolicy;
use crate::llm::provider::Message;

/// A piece of caller-supplied context rendered into the opening user turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextChunk {
    pub source: String,
    pub content: String,
}

impl ContextChunk {
    pub fn new(source: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            content: content.into(),
        }
    }
}

/// Everything one session needs besides the tool gateway.
#[derive(Debug, Clone, Default)]
pub struct SessionRequest {
    pub backend_id: String,
    pub user_query: String,
    pub context_chunks: Vec<ContextChunk>,
    /// Prior turns, already compacted. Never modified by the session.
    pub history: Vec<Message>,
    pub thread_id: Option<String>,
}

impl SessionRequest {
    pub fn new(backend_id: impl Into<String>, user_query: impl Into<String>) -> Self {
        Self {
            backend_id: backend_id.into(),
            user_query: user_query.into(),
            ..Default::default()
        }
    }

    pub fn with_context(mut self, chunks: Vec<ContextChunk>) -> Self {
        self.context_chunks = chunks;
        self
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionOutcome {
    /// The model answered without requesting tools.
    Completed,
    /// The iteration ceiling was reached and a tools-free answer was forced.
    ForcedFinalization,
    /// A backend call failed for good.
    BackendFailure { category: ErrorCategory },
    Cancelled,
}

/// One tool request and what became of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub iteration: u32,
    pub call_id: String,
    pub tool_name: String,
    /// Arguments as the model sent them
    pub arguments: String,
    pub output: String,
    pub success: bool,
    /// Refused by the budget; the gateway was not called.
    pub denied: bool,
    pub duration_ms: u64,
    /// Reasoning or text that preceded the batch. Set on the first call of a batch only.
    pub attributed_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionResult {
    pub analysis: String,
    pub instruction: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub raw_final_text: String,
    pub outcome: SessionOutcome,
    /// Tool-offering iterations performed. A forced-finalization call is not counted.
    pub iterations: u32,
    pub usage: Usage,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("unknown backend '{0}'")]
    UnknownBackend(String),
}

/// Resolved per-session settings, passed explicitly into every session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub max_iterations: u32,
    pub tool_limits: BTreeMap<String, u32>,
    pub parallel_tool_calls: bool,
    pub system_prompt: String,
    pub finalization_prompt: String,
    pub retry: RetryPolicy,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub backends: BTreeMap<String, BackendConfig>,
}

impl SessionSettings {
    pub fn from_config(config: &LoopConfig) -> Self {
        Self {
            max_iterations: config.session.max_iterations.max(1),
            tool_limits: config.budget.tool_limits.clone(),
            parallel_tool_calls: config.session.parallel_tool_calls,
            system_prompt: config.session.system_prompt.clone(),
            finalization_prompt: config.session.finalization_prompt.clone(),
            retry: RetryPolicy::from(&config.retry),
            connect_timeout: config.timeouts.connect_timeout(),
            request_timeout: config.timeouts.request_timeout(),
            backends: config.backends.clone(),
        }
    }

    pub fn backend(&self, id: &str) -> BackendConfig {
        self.backends.get(id).cloned().unwrap_or_default()
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&LoopConfig::default())
    }
}
