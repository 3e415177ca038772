//! Collaborators consumed at session start and fed at session end.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use turnloop_commons::Usage;
use uuid::Uuid;

use crate::llm::provider::Message;
use crate::session::{SessionOutcome, ToolCallRecord};

/// Supplies prior turns for a thread, already compacted for the model.
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    async fn get_history_for_llm(&self, thread_id: &str, current_query: &str)
    -> Result<Vec<Message>>;
}

/// Audit record handed to a [`TraceSink`] once a session ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTrace {
    pub session_id: Uuid,
    pub thread_id: Option<String>,
    pub backend: String,
    pub user_query: String,
    pub outcome: SessionOutcome,
    pub iterations: u32,
    pub tool_calls: Vec<ToolCallRecord>,
    pub final_text: String,
    pub usage: Usage,
}

/// Receives session traces. Called in the background; failures are only logged.
#[async_trait]
pub trait TraceSink: Send + Sync {
    async fn record_session(&self, trace: SessionTrace) -> Result<()>;
}
