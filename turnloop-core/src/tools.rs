//! The boundary to whatever actually runs tools.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::llm::provider::ToolDefinition;

/// Output prefix that marks a tool result as failed regardless of the success flag.
pub const ERROR_MARKER: &str = "Error:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub output: String,
    pub success: bool,
}

impl ToolOutput {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            success: true,
        }
    }

    pub fn failure(message: impl AsRef<str>) -> Self {
        Self {
            output: format!("{ERROR_MARKER} {}", message.as_ref()),
            success: false,
        }
    }

    /// Success as the session records it: the flag must be set and the
    /// output must not start with [`ERROR_MARKER`].
    pub fn effective_success(&self) -> bool {
        self.success && !self.output.trim_start().starts_with(ERROR_MARKER)
    }
}

/// Executes named tools on behalf of a session.
///
/// Implementations must tolerate concurrent `execute` calls. A returned `Err`
/// is reported to the model as a failed tool result; it never ends the session.
#[async_trait]
pub trait ToolGateway: Send + Sync {
    /// Tools this gateway can run, offered to the model before budget filtering.
    fn definitions(&self) -> Vec<ToolDefinition>;

    async fn execute(&self, tool_name: &str, arguments: Value) -> Result<ToolOutput>;
}
