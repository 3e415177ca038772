use std::time::Duration;

use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// A tool backed by an external command, declared under `[[tools]]`.
///
/// The command receives the model's JSON arguments on stdin and its stdout
/// becomes the tool output.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ToolDefinitionConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON schema for the tool arguments.
    #[serde(default = "ToolDefinitionConfig::default_parameters")]
    pub parameters: Value,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "ToolDefinitionConfig::default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl ToolDefinitionConfig {
    fn default_parameters() -> Value {
        json!({ "type": "object", "properties": {} })
    }

    const fn default_timeout_seconds() -> u64 {
        30
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.name.trim().is_empty(), "tools[].name must not be empty");
        ensure!(
            !self.command.trim().is_empty(),
            "tools.{}.command must not be empty",
            self.name
        );
        ensure!(
            self.timeout_seconds > 0,
            "tools.{}.timeout_seconds must be greater than 0",
            self.name
        );
        ensure!(
            self.parameters.is_object(),
            "tools.{}.parameters must be a JSON schema object",
            self.name
        );
        Ok(())
    }
}
