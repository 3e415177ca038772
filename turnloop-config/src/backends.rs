use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};

/// Per-backend overrides, keyed by backend id under `[backends.<id>]`.
///
/// Every field is optional; unset fields fall back to the built-in backend table.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BackendConfig {
    pub model: Option<String>,
    pub base_url: Option<String>,
    /// Name of the environment variable holding the API key.
    pub api_key_env: Option<String>,
    /// Requested reasoning effort (`low`, `medium`, `high`). Setting it enables reasoning mode.
    pub reasoning_effort: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl BackendConfig {
    pub const REASONING_EFFORTS: [&'static str; 3] = ["low", "medium", "high"];

    pub fn reasoning_enabled(&self) -> bool {
        self.reasoning_effort
            .as_deref()
            .is_some_and(|effort| !effort.trim().is_empty())
    }

    pub fn validate(&self, id: &str) -> Result<()> {
        if let Some(effort) = self.reasoning_effort.as_deref() {
            ensure!(
                Self::REASONING_EFFORTS.contains(&effort),
                "backends.{id}.reasoning_effort must be one of {:?}, got '{effort}'",
                Self::REASONING_EFFORTS
            );
        }
        if let Some(temperature) = self.temperature {
            ensure!(
                (0.0..=2.0).contains(&temperature),
                "backends.{id}.temperature must be between 0.0 and 2.0"
            );
        }
        if let Some(top_p) = self.top_p {
            ensure!(
                (0.0..=1.0).contains(&top_p),
                "backends.{id}.top_p must be between 0.0 and 1.0"
            );
        }
        for (name, penalty) in [
            ("presence_penalty", self.presence_penalty),
            ("frequency_penalty", self.frequency_penalty),
        ] {
            if let Some(penalty) = penalty {
                ensure!(
                    (-2.0..=2.0).contains(&penalty),
                    "backends.{id}.{name} must be between -2.0 and 2.0"
                );
            }
        }
        if let Some(max_tokens) = self.max_tokens {
            ensure!(max_tokens > 0, "backends.{id}.max_tokens must be greater than 0");
        }
        Ok(())
    }
}
