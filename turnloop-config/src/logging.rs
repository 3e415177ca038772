use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Default level for the turnloop targets when `RUST_LOG` is unset.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

impl LoggingConfig {
    const LEVELS: [&'static str; 5] = ["trace", "debug", "info", "warn", "error"];

    fn default_level() -> String {
        "info".to_owned()
    }

    /// Filter directive applied to the project's own targets.
    pub fn filter_directive(&self) -> String {
        let level = self.level.to_ascii_lowercase();
        format!("turnloop={level},turnloop_core={level}")
    }

    pub fn validate(&self) -> Result<()> {
        let level = self.level.to_ascii_lowercase();
        ensure!(
            Self::LEVELS.contains(&level.as_str()),
            "logging.level must be one of {:?}, got '{}'",
            Self::LEVELS,
            self.level
        );
        Ok(())
    }
}
