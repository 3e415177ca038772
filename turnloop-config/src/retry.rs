use std::time::Duration;

use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};

/// Backoff settings for retryable backend failures
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts per backend call, including the first one.
    #[serde(default = "RetryConfig::default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "RetryConfig::default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "RetryConfig::default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: Self::default_max_attempts(),
            base_delay_ms: Self::default_base_delay_ms(),
            max_delay_ms: Self::default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    const fn default_max_attempts() -> u32 {
        3
    }

    const fn default_base_delay_ms() -> u64 {
        500
    }

    const fn default_max_delay_ms() -> u64 {
        10_000
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.max_attempts >= 1,
            "retry.max_attempts must be at least 1"
        );
        ensure!(
            self.base_delay_ms <= self.max_delay_ms,
            "retry.base_delay_ms ({}) must not exceed retry.max_delay_ms ({})",
            self.base_delay_ms,
            self.max_delay_ms
        );
        Ok(())
    }
}
