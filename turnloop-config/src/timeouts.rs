use std::time::Duration;

use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct TimeoutsConfig {
    /// Deadline (in seconds) for one backend request, including the response body.
    #[serde(default = "TimeoutsConfig::default_request_seconds")]
    pub request_seconds: u64,
    /// Deadline (in seconds) for establishing the backend connection.
    #[serde(default = "TimeoutsConfig::default_connect_seconds")]
    pub connect_seconds: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            request_seconds: Self::default_request_seconds(),
            connect_seconds: Self::default_connect_seconds(),
        }
    }
}

impl TimeoutsConfig {
    const fn default_request_seconds() -> u64 {
        120
    }

    const fn default_connect_seconds() -> u64 {
        10
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_seconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_seconds)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.request_seconds > 0,
            "timeouts.request_seconds must be greater than 0"
        );
        ensure!(
            self.connect_seconds > 0,
            "timeouts.connect_seconds must be greater than 0"
        );
        ensure!(
            self.connect_seconds <= self.request_seconds,
            "timeouts.connect_seconds must not exceed timeouts.request_seconds"
        );
        Ok(())
    }
}
