//! Session monitor configuration.

use field_auth::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Session monitor timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Seconds between periodic session checks.
    pub check_interval_secs: u64,

    /// Refresh once the access token has less than this many seconds left.
    pub refresh_threshold_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 60,
            refresh_threshold_secs: 300,
        }
    }
}

impl MonitorConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `FIELD_SESSION_CHECK_INTERVAL_SECS`: check period (default: 60)
    /// - `FIELD_SESSION_REFRESH_THRESHOLD_SECS`: proactive refresh window (default: 300)
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            check_interval_secs: std::env::var("FIELD_SESSION_CHECK_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default.check_interval_secs),
            refresh_threshold_secs: std::env::var("FIELD_SESSION_REFRESH_THRESHOLD_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default.refresh_threshold_secs),
        }
    }

    /// Get the check period as a Duration.
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// Get the refresh window as a chrono Duration, comparable with token lifetimes.
    pub fn refresh_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.refresh_threshold_secs.min(i64::MAX as u64) as i64)
    }

    /// Validate the timing values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.check_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "check_interval_secs".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}
