//! Controller configuration.

use std::time::Duration;

use thiserror::Error;

/// Errors loading configuration from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Runtime configuration for a replication controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Hostname of the process running the controller; included in alerts.
    pub hostname: String,

    /// Interval between node-transfer readiness polls.
    pub transfer_poll_interval: Duration,

    /// Capacity of the error channel returned by `watch_desires`. The
    /// reconciliation loop blocks once this fills, so the caller must keep
    /// consuming.
    pub error_channel_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            hostname: "unknown-host".to_string(),
            transfer_poll_interval: Duration::from_secs(5),
            error_channel_capacity: 1,
        }
    }
}

impl ControllerConfig {
    /// Loads configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let hostname = std::env::var("HERD_HOSTNAME")
            .or_else(|_| std::env::var("HOSTNAME"))
            .unwrap_or(defaults.hostname);

        let transfer_poll_interval = match std::env::var("HERD_TRANSFER_POLL_INTERVAL_MS") {
            Ok(raw) => {
                let millis: u64 = raw.parse().map_err(|_| ConfigError::Invalid {
                    var: "HERD_TRANSFER_POLL_INTERVAL_MS",
                    value: raw,
                    reason: "expected a whole number of milliseconds".to_string(),
                })?;
                Duration::from_millis(millis)
            }
            Err(_) => defaults.transfer_poll_interval,
        };

        Ok(Self {
            hostname,
            transfer_poll_interval,
            error_channel_capacity: defaults.error_channel_capacity,
        })
    }
}
