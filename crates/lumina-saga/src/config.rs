//! Engine tuning and service environment configuration.

use std::time::Duration;
use thiserror::Error;

/// Tuning knobs for the engine's poll loop and step execution.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Key under which the engine's poll watermark is persisted.
    pub offset_name: String,
    /// Event log poll cadence.
    pub poll_interval: Duration,
    /// Maximum attempts per step (forward or compensating) before it is
    /// marked failed.
    pub max_retries: u32,
    /// Attempt k sleeps `backoff_base * 2^(k-1)` before it runs.
    pub backoff_base: Duration,
    /// Deadline for one collaborator call.
    pub step_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            offset_name: "saga-engine".to_string(),
            poll_interval: Duration::from_secs(3),
            max_retries: 3,
            backoff_base: Duration::from_secs(1),
            step_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    Missing(&'static str),

    #[error("environment variable {0} is not a valid value")]
    Invalid(&'static str),
}

/// Service-level settings from the environment. Peer URLs are required:
/// the saga cannot coordinate collaborators it cannot reach.
#[derive(Debug, Clone)]
pub struct SagaServiceConfig {
    pub port: u16,
    pub database_path: String,
    pub eventlog_url: String,
    pub media_command_url: String,
    pub album_url: String,
    pub notification_url: String,
}

impl SagaServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        fn required(name: &'static str) -> Result<String, ConfigError> {
            std::env::var(name).map_err(|_| ConfigError::Missing(name))
        }

        let port = match std::env::var("PORT") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid("PORT"))?,
            Err(_) => 8085,
        };
        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "data/saga.db".to_string());

        Ok(Self {
            port,
            database_path,
            eventlog_url: required("EVENTLOG_URL")?,
            media_command_url: required("MEDIA_COMMAND_URL")?,
            album_url: required("ALBUM_URL")?,
            notification_url: required("NOTIFICATION_URL")?,
        })
    }
}
