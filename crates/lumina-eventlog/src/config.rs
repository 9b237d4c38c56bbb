//! Environment configuration for the event log service.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {0} is not a valid value")]
    Invalid(&'static str),
}

/// Runtime settings, all from the environment. Nothing here changes core
/// behavior; peers discover the service by its listen port.
#[derive(Debug, Clone)]
pub struct EventLogConfig {
    pub port: u16,
    pub database_path: String,
}

impl EventLogConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = match std::env::var("PORT") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid("PORT"))?,
            Err(_) => 8084,
        };
        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "data/eventlog.db".to_string());

        Ok(Self {
            port,
            database_path,
        })
    }
}
