//! Environment configuration for the media query service.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    Missing(&'static str),

    #[error("environment variable {0} is not a valid value")]
    Invalid(&'static str),
}

#[derive(Debug, Clone)]
pub struct MediaQueryConfig {
    pub port: u16,
    pub database_path: String,
    /// Base URL of the event log. Required: the projector cannot run
    /// without its feed.
    pub eventlog_url: String,
}

impl MediaQueryConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = match std::env::var("PORT") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid("PORT"))?,
            Err(_) => 8082,
        };
        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "data/media_query.db".to_string());
        let eventlog_url =
            std::env::var("EVENTLOG_URL").map_err(|_| ConfigError::Missing("EVENTLOG_URL"))?;

        Ok(Self {
            port,
            database_path,
            eventlog_url,
        })
    }
}
