//! Event log service entrypoint.
//!
//! The single source of truth for the platform: every state change is
//! persisted here as an immutable event and served back to projectors,
//! the saga engine, and the command services.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use lumina_eventlog::http::{AppState, router};
use lumina_eventlog::{EventLogConfig, SqliteEventLog};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = EventLogConfig::from_env()?;
    let log = SqliteEventLog::open(&config.database_path).await?;

    let app = router(AppState { log: Arc::new(log) });
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(port = config.port, "event log service listening");

    axum::serve(listener, app).await?;
    Ok(())
}
