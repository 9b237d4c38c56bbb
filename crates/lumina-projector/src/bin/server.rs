//! Media query service entrypoint: the read-model projector plus the
//! query surface it serves.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use lumina_eventlog::EventLogClient;
use lumina_projector::http::{AppState, router};
use lumina_projector::{MediaQueryConfig, MediaReadModelStore, Projector, ProjectorConfig};
use lumina_store::OffsetStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = MediaQueryConfig::from_env()?;

    let pool = lumina_store::connect(&config.database_path).await?;
    let store = MediaReadModelStore::new(pool.clone()).await?;
    let offsets = OffsetStore::new(pool).await?;
    let log = Arc::new(EventLogClient::new(&config.eventlog_url));

    let projector = Arc::new(Projector::new(
        log,
        store,
        offsets,
        ProjectorConfig::default(),
    ));
    tokio::spawn(projector.clone().run());

    let app = router(AppState { projector });
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(port = config.port, "media query service listening");

    axum::serve(listener, app).await?;
    Ok(())
}
