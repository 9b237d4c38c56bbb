//! Saga service entrypoint: the engine poll loop, the stuck-saga
//! detector, and the control surface.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use lumina_eventlog::EventLogClient;
use lumina_saga::gateway::{HttpAlbumGateway, HttpMediaCommandGateway, HttpNotificationGateway};
use lumina_saga::http::{AppState, router};
use lumina_saga::{
    DetectorConfig, EngineConfig, SagaEngine, SagaRegistry, SagaServiceConfig, SagaStore,
    StuckSagaDetector, workflows,
};
use lumina_store::OffsetStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = SagaServiceConfig::from_env()?;

    let mut registry = SagaRegistry::new();
    registry.register(workflows::media_upload(
        Arc::new(HttpMediaCommandGateway::new(&config.media_command_url)),
        Arc::new(HttpAlbumGateway::new(&config.album_url)),
        Arc::new(HttpNotificationGateway::new(&config.notification_url)),
    ))?;
    let registry = Arc::new(registry);

    let pool = lumina_store::connect(&config.database_path).await?;
    let store = SagaStore::new(pool.clone()).await?;
    let offsets = OffsetStore::new(pool).await?;
    let log = Arc::new(EventLogClient::new(&config.eventlog_url));

    let engine_config = EngineConfig::default();
    let engine = Arc::new(SagaEngine::new(
        log,
        store.clone(),
        registry.clone(),
        offsets,
        engine_config.clone(),
    ));
    tokio::spawn(engine.clone().run());

    let detector = Arc::new(StuckSagaDetector::new(
        store,
        registry,
        DetectorConfig::default(),
        engine_config,
    ));
    tokio::spawn(detector.run());

    let app = router(AppState { engine });
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(port = config.port, "saga service listening");

    axum::serve(listener, app).await?;
    Ok(())
}
