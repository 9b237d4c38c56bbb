//! In-process tests of the saga control surface.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use lumina_saga::http::{AppState, router};
use lumina_saga::{EngineConfig, SagaEngine, SagaRegistry, SagaStore, workflows};
use lumina_store::OffsetStore;
use lumina_testing::{InMemoryEventLog, ScriptedAlbum, ScriptedMediaCommand, ScriptedNotifications};

async fn test_app() -> (Router, Arc<SagaEngine<InMemoryEventLog>>, Arc<ScriptedMediaCommand>) {
    let pool = lumina_store::connect_in_memory().await.unwrap();
    let store = SagaStore::new(pool.clone()).await.unwrap();
    let offsets = OffsetStore::new(pool).await.unwrap();
    let log = Arc::new(InMemoryEventLog::new());

    let media = Arc::new(ScriptedMediaCommand::new());
    let mut registry = SagaRegistry::new();
    registry
        .register(workflows::media_upload(
            media.clone(),
            Arc::new(ScriptedAlbum::new()),
            Arc::new(ScriptedNotifications::new()),
        ))
        .unwrap();

    let engine = Arc::new(SagaEngine::new(
        log,
        store,
        Arc::new(registry),
        offsets,
        EngineConfig {
            backoff_base: Duration::from_millis(1),
            ..EngineConfig::default()
        },
    ));

    let app = router(AppState {
        engine: engine.clone(),
    });
    (app, engine, media)
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn post_json(app: Router, uri: &str, body: &Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn upload_notify(aggregate_id: &str) -> Value {
    json!({
        "event_type": "MediaUploaded",
        "aggregate_id": aggregate_id,
        "data": {
            "user_id": "u1",
            "filename": "p.jpg",
            "content_type": "image/jpeg",
            "size": 64,
            "storage_path": "/m/p.jpg"
        }
    })
}

#[tokio::test]
async fn notify_starts_a_saga_synchronously() {
    let (app, engine, media) = test_app().await;

    let (status, body) = post_json(app.clone(), "/api/v1/events/notify", &upload_notify("media-a")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "accepted");

    let active = engine.store().list_active().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].current_step, "process_media");
    assert_eq!(media.process_calls(), vec!["media-a".to_string()]);
}

#[tokio::test]
async fn notify_rejects_unknown_event_types() {
    let (app, _, _) = test_app().await;

    let (status, body) = post_json(
        app,
        "/api/v1/events/notify",
        &json!({"event_type": "MediaTranscoded", "aggregate_id": "media-a"}),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("MediaTranscoded"));
}

#[tokio::test]
async fn saga_listing_and_detail_expose_step_history() {
    let (app, _, _) = test_app().await;

    post_json(app.clone(), "/api/v1/events/notify", &upload_notify("media-a")).await;

    let (status, listed) = get_json(app.clone(), "/api/v1/sagas").await;
    assert_eq!(status, StatusCode::OK);
    let sagas = listed.as_array().unwrap();
    assert_eq!(sagas.len(), 1);
    assert_eq!(sagas[0]["saga_type"], "media_upload");
    assert_eq!(sagas[0]["status"], "in_progress");

    let id = sagas[0]["id"].as_str().unwrap();
    let (status, detail) = get_json(app, &format!("/api/v1/sagas/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["current_step"], "process_media");
    let steps = detail["steps"].as_array().unwrap();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0]["step_name"], "process_media");
}

#[tokio::test]
async fn unknown_saga_detail_is_404() {
    let (app, _, _) = test_app().await;
    let (status, body) = get_json(app, "/api/v1/sagas/saga-ghost").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().is_some());
}

#[tokio::test]
async fn health_reports_ok() {
    let (app, _, _) = test_app().await;
    let (status, body) = get_json(app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "saga");
}
