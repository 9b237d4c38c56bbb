//! In-process tests of the media query surface.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use lumina_events::{AggregateType, EventKind};
use lumina_projector::http::{AppState, router};
use lumina_projector::{MediaReadModelStore, Projector, ProjectorConfig};
use lumina_store::OffsetStore;
use lumina_testing::InMemoryEventLog;

async fn test_app() -> (Router, Arc<InMemoryEventLog>, Arc<Projector<InMemoryEventLog>>) {
    let pool = lumina_store::connect_in_memory().await.unwrap();
    let log = Arc::new(InMemoryEventLog::new());
    let projector = Arc::new(Projector::new(
        log.clone(),
        MediaReadModelStore::new(pool.clone()).await.unwrap(),
        OffsetStore::new(pool).await.unwrap(),
        ProjectorConfig::default(),
    ));

    let app = router(AppState {
        projector: projector.clone(),
    });
    (app, log, projector)
}

async fn get(app: Router, uri: &str, user: Option<&str>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    let response = app.oneshot(builder.body(Body::empty()).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn seed_upload(log: &InMemoryEventLog, aggregate_id: &str, user: &str, filename: &str) {
    log.append_event(
        aggregate_id,
        AggregateType::Media,
        EventKind::MediaUploaded,
        json!({
            "user_id": user,
            "filename": filename,
            "content_type": "image/jpeg",
            "size": 64,
            "storage_path": format!("/m/{filename}"),
        }),
    )
    .await;
}

#[tokio::test]
async fn listing_requires_the_user_header() {
    let (app, _, _) = test_app().await;
    let (status, body) = get(app, "/api/v1/media", None).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("X-User-ID"));
}

#[tokio::test]
async fn listing_returns_the_users_projected_media() {
    let (app, log, projector) = test_app().await;
    seed_upload(&log, "media-a", "u1", "alps.jpg").await;
    seed_upload(&log, "media-b", "u2", "sea.jpg").await;
    projector.poll_once().await.unwrap();

    let (status, body) = get(app, "/api/v1/media", Some("u1")).await;

    assert_eq!(status, StatusCode::OK);
    let items = body.as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["id"], "media-a");
    assert_eq!(items[0]["status"], "uploaded");
}

#[tokio::test]
async fn get_by_id_returns_404_for_unknown_media() {
    let (app, _, _) = test_app().await;
    let (status, _) = get(app, "/api/v1/media/media-ghost", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn search_filters_by_filename() {
    let (app, log, projector) = test_app().await;
    seed_upload(&log, "media-a", "u1", "alps-sunrise.jpg").await;
    seed_upload(&log, "media-b", "u1", "sea.jpg").await;
    projector.poll_once().await.unwrap();

    let (status, body) = get(app, "/api/v1/media/search?q=alps", Some("u1")).await;

    assert_eq!(status, StatusCode::OK);
    let items = body.as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["filename"], "alps-sunrise.jpg");
}

#[tokio::test]
async fn rebuild_endpoint_replays_the_full_log() {
    let (app, log, projector) = test_app().await;
    seed_upload(&log, "media-a", "u1", "alps.jpg").await;
    projector.poll_once().await.unwrap();

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/internal/rebuild")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "rebuilt");
    assert_eq!(body["events_applied"], 1);

    let (status, media) = get(app, "/api/v1/media/media-a", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(media["status"], "uploaded");
}
