//! Query surface over the media read model.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use lumina_eventlog::EventLog;

use crate::projector::{Projector, ProjectorError};
use crate::read_model::MediaReadModel;

pub struct AppState<L> {
    pub projector: Arc<Projector<L>>,
}

impl<L> Clone for AppState<L> {
    fn clone(&self) -> Self {
        Self {
            projector: self.projector.clone(),
        }
    }
}

pub fn router<L: EventLog + 'static>(state: AppState<L>) -> Router {
    Router::new()
        .route("/api/v1/media", get(list_media::<L>))
        .route("/api/v1/media/search", get(search_media::<L>))
        .route("/api/v1/media/{id}", get(get_media::<L>))
        .route("/api/v1/internal/rebuild", post(rebuild::<L>))
        .route("/health", get(health))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn handle_panic(_: Box<dyn std::any::Any + Send + 'static>) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            error: "internal server error".to_string(),
        }),
    )
        .into_response()
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

enum ApiError {
    MissingUser,
    NotFound,
    Internal(String),
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<ProjectorError> for ApiError {
    fn from(err: ProjectorError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::MissingUser => (
                StatusCode::BAD_REQUEST,
                "the X-User-ID header is required".to_string(),
            ),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "media not found".to_string()),
            ApiError::Internal(message) => {
                warn!(error = %message, "media query failed");
                (StatusCode::INTERNAL_SERVER_ERROR, message)
            }
        };

        (status, Json(ErrorBody { error: message })).into_response()
    }
}

/// The gateway authenticates the caller and forwards the user identifier in
/// this header; the core only reads it.
fn user_id(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get("x-user-id")
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or(ApiError::MissingUser)
}

async fn list_media<L: EventLog>(
    State(state): State<AppState<L>>,
    headers: HeaderMap,
) -> Result<Json<Vec<MediaReadModel>>, ApiError> {
    let user = user_id(&headers)?;
    Ok(Json(state.projector.store().list_by_user(&user).await?))
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: String,
}

async fn search_media<L: EventLog>(
    State(state): State<AppState<L>>,
    headers: HeaderMap,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<MediaReadModel>>, ApiError> {
    let user = user_id(&headers)?;
    Ok(Json(state.projector.store().search(&user, &query.q).await?))
}

async fn get_media<L: EventLog>(
    State(state): State<AppState<L>>,
    Path(id): Path<String>,
) -> Result<Json<MediaReadModel>, ApiError> {
    state
        .projector
        .store()
        .get(&id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

#[derive(Debug, Serialize)]
struct RebuildResponse {
    status: &'static str,
    events_applied: usize,
}

async fn rebuild<L: EventLog>(
    State(state): State<AppState<L>>,
) -> Result<Json<RebuildResponse>, ApiError> {
    let events_applied = state.projector.rebuild_from_log().await?;
    Ok(Json(RebuildResponse {
        status: "rebuilt",
        events_applied,
    }))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "media-query",
    })
}
