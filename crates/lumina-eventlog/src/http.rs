//! HTTP surface of the event log.
//!
//! This is the platform's internal wire protocol: append plus the four read
//! queries, JSON in and out, `{"error": ...}` bodies on failure.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use lumina_events::{AggregateType, AppendEvent, Event, EventKind};

use crate::store::{EventLog, EventLogError};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub log: Arc<dyn EventLog>,
}

/// Build the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/events", post(append_event).get(all_events))
        .route("/api/v1/events/aggregate/{aggregate_id}", get(events_by_aggregate))
        .route(
            "/api/v1/events/aggregate/{aggregate_id}/version",
            get(latest_version),
        )
        .route("/api/v1/events/type/{event_type}", get(events_by_type))
        .route("/api/v1/events/since", get(events_since))
        .route("/health", get(health))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Unhandled handler panics become a 500 instead of killing the process.
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

struct ApiError(EventLogError);

impl From<EventLogError> for ApiError {
    fn from(err: EventLogError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EventLogError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            EventLogError::VersionConflict { .. } => StatusCode::CONFLICT,
            EventLogError::Database(_)
            | EventLogError::Corrupt(_)
            | EventLogError::Transport(_)
            | EventLogError::Remote { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!(error = %self.0, "event log request failed");
        }

        let body = ErrorBody {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct AppendRequest {
    aggregate_id: String,
    aggregate_type: String,
    event_type: String,
    data: serde_json::Value,
}

async fn append_event(
    State(state): State<AppState>,
    body: Json<serde_json::Value>,
) -> Result<(StatusCode, Json<Event>), ApiError> {
    // Deserialized by hand so malformed bodies map to 400, not axum's
    // default rejection.
    let request: AppendRequest = serde_json::from_value(body.0)
        .map_err(|e| EventLogError::InvalidRequest(e.to_string()))?;

    let aggregate_type: AggregateType = request
        .aggregate_type
        .parse()
        .map_err(|e: lumina_events::UnknownEnumValue| EventLogError::InvalidRequest(e.to_string()))?;
    let event_type: EventKind = request
        .event_type
        .parse()
        .map_err(|e: lumina_events::UnknownEnumValue| EventLogError::InvalidRequest(e.to_string()))?;

    let stored = state
        .log
        .append(AppendEvent::new(
            request.aggregate_id,
            aggregate_type,
            event_type,
            request.data,
        ))
        .await?;

    Ok((StatusCode::CREATED, Json(stored)))
}

async fn events_by_aggregate(
    State(state): State<AppState>,
    Path(aggregate_id): Path<String>,
) -> Result<Json<Vec<Event>>, ApiError> {
    Ok(Json(state.log.events_by_aggregate(&aggregate_id).await?))
}

#[derive(Debug, Serialize)]
struct VersionResponse {
    aggregate_id: String,
    latest_version: i64,
}

async fn latest_version(
    State(state): State<AppState>,
    Path(aggregate_id): Path<String>,
) -> Result<Json<VersionResponse>, ApiError> {
    let latest_version = state.log.latest_version(&aggregate_id).await?;
    Ok(Json(VersionResponse {
        aggregate_id,
        latest_version,
    }))
}

async fn events_by_type(
    State(state): State<AppState>,
    Path(event_type): Path<String>,
) -> Result<Json<Vec<Event>>, ApiError> {
    let kind: EventKind = event_type
        .parse()
        .map_err(|e: lumina_events::UnknownEnumValue| EventLogError::InvalidRequest(e.to_string()))?;
    Ok(Json(state.log.events_by_kind(kind).await?))
}

#[derive(Debug, Deserialize)]
struct SinceQuery {
    since: Option<String>,
}

async fn events_since(
    State(state): State<AppState>,
    Query(query): Query<SinceQuery>,
) -> Result<Json<Vec<Event>>, ApiError> {
    let raw = query.since.ok_or_else(|| {
        EventLogError::InvalidRequest("the since query parameter is required".to_string())
    })?;
    let since: DateTime<Utc> = DateTime::parse_from_rfc3339(&raw)
        .map_err(|e| EventLogError::InvalidRequest(format!("since must be RFC 3339: {e}")))?
        .with_timezone(&Utc);

    Ok(Json(state.log.events_since(since).await?))
}

async fn all_events(State(state): State<AppState>) -> Result<Json<Vec<Event>>, ApiError> {
    Ok(Json(state.log.all_events().await?))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "eventlog",
    })
}
