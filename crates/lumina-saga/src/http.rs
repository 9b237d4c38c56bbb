//! Saga control surface: read-only observability plus synchronous event
//! injection for tests and bridges.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;
use uuid::Uuid;

use lumina_events::{AggregateType, Event, EventKind};
use lumina_eventlog::EventLog;

use crate::engine::{SagaEngine, SagaError};
use crate::instance::{SagaInstance, StepRecord};

pub struct AppState<L> {
    pub engine: Arc<SagaEngine<L>>,
}

impl<L> Clone for AppState<L> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
        }
    }
}

pub fn router<L: EventLog + 'static>(state: AppState<L>) -> Router {
    Router::new()
        .route("/api/v1/sagas", get(list_sagas::<L>))
        .route("/api/v1/sagas/{id}", get(get_saga::<L>))
        .route("/api/v1/events/notify", post(notify::<L>))
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
    BadRequest(String),
    NotFound,
    Internal(String),
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "saga not found".to_string()),
            ApiError::Internal(message) => {
                warn!(error = %message, "saga control request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, message)
            }
        };

        (status, Json(ErrorBody { error: message })).into_response()
    }
}

async fn list_sagas<L: EventLog>(
    State(state): State<AppState<L>>,
) -> Result<Json<Vec<SagaInstance>>, ApiError> {
    Ok(Json(state.engine.store().list_active().await?))
}

#[derive(Debug, Serialize)]
struct SagaDetail {
    #[serde(flatten)]
    saga: SagaInstance,
    steps: Vec<StepRecord>,
}

async fn get_saga<L: EventLog>(
    State(state): State<AppState<L>>,
    Path(id): Path<String>,
) -> Result<Json<SagaDetail>, ApiError> {
    let saga = state
        .engine
        .store()
        .get_saga(&id)
        .await?
        .ok_or(ApiError::NotFound)?;
    let steps = state.engine.store().list_steps(&id).await?;

    Ok(Json(SagaDetail { saga, steps }))
}

#[derive(Debug, Deserialize)]
struct NotifyRequest {
    event_type: String,
    aggregate_id: String,
    #[serde(default)]
    aggregate_type: Option<String>,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct NotifyResponse {
    status: &'static str,
}

/// Inject a trigger synchronously, bypassing the poll loop. The synthetic
/// event is not persisted anywhere; it only drives the engine's trigger
/// matching.
async fn notify<L: EventLog>(
    State(state): State<AppState<L>>,
    body: Json<serde_json::Value>,
) -> Result<Json<NotifyResponse>, ApiError> {
    let request: NotifyRequest = serde_json::from_value(body.0)
        .map_err(|err| ApiError::BadRequest(err.to_string()))?;

    let event_type: EventKind = request
        .event_type
        .parse()
        .map_err(|err: lumina_events::UnknownEnumValue| ApiError::BadRequest(err.to_string()))?;
    let aggregate_type: AggregateType = match request.aggregate_type {
        Some(raw) => raw
            .parse()
            .map_err(|err: lumina_events::UnknownEnumValue| ApiError::BadRequest(err.to_string()))?,
        None => AggregateType::Media,
    };

    let event = Event {
        id: Uuid::new_v4().to_string(),
        aggregate_id: request.aggregate_id,
        aggregate_type,
        event_type,
        data: request.data,
        version: 0,
        created_at: Utc::now(),
    };

    state.engine.handle_event(&event).await?;
    Ok(Json(NotifyResponse { status: "accepted" }))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "saga",
    })
}
