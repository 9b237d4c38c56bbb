//! HTTP client adapter for the event log.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

use lumina_events::{AppendEvent, Event, EventKind};

use crate::store::{EventLog, EventLogError};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct RemoteError {
    error: String,
}

/// Consumer-side client speaking the log's wire protocol.
///
/// Every request carries the client's deadline; a timed-out or unreachable
/// log surfaces as a transient [`EventLogError::Transport`] and the calling
/// loop retries on its next tick.
#[derive(Debug, Clone)]
pub struct EventLogClient {
    http: reqwest::Client,
    base_url: String,
}

impl EventLogClient {
    /// Build a client for the log at `base_url` (e.g. `http://eventlog:8084`).
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http,
            base_url: base_url.into(),
        }
    }

    /// Override the request deadline.
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http,
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn decode_failure(response: reqwest::Response) -> EventLogError {
        let status = response.status();
        let message = response
            .json::<RemoteError>()
            .await
            .map(|body| body.error)
            .unwrap_or_else(|_| status.to_string());

        match status {
            StatusCode::CONFLICT => EventLogError::VersionConflict {
                aggregate_id: String::new(),
                version: 0,
            },
            StatusCode::BAD_REQUEST => EventLogError::InvalidRequest(message),
            _ => EventLogError::Remote {
                status: status.as_u16(),
                message,
            },
        }
    }

    async fn get_events(&self, path: &str) -> Result<Vec<Event>, EventLogError> {
        let response = self.http.get(self.url(path)).send().await?;
        if !response.status().is_success() {
            return Err(Self::decode_failure(response).await);
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl EventLog for EventLogClient {
    async fn append(&self, event: AppendEvent) -> Result<Event, EventLogError> {
        let response = self
            .http
            .post(self.url("/api/v1/events"))
            .json(&event)
            .send()
            .await?;

        if response.status() != StatusCode::CREATED {
            let mut err = Self::decode_failure(response).await;
            if let EventLogError::VersionConflict { aggregate_id, .. } = &mut err {
                *aggregate_id = event.aggregate_id.clone();
            }
            return Err(err);
        }
        Ok(response.json().await?)
    }

    async fn events_by_aggregate(&self, aggregate_id: &str) -> Result<Vec<Event>, EventLogError> {
        self.get_events(&format!("/api/v1/events/aggregate/{aggregate_id}"))
            .await
    }

    async fn events_by_kind(&self, kind: EventKind) -> Result<Vec<Event>, EventLogError> {
        self.get_events(&format!("/api/v1/events/type/{}", kind.as_str()))
            .await
    }

    async fn events_since(&self, since: DateTime<Utc>) -> Result<Vec<Event>, EventLogError> {
        let response = self
            .http
            .get(self.url("/api/v1/events/since"))
            .query(&[("since", since.to_rfc3339_opts(SecondsFormat::Nanos, true))])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::decode_failure(response).await);
        }
        Ok(response.json().await?)
    }

    async fn latest_version(&self, aggregate_id: &str) -> Result<i64, EventLogError> {
        #[derive(Deserialize)]
        struct VersionResponse {
            latest_version: i64,
        }

        let response = self
            .http
            .get(self.url(&format!("/api/v1/events/aggregate/{aggregate_id}/version")))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::decode_failure(response).await);
        }
        let body: VersionResponse = response.json().await?;
        Ok(body.latest_version)
    }

    async fn all_events(&self) -> Result<Vec<Event>, EventLogError> {
        self.get_events("/api/v1/events").await
    }
}
