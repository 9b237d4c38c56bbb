//! Collaborator gateways.
//!
//! The saga only knows collaborators by these traits; the HTTP
//! implementations live alongside, and tests substitute scripted fakes.
//! Every operation is required to be idempotent on the collaborator side —
//! the engine delivers at-least-once.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::action::ActionError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// The media command service: thumbnailing and upload invalidation.
#[async_trait]
pub trait MediaCommandGateway: Send + Sync {
    /// Ask for processing of an uploaded media item. Completion is
    /// observed as a `MediaProcessed` event, not in this response.
    async fn process(&self, media_id: &str) -> Result<(), ActionError>;

    /// Invalidate an upload whose downstream processing failed.
    async fn compensate(
        &self,
        media_id: &str,
        saga_id: &str,
        reason: &str,
    ) -> Result<(), ActionError>;
}

/// The album service.
#[async_trait]
pub trait AlbumGateway: Send + Sync {
    async fn add_to_default(&self, media_id: &str, user_id: &str) -> Result<(), ActionError>;

    async fn remove_from_default(&self, media_id: &str) -> Result<(), ActionError>;
}

/// The notification service.
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn send(
        &self,
        user_id: &str,
        title: &str,
        message: &str,
        media_id: &str,
    ) -> Result<(), ActionError>;
}

#[derive(Debug, Deserialize)]
struct RemoteError {
    error: String,
}

#[derive(Debug, Clone)]
struct HttpGateway {
    http: reqwest::Client,
    base_url: String,
}

impl HttpGateway {
    fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
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

    async fn check(response: reqwest::Response) -> Result<(), ActionError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let message = response
            .json::<RemoteError>()
            .await
            .map(|body| body.error)
            .unwrap_or_else(|_| status.to_string());
        Err(ActionError::Remote {
            status: status.as_u16(),
            message,
        })
    }

    async fn post(&self, path: &str, body: &serde_json::Value) -> Result<(), ActionError> {
        let response = self.http.post(self.url(path)).json(body).send().await?;
        Self::check(response).await
    }

    async fn delete(&self, path: &str) -> Result<(), ActionError> {
        let response = self.http.delete(self.url(path)).send().await?;
        Self::check(response).await
    }
}

/// HTTP adapter for the media command service.
#[derive(Debug, Clone)]
pub struct HttpMediaCommandGateway {
    inner: HttpGateway,
}

impl HttpMediaCommandGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            inner: HttpGateway::new(base_url, DEFAULT_TIMEOUT),
        }
    }
}

#[async_trait]
impl MediaCommandGateway for HttpMediaCommandGateway {
    async fn process(&self, media_id: &str) -> Result<(), ActionError> {
        self.inner
            .post(&format!("/api/v1/media/{media_id}/process"), &json!({}))
            .await
    }

    async fn compensate(
        &self,
        media_id: &str,
        saga_id: &str,
        reason: &str,
    ) -> Result<(), ActionError> {
        self.inner
            .post(
                &format!("/api/v1/media/{media_id}/compensate"),
                &json!({"saga_id": saga_id, "reason": reason}),
            )
            .await
    }
}

/// HTTP adapter for the album service.
#[derive(Debug, Clone)]
pub struct HttpAlbumGateway {
    inner: HttpGateway,
}

impl HttpAlbumGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            inner: HttpGateway::new(base_url, DEFAULT_TIMEOUT),
        }
    }
}

#[async_trait]
impl AlbumGateway for HttpAlbumGateway {
    async fn add_to_default(&self, media_id: &str, user_id: &str) -> Result<(), ActionError> {
        self.inner
            .post(
                "/api/v1/albums/default/media",
                &json!({"media_id": media_id, "user_id": user_id}),
            )
            .await
    }

    async fn remove_from_default(&self, media_id: &str) -> Result<(), ActionError> {
        self.inner
            .delete(&format!("/api/v1/albums/default/media/{media_id}"))
            .await
    }
}

/// HTTP adapter for the notification service.
#[derive(Debug, Clone)]
pub struct HttpNotificationGateway {
    inner: HttpGateway,
}

impl HttpNotificationGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            inner: HttpGateway::new(base_url, DEFAULT_TIMEOUT),
        }
    }
}

#[async_trait]
impl NotificationGateway for HttpNotificationGateway {
    async fn send(
        &self,
        user_id: &str,
        title: &str,
        message: &str,
        media_id: &str,
    ) -> Result<(), ActionError> {
        self.inner
            .post(
                "/api/v1/internal/send",
                &json!({
                    "user_id": user_id,
                    "title": title,
                    "message": message,
                    "media_id": media_id,
                }),
            )
            .await
    }
}
