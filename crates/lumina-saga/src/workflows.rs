//! The `media_upload` workflow.
//!
//! process_media ──▶ add_to_album ──▶ send_notification
//!
//! Started by `MediaUploaded`, aborted by `MediaProcessingFailed`. The
//! first two steps are compensable; the notification is terminal and
//! non-reversible.

use async_trait::async_trait;
use std::sync::Arc;

use lumina_events::EventKind;

use crate::action::{ActionError, StepAction, StepContext};
use crate::gateway::{AlbumGateway, MediaCommandGateway, NotificationGateway};
use crate::registry::{Correlation, SagaDefinition, StepDefinition};

pub const MEDIA_UPLOAD: &str = "media_upload";

struct ProcessMedia {
    media: Arc<dyn MediaCommandGateway>,
}

#[async_trait]
impl StepAction for ProcessMedia {
    async fn run(&self, ctx: &StepContext) -> Result<serde_json::Value, ActionError> {
        let media_id = ctx.media_aggregate_id()?;
        self.media.process(media_id).await?;
        Ok(serde_json::json!({"requested": true}))
    }
}

struct CompensateUpload {
    media: Arc<dyn MediaCommandGateway>,
}

#[async_trait]
impl StepAction for CompensateUpload {
    async fn run(&self, ctx: &StepContext) -> Result<serde_json::Value, ActionError> {
        let media_id = ctx.media_aggregate_id()?;
        self.media
            .compensate(
                media_id,
                &ctx.saga_id,
                "media processing failed; invalidating the upload",
            )
            .await?;
        Ok(serde_json::json!({"compensated": true}))
    }
}

struct AddToAlbum {
    album: Arc<dyn AlbumGateway>,
}

#[async_trait]
impl StepAction for AddToAlbum {
    async fn run(&self, ctx: &StepContext) -> Result<serde_json::Value, ActionError> {
        let media_id = ctx.media_aggregate_id()?;
        let upload = ctx.upload_data()?;
        self.album.add_to_default(media_id, &upload.user_id).await?;
        Ok(serde_json::json!({"album": "default"}))
    }
}

struct RemoveFromAlbum {
    album: Arc<dyn AlbumGateway>,
}

#[async_trait]
impl StepAction for RemoveFromAlbum {
    async fn run(&self, ctx: &StepContext) -> Result<serde_json::Value, ActionError> {
        let media_id = ctx.media_aggregate_id()?;
        self.album.remove_from_default(media_id).await?;
        Ok(serde_json::json!({"removed": true}))
    }
}

struct SendNotification {
    notifications: Arc<dyn NotificationGateway>,
}

#[async_trait]
impl StepAction for SendNotification {
    async fn run(&self, ctx: &StepContext) -> Result<serde_json::Value, ActionError> {
        let media_id = ctx.media_aggregate_id()?;
        let upload = ctx.upload_data()?;
        self.notifications
            .send(
                &upload.user_id,
                "Upload complete",
                &format!("Your media \"{}\" has been uploaded and processed.", upload.filename),
                media_id,
            )
            .await?;
        Ok(serde_json::json!({"notified": true}))
    }
}

/// Build the canonical `media_upload` definition over the given
/// collaborators.
pub fn media_upload(
    media: Arc<dyn MediaCommandGateway>,
    album: Arc<dyn AlbumGateway>,
    notifications: Arc<dyn NotificationGateway>,
) -> SagaDefinition {
    SagaDefinition {
        saga_type: MEDIA_UPLOAD,
        start_trigger: EventKind::MediaUploaded,
        failure_triggers: vec![EventKind::MediaProcessingFailed],
        correlation_key: "media_aggregate_id",
        steps: vec![
            StepDefinition {
                name: "process_media",
                action: Arc::new(ProcessMedia {
                    media: media.clone(),
                }),
                success_trigger: EventKind::MediaProcessed,
                correlation: Correlation::AggregateId,
                compensation: Some(Arc::new(CompensateUpload { media })),
            },
            StepDefinition {
                name: "add_to_album",
                action: Arc::new(AddToAlbum {
                    album: album.clone(),
                }),
                success_trigger: EventKind::MediaAddedToAlbum,
                correlation: Correlation::PayloadField("media_id"),
                compensation: Some(Arc::new(RemoveFromAlbum { album })),
            },
            StepDefinition {
                name: "send_notification",
                action: Arc::new(SendNotification { notifications }),
                success_trigger: EventKind::NotificationSent,
                correlation: Correlation::PayloadField("media_id"),
                compensation: None,
            },
        ],
    }
}
