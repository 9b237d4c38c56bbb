//! Typed payload schemas, one per event kind.
//!
//! Payloads travel as canonical JSON in the event `data` field. Unknown
//! fields are ignored on read so producers can add fields without breaking
//! older consumers.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::EventKind;

/// Decoding/encoding failure for a typed payload.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload for {kind} did not match its schema: {source}")]
    Schema {
        kind: EventKind,
        #[source]
        source: serde_json::Error,
    },
}

/// Implemented by each payload struct; binds the schema to its event kind.
pub trait EventPayload: Serialize + DeserializeOwned {
    const KIND: EventKind;

    fn encode(&self) -> serde_json::Value {
        // Serializing a plain struct of JSON-representable fields cannot fail.
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    fn decode(data: &serde_json::Value) -> Result<Self, PayloadError> {
        serde_json::from_value(data.clone()).map_err(|source| PayloadError::Schema {
            kind: Self::KIND,
            source,
        })
    }
}

/// A media file landed in storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaUploadedData {
    pub user_id: String,
    pub filename: String,
    pub content_type: String,
    pub size: i64,
    pub storage_path: String,
}

impl EventPayload for MediaUploadedData {
    const KIND: EventKind = EventKind::MediaUploaded;
}

/// Thumbnailing and probing finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaProcessedData {
    pub thumbnail_path: String,
    pub width: i64,
    pub height: i64,
    /// Duration in seconds for videos; absent for still images.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
}

impl EventPayload for MediaProcessedData {
    const KIND: EventKind = EventKind::MediaProcessed;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaProcessingFailedData {
    pub reason: String,
}

impl EventPayload for MediaProcessingFailedData {
    const KIND: EventKind = EventKind::MediaProcessingFailed;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaDeletedData {
    pub user_id: String,
}

impl EventPayload for MediaDeletedData {
    const KIND: EventKind = EventKind::MediaDeleted;
}

/// The compensating action invalidated an upload after a downstream failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaUploadCompensatedData {
    pub reason: String,
    pub saga_id: String,
}

impl EventPayload for MediaUploadCompensatedData {
    const KIND: EventKind = EventKind::MediaUploadCompensated;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlbumCreatedData {
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl EventPayload for AlbumCreatedData {
    const KIND: EventKind = EventKind::AlbumCreated;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlbumDeletedData {
    pub user_id: String,
}

impl EventPayload for AlbumDeletedData {
    const KIND: EventKind = EventKind::AlbumDeleted;
}

/// `media_id` is the media aggregate id; the event's own aggregate is the
/// album, so consumers correlating on the media use this field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaAddedToAlbumData {
    pub media_id: String,
}

impl EventPayload for MediaAddedToAlbumData {
    const KIND: EventKind = EventKind::MediaAddedToAlbum;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRemovedFromAlbumData {
    pub media_id: String,
}

impl EventPayload for MediaRemovedFromAlbumData {
    const KIND: EventKind = EventKind::MediaRemovedFromAlbum;
}

/// `media_id` echoes the id the sender was given so workflow consumers can
/// correlate the notification back to the media it concerns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationSentData {
    pub user_id: String,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub media_id: String,
}

impl EventPayload for NotificationSentData {
    const KIND: EventKind = EventKind::NotificationSent;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_ignores_unknown_fields() {
        let data = json!({
            "user_id": "u1",
            "filename": "p.jpg",
            "content_type": "image/jpeg",
            "size": 1024,
            "storage_path": "/m/p.jpg",
            "exif_camera": "not-in-schema",
        });

        let payload = MediaUploadedData::decode(&data).unwrap();
        assert_eq!(payload.filename, "p.jpg");
        assert_eq!(payload.size, 1024);
    }

    #[test]
    fn decode_rejects_wrong_shape() {
        let err = MediaUploadedData::decode(&json!("just a string")).unwrap_err();
        assert!(err.to_string().contains("MediaUploaded"));
    }

    #[test]
    fn processed_duration_is_optional() {
        let still = json!({"thumbnail_path": "/t/a.jpg", "width": 100, "height": 80});
        let payload = MediaProcessedData::decode(&still).unwrap();
        assert_eq!(payload.duration_seconds, None);

        let encoded = payload.encode();
        assert!(encoded.get("duration_seconds").is_none());
    }
}
