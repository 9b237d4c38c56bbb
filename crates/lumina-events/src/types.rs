//! Closed catalogs of aggregate and event types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Returned when a wire string names no known catalog member.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {catalog} value: {value}")]
pub struct UnknownEnumValue {
    /// Which catalog was consulted (`aggregate_type` or `event_type`).
    pub catalog: &'static str,
    /// The offending wire value.
    pub value: String,
}

/// The kind of entity an event belongs to.
///
/// Every aggregate id carries a version sequence scoped to one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateType {
    Media,
    Album,
    User,
}

impl AggregateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateType::Media => "Media",
            AggregateType::Album => "Album",
            AggregateType::User => "User",
        }
    }
}

impl fmt::Display for AggregateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregateType {
    type Err = UnknownEnumValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Media" => Ok(AggregateType::Media),
            "Album" => Ok(AggregateType::Album),
            "User" => Ok(AggregateType::User),
            other => Err(UnknownEnumValue {
                catalog: "aggregate_type",
                value: other.to_string(),
            }),
        }
    }
}

/// The closed set of event types the platform emits.
///
/// Consumers ignore kinds they do not handle, so adding a member here is
/// backward compatible; removing or renaming one is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    MediaUploaded,
    MediaProcessed,
    MediaProcessingFailed,
    MediaDeleted,
    MediaUploadCompensated,
    AlbumCreated,
    AlbumDeleted,
    MediaAddedToAlbum,
    MediaRemovedFromAlbum,
    NotificationSent,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        EventKind::MediaUploaded,
        EventKind::MediaProcessed,
        EventKind::MediaProcessingFailed,
        EventKind::MediaDeleted,
        EventKind::MediaUploadCompensated,
        EventKind::AlbumCreated,
        EventKind::AlbumDeleted,
        EventKind::MediaAddedToAlbum,
        EventKind::MediaRemovedFromAlbum,
        EventKind::NotificationSent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::MediaUploaded => "MediaUploaded",
            EventKind::MediaProcessed => "MediaProcessed",
            EventKind::MediaProcessingFailed => "MediaProcessingFailed",
            EventKind::MediaDeleted => "MediaDeleted",
            EventKind::MediaUploadCompensated => "MediaUploadCompensated",
            EventKind::AlbumCreated => "AlbumCreated",
            EventKind::AlbumDeleted => "AlbumDeleted",
            EventKind::MediaAddedToAlbum => "MediaAddedToAlbum",
            EventKind::MediaRemovedFromAlbum => "MediaRemovedFromAlbum",
            EventKind::NotificationSent => "NotificationSent",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = UnknownEnumValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .iter()
            .find(|kind| kind.as_str() == s)
            .copied()
            .ok_or_else(|| UnknownEnumValue {
                catalog: "event_type",
                value: s.to_string(),
            })
    }
}

/// Mint a media aggregate id (`media-<uuid>`). The prefix is informational;
/// uniqueness comes from the uuid.
pub fn media_aggregate_id() -> String {
    format!("media-{}", Uuid::new_v4())
}

/// Mint an album aggregate id (`album-<uuid>`).
pub fn album_aggregate_id() -> String {
    format!("album-{}", Uuid::new_v4())
}
