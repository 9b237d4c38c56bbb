//! # lumina-events
//!
//! Shared event vocabulary for the Lumina coordination core: the immutable
//! [`Event`] record, the closed [`EventKind`]/[`AggregateType`] catalog, and
//! the typed payload schemas carried in event `data`.
//!
//! This crate has zero infrastructure dependencies. Every other crate in the
//! workspace speaks in these types.

pub mod event;
pub mod payload;
pub mod types;

pub use event::{AppendEvent, Event};
pub use payload::{
    AlbumCreatedData, AlbumDeletedData, EventPayload, MediaAddedToAlbumData, MediaDeletedData,
    MediaProcessedData, MediaProcessingFailedData, MediaRemovedFromAlbumData,
    MediaUploadCompensatedData, MediaUploadedData, NotificationSentData, PayloadError,
};
pub use types::{AggregateType, EventKind, UnknownEnumValue, media_aggregate_id, album_aggregate_id};
