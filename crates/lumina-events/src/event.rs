//! The immutable event record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AggregateType, EventKind};

/// An immutable record of something that happened.
///
/// Events are the unit of storage of the event log. Once a row is visible it
/// is never mutated or deleted. `(aggregate_id, version)` is unique; versions
/// within one aggregate start at 1 and increase monotonically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier, stable across retries within one append.
    pub id: String,
    /// Free-form identifier of the entity this event belongs to.
    pub aggregate_id: String,
    pub aggregate_type: AggregateType,
    pub event_type: EventKind,
    /// Opaque payload whose schema is fixed per event type.
    pub data: serde_json::Value,
    /// Position within the aggregate's version sequence.
    pub version: i64,
    /// Timestamp the log assigned on append (UTC).
    pub created_at: DateTime<Utc>,
}

/// The caller-supplied portion of an append. The log assigns `id`,
/// `version`, and `created_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEvent {
    pub aggregate_id: String,
    pub aggregate_type: AggregateType,
    pub event_type: EventKind,
    pub data: serde_json::Value,
}

impl AppendEvent {
    pub fn new(
        aggregate_id: impl Into<String>,
        aggregate_type: AggregateType,
        event_type: EventKind,
        data: serde_json::Value,
    ) -> Self {
        Self {
            aggregate_id: aggregate_id.into(),
            aggregate_type,
            event_type,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_serializes_with_snake_case_fields() {
        let event = Event {
            id: "e-1".to_string(),
            aggregate_id: "media-abc".to_string(),
            aggregate_type: AggregateType::Media,
            event_type: EventKind::MediaUploaded,
            data: json!({"user_id": "u1"}),
            version: 1,
            created_at: Utc::now(),
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["aggregate_id"], "media-abc");
        assert_eq!(value["aggregate_type"], "Media");
        assert_eq!(value["event_type"], "MediaUploaded");
        assert_eq!(value["version"], 1);
    }

    #[test]
    fn event_deserializes_from_wire_json() {
        let raw = json!({
            "id": "e-2",
            "aggregate_id": "media-xyz",
            "aggregate_type": "Media",
            "event_type": "MediaProcessed",
            "data": {"thumbnail_path": "/t/x.jpg", "width": 640, "height": 480},
            "version": 2,
            "created_at": "2026-03-01T12:00:00.000000000Z",
        });

        let event: Event = serde_json::from_value(raw).unwrap();
        assert_eq!(event.event_type, EventKind::MediaProcessed);
        assert_eq!(event.version, 2);
    }
}
