//! In-memory implementation of the event log port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use lumina_events::{AggregateType, AppendEvent, Event, EventKind};
use lumina_eventlog::{EventLog, EventLogError};

/// Append-only log held in a `Vec`, which doubles as the committed
/// insertion order: `created_at` ties are returned in push order, stable
/// across repeated reads, matching the storage-backed adapter.
#[derive(Debug, Default)]
pub struct InMemoryEventLog {
    events: Mutex<Vec<Event>>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience append for test setup; panics on validation failure so
    /// fixtures stay terse.
    pub async fn append_event(
        &self,
        aggregate_id: &str,
        aggregate_type: AggregateType,
        event_type: EventKind,
        data: serde_json::Value,
    ) -> Event {
        self.append(AppendEvent::new(aggregate_id, aggregate_type, event_type, data))
            .await
            .expect("test append should not fail")
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(&self, event: AppendEvent) -> Result<Event, EventLogError> {
        if event.aggregate_id.trim().is_empty() {
            return Err(EventLogError::InvalidRequest(
                "aggregate_id must not be empty".to_string(),
            ));
        }

        let mut events = self.events.lock();
        let version = events
            .iter()
            .filter(|e| e.aggregate_id == event.aggregate_id)
            .map(|e| e.version)
            .max()
            .unwrap_or(0)
            + 1;

        let stored = Event {
            id: Uuid::new_v4().to_string(),
            aggregate_id: event.aggregate_id,
            aggregate_type: event.aggregate_type,
            event_type: event.event_type,
            data: event.data,
            version,
            created_at: Utc::now(),
        };
        events.push(stored.clone());
        Ok(stored)
    }

    async fn events_by_aggregate(&self, aggregate_id: &str) -> Result<Vec<Event>, EventLogError> {
        let mut matched: Vec<Event> = self
            .events
            .lock()
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .cloned()
            .collect();
        matched.sort_by_key(|e| e.version);
        Ok(matched)
    }

    async fn events_by_kind(&self, kind: EventKind) -> Result<Vec<Event>, EventLogError> {
        Ok(self
            .events
            .lock()
            .iter()
            .filter(|e| e.event_type == kind)
            .cloned()
            .collect())
    }

    async fn events_since(&self, since: DateTime<Utc>) -> Result<Vec<Event>, EventLogError> {
        Ok(self
            .events
            .lock()
            .iter()
            .filter(|e| e.created_at > since)
            .cloned()
            .collect())
    }

    async fn latest_version(&self, aggregate_id: &str) -> Result<i64, EventLogError> {
        Ok(self
            .events
            .lock()
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .map(|e| e.version)
            .max()
            .unwrap_or(0))
    }

    async fn all_events(&self) -> Result<Vec<Event>, EventLogError> {
        Ok(self.events.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn versions_increase_per_aggregate() {
        let log = InMemoryEventLog::new();

        let first = log
            .append_event("media-a", AggregateType::Media, EventKind::MediaUploaded, json!({}))
            .await;
        let second = log
            .append_event("media-a", AggregateType::Media, EventKind::MediaProcessed, json!({}))
            .await;
        let other = log
            .append_event("media-b", AggregateType::Media, EventKind::MediaUploaded, json!({}))
            .await;

        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert_eq!(other.version, 1);
        assert_eq!(log.latest_version("media-a").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn since_filters_strictly_after() {
        let log = InMemoryEventLog::new();
        let first = log
            .append_event("media-a", AggregateType::Media, EventKind::MediaUploaded, json!({}))
            .await;

        let after = log.events_since(first.created_at).await.unwrap();
        assert!(after.iter().all(|e| e.id != first.id));

        let all = log.events_since(DateTime::UNIX_EPOCH).await.unwrap();
        assert_eq!(all.len(), 1);
    }
}
