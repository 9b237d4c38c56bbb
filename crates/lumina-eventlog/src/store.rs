//! EventLog port trait and error taxonomy.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lumina_events::{AppendEvent, Event, EventKind};
use thiserror::Error;

/// Errors surfaced by any [`EventLog`] adapter.
///
/// The taxonomy is by effect: validation errors are never retried, version
/// conflicts are retried by the caller after refetching, and transient
/// infrastructure errors are retried by the engines with backoff.
#[derive(Debug, Error)]
pub enum EventLogError {
    /// Bad input shape or unknown enumeration value. Never retried.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A concurrent append raced to the same `(aggregate_id, version)`.
    /// Callers may refetch the latest version and reissue.
    #[error("version conflict on aggregate {aggregate_id} at version {version}")]
    VersionConflict { aggregate_id: String, version: i64 },

    /// Local storage failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row no longer matches the catalog or its payload encoding.
    #[error("stored event is corrupt: {0}")]
    Corrupt(String),

    /// Network-level failure reaching a remote log.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The remote log answered with an unexpected status.
    #[error("event log returned status {status}: {message}")]
    Remote { status: u16, message: String },
}

impl EventLogError {
    /// Whether a retry with backoff is worthwhile. Validation errors and
    /// conflicts are not transient; infrastructure failures are.
    pub fn is_transient(&self) -> bool {
        match self {
            EventLogError::InvalidRequest(_) | EventLogError::VersionConflict { .. } => false,
            EventLogError::Database(_) | EventLogError::Corrupt(_) => true,
            EventLogError::Transport(_) => true,
            EventLogError::Remote { status, .. } => *status >= 500,
        }
    }
}

/// The append/read protocol of the event log.
///
/// Append is atomic: an event is either fully visible to all readers or not
/// at all, and never changes after visibility. All `created_at`-ordered
/// reads break timestamp ties by committed insertion order, stable across
/// repeated calls.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Persist a new event at the aggregate's next version.
    async fn append(&self, event: AppendEvent) -> Result<Event, EventLogError>;

    /// All events for one aggregate, ascending by version. Unknown
    /// aggregates yield an empty sequence, not an error.
    async fn events_by_aggregate(&self, aggregate_id: &str) -> Result<Vec<Event>, EventLogError>;

    /// All events of one kind, ascending by `created_at`.
    async fn events_by_kind(&self, kind: EventKind) -> Result<Vec<Event>, EventLogError>;

    /// Events with `created_at > since`, ascending by `created_at`. The
    /// core primitive for projectors and the saga engine.
    async fn events_since(&self, since: DateTime<Utc>) -> Result<Vec<Event>, EventLogError>;

    /// Current maximum version for an aggregate; 0 if none exist.
    async fn latest_version(&self, aggregate_id: &str) -> Result<i64, EventLogError>;

    /// Full scan ascending by `created_at`. Intended only for read-model
    /// rebuild.
    async fn all_events(&self) -> Result<Vec<Event>, EventLogError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transience_classification() {
        assert!(!EventLogError::InvalidRequest("bad".into()).is_transient());
        assert!(
            !EventLogError::VersionConflict {
                aggregate_id: "media-a".into(),
                version: 2
            }
            .is_transient()
        );
        assert!(
            EventLogError::Remote {
                status: 503,
                message: "unavailable".into()
            }
            .is_transient()
        );
        assert!(
            !EventLogError::Remote {
                status: 404,
                message: "missing".into()
            }
            .is_transient()
        );
    }
}
