//! SQLite adapter for the event log.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;
use std::path::Path;
use uuid::Uuid;

use lumina_events::{AppendEvent, Event};
use lumina_store::{apply_schema, connect, connect_in_memory};

use crate::store::{EventLog, EventLogError};

// `seq` is the committed tie-breaker for identical `created_at`: every
// timestamp-ordered read orders by (created_at, seq), so repeated calls
// return ties in the same insertion order. The unique index on
// (aggregate_id, version) is the serialization point for concurrent
// appends to one aggregate.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    aggregate_id TEXT NOT NULL,
    aggregate_type TEXT NOT NULL,
    event_type TEXT NOT NULL,
    data TEXT NOT NULL,
    version INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_events_aggregate_version
    ON events(aggregate_id, version);

CREATE INDEX IF NOT EXISTS idx_events_event_type
    ON events(event_type);

CREATE INDEX IF NOT EXISTS idx_events_created_at
    ON events(created_at);
"#;

/// File- or memory-backed event log.
#[derive(Debug, Clone)]
pub struct SqliteEventLog {
    pool: SqlitePool,
}

impl SqliteEventLog {
    /// Open (creating if missing) a file-backed log.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, EventLogError> {
        let pool = connect(path).await.map_err(store_err)?;
        apply_schema(&pool, SCHEMA).await.map_err(store_err)?;
        Ok(Self { pool })
    }

    /// In-memory log for tests.
    pub async fn in_memory() -> Result<Self, EventLogError> {
        let pool = connect_in_memory().await.map_err(store_err)?;
        apply_schema(&pool, SCHEMA).await.map_err(store_err)?;
        Ok(Self { pool })
    }

    async fn fetch(&self, query: &str, bind: Option<String>) -> Result<Vec<Event>, EventLogError> {
        let mut q = sqlx::query_as::<_, EventRow>(query);
        if let Some(value) = bind {
            q = q.bind(value);
        }
        let rows = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(EventRow::into_event).collect()
    }
}

fn store_err(err: lumina_store::StoreError) -> EventLogError {
    let lumina_store::StoreError::Database(inner) = err;
    EventLogError::Database(inner)
}

fn encode_ts(ts: DateTime<Utc>) -> String {
    // Fixed-width nanosecond RFC 3339 in UTC, so lexicographic order on the
    // TEXT column equals chronological order and the projector's
    // one-nanosecond watermark bump survives the round trip.
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

#[async_trait]
impl EventLog for SqliteEventLog {
    async fn append(&self, event: AppendEvent) -> Result<Event, EventLogError> {
        if event.aggregate_id.trim().is_empty() {
            return Err(EventLogError::InvalidRequest(
                "aggregate_id must not be empty".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        let latest: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version), 0) FROM events WHERE aggregate_id = ?",
        )
        .bind(&event.aggregate_id)
        .fetch_one(&mut *tx)
        .await?;

        let stored = Event {
            id: Uuid::new_v4().to_string(),
            aggregate_id: event.aggregate_id,
            aggregate_type: event.aggregate_type,
            event_type: event.event_type,
            data: event.data,
            version: latest + 1,
            created_at: Utc::now(),
        };

        let inserted = sqlx::query(
            r#"
            INSERT INTO events (id, aggregate_id, aggregate_type, event_type, data, version, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&stored.id)
        .bind(&stored.aggregate_id)
        .bind(stored.aggregate_type.as_str())
        .bind(stored.event_type.as_str())
        .bind(stored.data.to_string())
        .bind(stored.version)
        .bind(encode_ts(stored.created_at))
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                return Err(EventLogError::VersionConflict {
                    aggregate_id: stored.aggregate_id,
                    version: stored.version,
                });
            }
            Err(other) => return Err(other.into()),
        }

        tx.commit().await?;
        Ok(stored)
    }

    async fn events_by_aggregate(&self, aggregate_id: &str) -> Result<Vec<Event>, EventLogError> {
        self.fetch(
            "SELECT id, aggregate_id, aggregate_type, event_type, data, version, created_at \
             FROM events WHERE aggregate_id = ? ORDER BY version ASC",
            Some(aggregate_id.to_string()),
        )
        .await
    }

    async fn events_by_kind(
        &self,
        kind: lumina_events::EventKind,
    ) -> Result<Vec<Event>, EventLogError> {
        self.fetch(
            "SELECT id, aggregate_id, aggregate_type, event_type, data, version, created_at \
             FROM events WHERE event_type = ? ORDER BY created_at ASC, seq ASC",
            Some(kind.as_str().to_string()),
        )
        .await
    }

    async fn events_since(&self, since: DateTime<Utc>) -> Result<Vec<Event>, EventLogError> {
        self.fetch(
            "SELECT id, aggregate_id, aggregate_type, event_type, data, version, created_at \
             FROM events WHERE created_at > ? ORDER BY created_at ASC, seq ASC",
            Some(encode_ts(since)),
        )
        .await
    }

    async fn latest_version(&self, aggregate_id: &str) -> Result<i64, EventLogError> {
        let version: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version), 0) FROM events WHERE aggregate_id = ?",
        )
        .bind(aggregate_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(version)
    }

    async fn all_events(&self) -> Result<Vec<Event>, EventLogError> {
        self.fetch(
            "SELECT id, aggregate_id, aggregate_type, event_type, data, version, created_at \
             FROM events ORDER BY created_at ASC, seq ASC",
            None,
        )
        .await
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: String,
    aggregate_id: String,
    aggregate_type: String,
    event_type: String,
    data: String,
    version: i64,
    created_at: String,
}

impl EventRow {
    fn into_event(self) -> Result<Event, EventLogError> {
        let aggregate_type = self
            .aggregate_type
            .parse()
            .map_err(|e| EventLogError::Corrupt(format!("event {}: {e}", self.id)))?;
        let event_type = self
            .event_type
            .parse()
            .map_err(|e| EventLogError::Corrupt(format!("event {}: {e}", self.id)))?;
        let data = serde_json::from_str(&self.data)
            .map_err(|e| EventLogError::Corrupt(format!("event {}: bad data: {e}", self.id)))?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| EventLogError::Corrupt(format!("event {}: bad timestamp: {e}", self.id)))?
            .with_timezone(&Utc);

        Ok(Event {
            id: self.id,
            aggregate_id: self.aggregate_id,
            aggregate_type,
            event_type,
            data,
            version: self.version,
            created_at,
        })
    }
}
