//! The projection loop.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use lumina_events::{
    AggregateType, Event, EventKind, EventPayload, MediaProcessedData, MediaUploadedData,
    PayloadError,
};
use lumina_eventlog::{EventLog, EventLogError};
use lumina_store::OffsetStore;

use crate::read_model::{MediaReadModelStore, MediaStatus};

#[derive(Debug, Error)]
pub enum ProjectorError {
    #[error("event log read failed: {0}")]
    Log(#[from] EventLogError),

    #[error("read model mutation failed: {0}")]
    ReadModel(#[from] sqlx::Error),

    #[error("offset persistence failed: {0}")]
    Offset(#[from] lumina_store::StoreError),

    #[error(transparent)]
    Payload(#[from] PayloadError),
}

#[derive(Debug, Clone)]
pub struct ProjectorConfig {
    /// Key under which the watermark is persisted.
    pub name: String,
    pub poll_interval: Duration,
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self {
            name: "media-projector".to_string(),
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// Background projector for the media read model.
///
/// One instance owns one read model and one watermark. Each tick fetches
/// the batch after the watermark, applies it in log order, and durably
/// advances the watermark past the last event applied without error.
///
/// Batch discipline is halt-at-failing-event: if event N fails, the batch
/// stops with the watermark just before N, so N is re-attempted next tick.
/// A persistently poison event blocks the projector rather than silently
/// desyncing the read model.
pub struct Projector<L> {
    log: Arc<L>,
    store: MediaReadModelStore,
    offsets: OffsetStore,
    config: ProjectorConfig,
    // Cached watermark; the lock is held across the fetch-plus-persist
    // sequence so a concurrent rebuild cannot interleave.
    watermark: Mutex<Option<DateTime<Utc>>>,
}

impl<L: EventLog> Projector<L> {
    pub fn new(
        log: Arc<L>,
        store: MediaReadModelStore,
        offsets: OffsetStore,
        config: ProjectorConfig,
    ) -> Self {
        Self {
            log,
            store,
            offsets,
            config,
            watermark: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &MediaReadModelStore {
        &self.store
    }

    /// Poll forever. Errors are logged and retried on the next tick; the
    /// watermark never advances past a failure.
    pub async fn run(self: Arc<Self>) {
        info!(
            projector = %self.config.name,
            interval_ms = self.config.poll_interval.as_millis() as u64,
            "projector polling started"
        );

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.poll_once().await {
                Ok(0) => {}
                Ok(applied) => debug!(projector = %self.config.name, applied, "batch applied"),
                Err(err) => warn!(projector = %self.config.name, error = %err, "poll failed"),
            }
        }
    }

    /// One tick: fetch the batch after the watermark and apply it in order.
    /// Returns the number of events applied.
    pub async fn poll_once(&self) -> Result<usize, ProjectorError> {
        let mut watermark = self.watermark.lock().await;

        let since = match *watermark {
            Some(ts) => ts,
            None => self
                .offsets
                .load(&self.config.name)
                .await?
                .unwrap_or(DateTime::UNIX_EPOCH),
        };

        let events = self.log.events_since(since).await?;
        let (applied, last_applied) = self.apply_batch(&events, true).await;

        if let Some(ts) = last_applied {
            // One nanosecond past the last applied event, so the next poll
            // does not refetch it.
            let next = ts + ChronoDuration::nanoseconds(1);
            self.offsets.save(&self.config.name, next).await?;
            *watermark = Some(next);
        }

        Ok(applied)
    }

    /// Truncate the read model and replay the full log through the same
    /// handlers. Safe under concurrent appends: events arriving during the
    /// scan are picked up by subsequent polls, and the version guard
    /// prevents double application.
    pub async fn rebuild_from_log(&self) -> Result<usize, ProjectorError> {
        let mut watermark = self.watermark.lock().await;
        info!(projector = %self.config.name, "rebuilding read model from log");

        self.store.truncate().await?;
        let events = self.log.all_events().await?;
        let (applied, last_applied) = self.apply_batch(&events, false).await;

        if let Some(ts) = last_applied {
            let next = ts + ChronoDuration::nanoseconds(1);
            self.offsets.save(&self.config.name, next).await?;
            *watermark = Some(next);
        }

        info!(projector = %self.config.name, applied, "rebuild complete");
        Ok(applied)
    }

    /// Apply events in order. With `halt_on_error` the batch stops at the
    /// first failure (normal polling); without it failures are logged and
    /// skipped (rebuild, where the full scan must make it to the end).
    async fn apply_batch(
        &self,
        events: &[Event],
        halt_on_error: bool,
    ) -> (usize, Option<DateTime<Utc>>) {
        let mut applied = 0;
        let mut last_applied = None;

        for event in events {
            match self.apply(event).await {
                Ok(()) => {
                    applied += 1;
                    last_applied = Some(event.created_at);
                }
                Err(err) => {
                    warn!(
                        projector = %self.config.name,
                        event_id = %event.id,
                        event_type = %event.event_type,
                        error = %err,
                        "event application failed"
                    );
                    if halt_on_error {
                        break;
                    }
                }
            }
        }

        (applied, last_applied)
    }

    /// Dispatch one event to its read-model mutation. Events outside the
    /// media aggregate, and kinds this projector does not track, are
    /// ignored (and still advance the watermark).
    async fn apply(&self, event: &Event) -> Result<(), ProjectorError> {
        if event.aggregate_type != AggregateType::Media {
            return Ok(());
        }

        match event.event_type {
            EventKind::MediaUploaded => {
                let data = MediaUploadedData::decode(&event.data)?;
                self.store
                    .apply_uploaded(&event.aggregate_id, &data, event.version, event.created_at)
                    .await?;
            }
            EventKind::MediaProcessed => {
                let data = MediaProcessedData::decode(&event.data)?;
                self.store
                    .apply_processed(&event.aggregate_id, &data, event.version)
                    .await?;
            }
            EventKind::MediaProcessingFailed => {
                self.store
                    .apply_status(&event.aggregate_id, MediaStatus::Failed, event.version)
                    .await?;
            }
            EventKind::MediaDeleted => {
                self.store
                    .apply_status(&event.aggregate_id, MediaStatus::Deleted, event.version)
                    .await?;
            }
            EventKind::MediaUploadCompensated => {
                self.store
                    .apply_status(&event.aggregate_id, MediaStatus::Deleted, event.version)
                    .await?;
            }
            _ => {}
        }

        Ok(())
    }
}
