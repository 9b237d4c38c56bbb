//! The saga engine loop.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use lumina_events::Event;
use lumina_eventlog::{EventLog, EventLogError};
use lumina_store::OffsetStore;

use crate::action::StepContext;
use crate::compensation;
use crate::config::EngineConfig;
use crate::instance::{SagaInstance, SagaStatus, StepStatus};
use crate::registry::{SagaDefinition, SagaRegistry, StepDefinition};
use crate::store::SagaStore;

#[derive(Debug, Error)]
pub enum SagaError {
    #[error("saga store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("event log read failed: {0}")]
    Log(#[from] EventLogError),

    #[error("offset persistence failed: {0}")]
    Offset(#[from] lumina_store::StoreError),
}

/// Drives workflow instances forward from events observed in the log.
///
/// A single background loop polls `GetSince(watermark)` and matches each
/// event against the registry's triggers: start triggers create instances,
/// success triggers advance them, failure triggers send them into
/// compensation. All instance state is persisted, so crash recovery is
/// simply resuming the poll from the durable watermark.
pub struct SagaEngine<L> {
    log: Arc<L>,
    store: SagaStore,
    registry: Arc<SagaRegistry>,
    offsets: OffsetStore,
    config: EngineConfig,
    watermark: Mutex<Option<DateTime<Utc>>>,
}

impl<L: EventLog> SagaEngine<L> {
    pub fn new(
        log: Arc<L>,
        store: SagaStore,
        registry: Arc<SagaRegistry>,
        offsets: OffsetStore,
        config: EngineConfig,
    ) -> Self {
        Self {
            log,
            store,
            registry,
            offsets,
            config,
            watermark: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &SagaStore {
        &self.store
    }

    /// Poll forever. Transient failures are logged and retried next tick
    /// with the watermark unmoved.
    pub async fn run(self: Arc<Self>) {
        info!(
            interval_ms = self.config.poll_interval.as_millis() as u64,
            workflows = self.registry.len(),
            "saga engine polling started"
        );

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.poll_once().await {
                Ok(0) => {}
                Ok(handled) => debug!(handled, "saga poll handled events"),
                Err(err) => warn!(error = %err, "saga poll failed"),
            }
        }
    }

    /// One tick of the poll loop. Events are handled in log order; the
    /// watermark advances only through the events handled without error,
    /// halting at the first failure so it is re-attempted next tick.
    pub async fn poll_once(&self) -> Result<usize, SagaError> {
        let mut watermark = self.watermark.lock().await;

        let since = match *watermark {
            Some(ts) => ts,
            None => self
                .offsets
                .load(&self.config.offset_name)
                .await?
                .unwrap_or(DateTime::UNIX_EPOCH),
        };

        let events = self.log.events_since(since).await?;
        let mut handled = 0;
        let mut last_handled = None;

        for event in &events {
            match self.handle_event(event).await {
                Ok(()) => {
                    handled += 1;
                    last_handled = Some(event.created_at);
                }
                Err(err) => {
                    warn!(event_id = %event.id, error = %err, "event handling failed");
                    break;
                }
            }
        }

        if let Some(ts) = last_handled {
            let next = ts + ChronoDuration::nanoseconds(1);
            self.offsets.save(&self.config.offset_name, next).await?;
            *watermark = Some(next);
        }

        Ok(handled)
    }

    /// Match one event against every registered trigger. Called by the
    /// poll loop and by the synchronous notify surface.
    pub async fn handle_event(&self, event: &Event) -> Result<(), SagaError> {
        let kind = event.event_type;

        for definition in self.registry.started_by(kind) {
            self.start_saga(definition, event).await?;
        }

        let aborted: Vec<_> = self.registry.aborted_by(kind).collect();
        for definition in aborted {
            self.abort_matching(definition, event).await?;
        }

        self.advance_matching(event).await?;
        Ok(())
    }

    /// Create an instance for a start trigger and dispatch its first step.
    ///
    /// Delivery is at-least-once, so a replayed start trigger for an
    /// already-running instance is a no-op.
    async fn start_saga(
        &self,
        definition: &SagaDefinition,
        event: &Event,
    ) -> Result<(), SagaError> {
        let already_running = self.store.list_active().await?.into_iter().any(|saga| {
            saga.saga_type == definition.saga_type
                && saga.correlation_value(definition.correlation_key)
                    == Some(event.aggregate_id.as_str())
        });
        if already_running {
            debug!(
                saga_type = definition.saga_type,
                aggregate_id = %event.aggregate_id,
                "start trigger replayed for a running saga; ignoring"
            );
            return Ok(());
        }

        let payload = serde_json::json!({
            definition.correlation_key: event.aggregate_id,
            "upload_data": event.data,
        });

        let first = definition.first_step();
        let saga = self
            .store
            .create_saga(definition.saga_type, first.name, payload)
            .await?;

        info!(
            saga_id = %saga.id,
            saga_type = definition.saga_type,
            aggregate_id = %event.aggregate_id,
            "saga started"
        );

        self.dispatch(&saga, definition, first).await
    }

    /// Advance any active saga whose current step is completed by this
    /// event. Locating the saga is a linear scan over active instances
    /// matched on the stored correlation value.
    async fn advance_matching(&self, event: &Event) -> Result<(), SagaError> {
        for saga in self.store.list_active().await? {
            if saga.status == SagaStatus::Compensating {
                continue;
            }
            let Some(definition) = self.registry.get(&saga.saga_type) else {
                continue;
            };
            let Some((index, step)) = definition.step_named(&saga.current_step) else {
                continue;
            };
            if step.success_trigger != event.event_type {
                continue;
            }
            let Some(value) = step.correlation.extract(event) else {
                continue;
            };
            if saga.correlation_value(definition.correlation_key) != Some(value) {
                continue;
            }

            self.advance(&saga, definition, index).await?;
        }

        Ok(())
    }

    /// Mark the current step completed and either dispatch the next step
    /// or complete the saga.
    async fn advance(
        &self,
        saga: &SagaInstance,
        definition: &SagaDefinition,
        step_index: usize,
    ) -> Result<(), SagaError> {
        let step = &definition.steps[step_index];

        match self.store.find_step(&saga.id, step.name).await? {
            Some(row) if row.status != StepStatus::Completed => {
                self.store
                    .set_step_status(&row.id, StepStatus::Completed)
                    .await?;
            }
            Some(_) => {}
            None => {
                // The forward call succeeded on a previous engine
                // incarnation that crashed before recording it.
                let row = self.store.create_step(&saga.id, step.name).await?;
                self.store
                    .set_step_status(&row.id, StepStatus::Completed)
                    .await?;
            }
        }

        match definition.step_after(step_index) {
            Some(next) => {
                debug!(saga_id = %saga.id, step = next.name, "saga advancing");
                self.dispatch(saga, definition, next).await
            }
            None => {
                info!(saga_id = %saga.id, saga_type = %saga.saga_type, "saga completed");
                self.store.finish(&saga.id, SagaStatus::Completed).await?;
                Ok(())
            }
        }
    }

    /// Send every matching active saga into compensation.
    async fn abort_matching(
        &self,
        definition: &SagaDefinition,
        event: &Event,
    ) -> Result<(), SagaError> {
        for saga in self.store.list_active().await? {
            if saga.saga_type != definition.saga_type
                || saga.status == SagaStatus::Compensating
                || saga.correlation_value(definition.correlation_key)
                    != Some(event.aggregate_id.as_str())
            {
                continue;
            }

            // The in-flight step did not succeed; record why before the
            // compensation walk.
            if let Some(row) = self.store.find_step(&saga.id, &saga.current_step).await? {
                if !matches!(row.status, StepStatus::Completed | StepStatus::Compensated) {
                    if let Some(reason) = event.data.get("reason").and_then(|v| v.as_str()) {
                        self.store
                            .record_attempt(&row.id, row.retry_count, reason)
                            .await?;
                    }
                    self.store.set_step_status(&row.id, StepStatus::Failed).await?;
                }
            }

            warn!(
                saga_id = %saga.id,
                trigger = %event.event_type,
                "failure trigger observed; compensating"
            );
            compensation::run(&self.store, definition, &saga.id, &self.config).await?;
        }

        Ok(())
    }

    /// Record a step attempt and run its forward action under the retry
    /// discipline. Exhaustion marks the step failed and begins
    /// compensation.
    async fn dispatch(
        &self,
        saga: &SagaInstance,
        definition: &SagaDefinition,
        step: &StepDefinition,
    ) -> Result<(), SagaError> {
        self.store
            .set_step(&saga.id, step.name, SagaStatus::InProgress)
            .await?;
        let row = self.store.create_step(&saga.id, step.name).await?;
        let ctx = StepContext::new(&saga.id, saga.payload.clone());

        let outcome = compensation::execute_with_retries(
            &self.store,
            &row.id,
            step.action.as_ref(),
            &ctx,
            &self.config,
        )
        .await?;

        match outcome {
            Ok(result) => {
                self.store.record_result(&row.id, &result).await?;
                self.store
                    .merge_step_result(&saga.id, step.name, &result)
                    .await?;
                debug!(saga_id = %saga.id, step = step.name, "forward action accepted");
                Ok(())
            }
            Err(last_error) => {
                self.store.set_step_status(&row.id, StepStatus::Failed).await?;
                warn!(
                    saga_id = %saga.id,
                    step = step.name,
                    error = %last_error,
                    "step exhausted retries; compensating"
                );
                compensation::run(&self.store, definition, &saga.id, &self.config).await
            }
        }
    }
}
