//! The stuck-saga detector.
//!
//! The backstop that guarantees every saga eventually terminates: a slow
//! loop that force-fails instances that have not moved within the
//! threshold, giving stuck compensations one final pass first.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::compensation;
use crate::config::EngineConfig;
use crate::engine::SagaError;
use crate::instance::SagaStatus;
use crate::registry::SagaRegistry;
use crate::store::SagaStore;

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Sweep cadence.
    pub interval: Duration,
    /// Age of `updated_at` beyond which a non-terminal saga counts as
    /// stuck.
    pub threshold: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            threshold: Duration::from_secs(300),
        }
    }
}

pub struct StuckSagaDetector {
    store: SagaStore,
    registry: Arc<SagaRegistry>,
    config: DetectorConfig,
    engine_config: EngineConfig,
}

impl StuckSagaDetector {
    pub fn new(
        store: SagaStore,
        registry: Arc<SagaRegistry>,
        config: DetectorConfig,
        engine_config: EngineConfig,
    ) -> Self {
        Self {
            store,
            registry,
            config,
            engine_config,
        }
    }

    pub async fn run(self: Arc<Self>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            threshold_secs = self.config.threshold.as_secs(),
            "stuck-saga detector started"
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = self.run_once().await {
                warn!(error = %err, "stuck-saga sweep failed");
            }
        }
    }

    /// One sweep. Returns how many sagas were forced to a terminal state.
    pub async fn run_once(&self) -> Result<usize, SagaError> {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(self.config.threshold)
                .unwrap_or_else(|_| ChronoDuration::seconds(300));

        let stuck = self.store.stuck_sagas(cutoff).await?;
        let mut terminated = 0;

        for saga in stuck {
            match saga.status {
                SagaStatus::Compensating => {
                    warn!(
                        saga_id = %saga.id,
                        "saga stuck mid-compensation; retrying compensation once"
                    );
                    if let Some(definition) = self.registry.get(&saga.saga_type) {
                        compensation::run(&self.store, definition, &saga.id, &self.engine_config)
                            .await?;
                    } else {
                        self.store.finish(&saga.id, SagaStatus::Failed).await?;
                    }
                    terminated += 1;
                }
                SagaStatus::InProgress => {
                    // The forward step is presumed permanently stuck; the
                    // operator diagnoses from the step records.
                    warn!(
                        saga_id = %saga.id,
                        current_step = %saga.current_step,
                        "saga stuck in progress; forcing failed"
                    );
                    self.store.finish(&saga.id, SagaStatus::Failed).await?;
                    terminated += 1;
                }
                _ => {}
            }
        }

        Ok(terminated)
    }
}
