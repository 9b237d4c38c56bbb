//! The compensation walk and the shared retry discipline.

use tracing::{info, warn};

use crate::action::{StepAction, StepContext};
use crate::config::EngineConfig;
use crate::engine::SagaError;
use crate::instance::{SagaStatus, StepStatus};
use crate::registry::SagaDefinition;
use crate::store::SagaStore;

/// Synthetic `current_step` label while a saga is being unwound.
pub const COMPENSATE_LABEL: &str = "compensate";

/// Run an action under the engine's retry discipline: attempt k sleeps
/// `backoff_base * 2^(k-1)` before it runs, up to `max_retries` attempts.
/// Failed attempts persist `retry_count` and `last_error` on the step row
/// so a crashed engine can observe progress. Non-transient failures stop
/// retrying immediately.
///
/// Returns the action's result, or the last error message after
/// exhaustion.
pub async fn execute_with_retries(
    store: &SagaStore,
    step_id: &str,
    action: &dyn StepAction,
    ctx: &StepContext,
    config: &EngineConfig,
) -> Result<Result<serde_json::Value, String>, SagaError> {
    let mut last_error = String::from("no attempts were made");

    for attempt in 1..=config.max_retries {
        let delay = config.backoff_base * 2u32.pow(attempt - 1);
        tokio::time::sleep(delay).await;

        match tokio::time::timeout(config.step_timeout, action.run(ctx)).await {
            Ok(Ok(result)) => return Ok(Ok(result)),
            Ok(Err(err)) => {
                last_error = err.to_string();
                store
                    .record_attempt(step_id, attempt as i64, &last_error)
                    .await?;
                if !err.is_transient() {
                    break;
                }
            }
            Err(_elapsed) => {
                last_error = format!(
                    "step deadline of {:?} exceeded",
                    config.step_timeout
                );
                store
                    .record_attempt(step_id, attempt as i64, &last_error)
                    .await?;
            }
        }
    }

    Ok(Err(last_error))
}

/// Unwind a saga: walk its step records newest-first and invoke the
/// compensating action of every step whose forward effect may have
/// applied. Compensation is best-effort — a compensating action that
/// exhausts its retries is logged for the operator but never blocks the
/// saga from terminating. The saga always ends `failed`.
pub async fn run(
    store: &SagaStore,
    definition: &SagaDefinition,
    saga_id: &str,
    config: &EngineConfig,
) -> Result<(), SagaError> {
    store
        .set_step(saga_id, COMPENSATE_LABEL, SagaStatus::Compensating)
        .await?;

    let Some(saga) = store.get_saga(saga_id).await? else {
        return Ok(());
    };

    let steps = store.list_steps(saga_id).await?;
    for row in steps.iter().rev() {
        // Completed steps are undone; executing and failed steps may have
        // partially applied, so their compensation runs too. Compensated
        // rows and compensation records themselves are skipped.
        let may_have_applied = matches!(
            row.status,
            StepStatus::Completed | StepStatus::Executing | StepStatus::Failed
        );
        if !may_have_applied {
            continue;
        }
        let Some((_, step)) = definition.step_named(&row.step_name) else {
            continue;
        };
        let Some(compensation) = &step.compensation else {
            continue;
        };

        let comp_row = store
            .create_step(saga_id, &format!("compensate_{}", row.step_name))
            .await?;
        let ctx = StepContext::new(saga_id, saga.payload.clone());

        match execute_with_retries(store, &comp_row.id, compensation.as_ref(), &ctx, config).await?
        {
            Ok(result) => {
                store.record_result(&comp_row.id, &result).await?;
                store
                    .set_step_status(&comp_row.id, StepStatus::Completed)
                    .await?;
                // Only a step that actually went forward is marked
                // compensated; a failed step keeps its failure on record.
                if matches!(row.status, StepStatus::Completed | StepStatus::Executing) {
                    store
                        .set_step_status(&row.id, StepStatus::Compensated)
                        .await?;
                }
            }
            Err(error) => {
                store
                    .set_step_status(&comp_row.id, StepStatus::Failed)
                    .await?;
                warn!(
                    saga_id,
                    step = %row.step_name,
                    error = %error,
                    "compensation exhausted retries; operator intervention required"
                );
            }
        }
    }

    store.finish(saga_id, SagaStatus::Failed).await?;
    info!(saga_id, "saga failed after compensation");
    Ok(())
}
