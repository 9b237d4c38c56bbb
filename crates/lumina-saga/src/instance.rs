//! Persisted saga state.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Lifecycle of a saga instance.
///
/// ```text
/// started ──▶ in_progress ──▶ completed
///     │           │
///     ▼           ▼
/// compensating ──▶ failed
/// ```
///
/// `completed` and `failed` are terminal. Only the engine transitions
/// states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStatus {
    Started,
    InProgress,
    Compensating,
    Completed,
    Failed,
}

impl SagaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Started => "started",
            SagaStatus::InProgress => "in_progress",
            SagaStatus::Compensating => "compensating",
            SagaStatus::Completed => "completed",
            SagaStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaStatus::Completed | SagaStatus::Failed)
    }
}

impl fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SagaStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(SagaStatus::Started),
            "in_progress" => Ok(SagaStatus::InProgress),
            "compensating" => Ok(SagaStatus::Compensating),
            "completed" => Ok(SagaStatus::Completed),
            "failed" => Ok(SagaStatus::Failed),
            other => Err(format!("unknown saga status: {other}")),
        }
    }
}

/// Lifecycle of one step attempt record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Executing,
    Completed,
    Failed,
    Compensating,
    Compensated,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Executing => "executing",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Compensating => "compensating",
            StepStatus::Compensated => "compensated",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StepStatus::Pending),
            "executing" => Ok(StepStatus::Executing),
            "completed" => Ok(StepStatus::Completed),
            "failed" => Ok(StepStatus::Failed),
            "compensating" => Ok(StepStatus::Compensating),
            "compensated" => Ok(StepStatus::Compensated),
            other => Err(format!("unknown step status: {other}")),
        }
    }
}

/// A persisted workflow instance. Never deleted; terminal rows remain as
/// the audit record of the workflow.
#[derive(Debug, Clone, Serialize)]
pub struct SagaInstance {
    pub id: String,
    pub saga_type: String,
    /// Name of the step last begun, or the synthetic `compensate` label.
    pub current_step: String,
    pub status: SagaStatus,
    /// Accumulated context: the triggering event's data plus per-step
    /// results.
    pub payload: serde_json::Value,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SagaInstance {
    /// The correlation value this saga was keyed with at start.
    pub fn correlation_value(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(|value| value.as_str())
    }
}

/// One step attempt record. `retry_count` and `last_error` are persisted
/// between attempts so a restarted engine observes prior progress.
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub id: String,
    pub saga_id: String,
    pub step_name: String,
    pub status: StepStatus,
    pub result: serde_json::Value,
    pub retry_count: i64,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saga_status_round_trips() {
        for status in [
            SagaStatus::Started,
            SagaStatus::InProgress,
            SagaStatus::Compensating,
            SagaStatus::Completed,
            SagaStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<SagaStatus>().unwrap(), status);
        }
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        assert!(SagaStatus::Completed.is_terminal());
        assert!(SagaStatus::Failed.is_terminal());
        assert!(!SagaStatus::Started.is_terminal());
        assert!(!SagaStatus::InProgress.is_terminal());
        assert!(!SagaStatus::Compensating.is_terminal());
    }

    #[test]
    fn step_status_round_trips() {
        for status in [
            StepStatus::Pending,
            StepStatus::Executing,
            StepStatus::Completed,
            StepStatus::Failed,
            StepStatus::Compensating,
            StepStatus::Compensated,
        ] {
            assert_eq!(status.as_str().parse::<StepStatus>().unwrap(), status);
        }
    }
}
