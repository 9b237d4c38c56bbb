//! Step actions: the forward and compensating side effects of a workflow.

use async_trait::async_trait;
use thiserror::Error;

use lumina_events::{EventPayload, MediaUploadedData};

/// Failure of a forward or compensating action.
#[derive(Debug, Error)]
pub enum ActionError {
    /// The collaborator answered outside 2xx.
    #[error("collaborator returned status {status}: {message}")]
    Remote { status: u16, message: String },

    /// The collaborator was unreachable or the call timed out.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The saga payload lacks context the action needs. Retrying cannot
    /// help; the workflow is malformed.
    #[error("saga payload is missing required context: {0}")]
    MissingContext(String),
}

impl ActionError {
    /// Retry classification: infrastructure failures and conflicts are
    /// worth backing off on; other 4xx answers are permanent step
    /// failures and trigger compensation immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            ActionError::Transport(_) => true,
            ActionError::Remote { status, .. } => *status >= 500 || *status == 409,
            ActionError::MissingContext(_) => false,
        }
    }
}

/// Execution context handed to every action: the owning saga's id and its
/// accumulated payload.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub saga_id: String,
    pub payload: serde_json::Value,
}

impl StepContext {
    pub fn new(saga_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            saga_id: saga_id.into(),
            payload,
        }
    }

    /// The media aggregate this saga coordinates.
    pub fn media_aggregate_id(&self) -> Result<&str, ActionError> {
        self.payload
            .get("media_aggregate_id")
            .and_then(|value| value.as_str())
            .ok_or_else(|| ActionError::MissingContext("media_aggregate_id".to_string()))
    }

    /// The upload payload the saga was seeded with.
    pub fn upload_data(&self) -> Result<MediaUploadedData, ActionError> {
        let raw = self
            .payload
            .get("upload_data")
            .ok_or_else(|| ActionError::MissingContext("upload_data".to_string()))?;
        MediaUploadedData::decode(raw)
            .map_err(|err| ActionError::MissingContext(err.to_string()))
    }
}

/// One side effect of a workflow step: an idempotent call into a remote
/// collaborator. The engine owns retries and persistence; actions only
/// perform the call and report what happened.
#[async_trait]
pub trait StepAction: Send + Sync {
    async fn run(&self, ctx: &StepContext) -> Result<serde_json::Value, ActionError>;
}
