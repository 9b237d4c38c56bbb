//! The static workflow registry.
//!
//! Adding a workflow means adding a definition here — engine code never
//! changes. Each definition is matched independently against incoming
//! events, so one event may start several workflow types.

use std::sync::Arc;
use thiserror::Error;

use lumina_events::{Event, EventKind};

use crate::action::StepAction;

/// Where a trigger event carries the value that identifies the saga it
/// belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correlation {
    /// The event's own `aggregate_id`.
    AggregateId,
    /// A named field inside the event payload (e.g. `media_id` on events
    /// whose own aggregate is a different entity).
    PayloadField(&'static str),
}

impl Correlation {
    /// Extract the correlation value from an event, if present.
    pub fn extract<'e>(&self, event: &'e Event) -> Option<&'e str> {
        match self {
            Correlation::AggregateId => Some(event.aggregate_id.as_str()),
            Correlation::PayloadField(field) => {
                event.data.get(*field).and_then(|value| value.as_str())
            }
        }
    }
}

/// One forward step of a workflow.
#[derive(Clone)]
pub struct StepDefinition {
    pub name: &'static str,
    /// The side effect that drives the step.
    pub action: Arc<dyn StepAction>,
    /// The step is complete when this event is observed in the log.
    pub success_trigger: EventKind,
    /// How the success trigger is matched back to its saga.
    pub correlation: Correlation,
    /// Semantic undo of the step; `None` marks a terminal non-reversible
    /// step.
    pub compensation: Option<Arc<dyn StepAction>>,
}

impl std::fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepDefinition")
            .field("name", &self.name)
            .field("success_trigger", &self.success_trigger)
            .field("correlation", &self.correlation)
            .field("compensable", &self.compensation.is_some())
            .finish()
    }
}

/// A workflow type: its trigger topology and ordered forward steps.
#[derive(Debug, Clone)]
pub struct SagaDefinition {
    pub saga_type: &'static str,
    /// Appearance of this event starts a new instance.
    pub start_trigger: EventKind,
    /// Appearance of any of these aborts an active instance.
    pub failure_triggers: Vec<EventKind>,
    /// The key in the saga payload that trigger correlation values are
    /// matched against.
    pub correlation_key: &'static str,
    pub steps: Vec<StepDefinition>,
}

impl SagaDefinition {
    pub fn first_step(&self) -> &StepDefinition {
        // Registration rejects empty workflows.
        &self.steps[0]
    }

    pub fn step_named(&self, name: &str) -> Option<(usize, &StepDefinition)> {
        self.steps
            .iter()
            .enumerate()
            .find(|(_, step)| step.name == name)
    }

    /// The step after the given index, or `None` if it was the last.
    pub fn step_after(&self, index: usize) -> Option<&StepDefinition> {
        self.steps.get(index + 1)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("workflow {saga_type} defines no steps")]
    EmptyWorkflow { saga_type: &'static str },

    #[error("workflow {saga_type} defines step {step} more than once")]
    DuplicateStepName {
        saga_type: &'static str,
        step: &'static str,
    },

    #[error("workflow type {saga_type} is already registered")]
    DuplicateSagaType { saga_type: &'static str },

    #[error("workflow {saga_type}: step {step} reuses the start trigger {trigger}")]
    TriggerConflict {
        saga_type: &'static str,
        step: &'static str,
        trigger: EventKind,
    },
}

/// All known workflow types. Built once at startup; consulted by the
/// engine on every event.
#[derive(Debug, Default)]
pub struct SagaRegistry {
    definitions: Vec<SagaDefinition>,
}

impl SagaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and add a workflow definition.
    pub fn register(&mut self, definition: SagaDefinition) -> Result<(), RegistryError> {
        if definition.steps.is_empty() {
            return Err(RegistryError::EmptyWorkflow {
                saga_type: definition.saga_type,
            });
        }

        if self
            .definitions
            .iter()
            .any(|existing| existing.saga_type == definition.saga_type)
        {
            return Err(RegistryError::DuplicateSagaType {
                saga_type: definition.saga_type,
            });
        }

        for (index, step) in definition.steps.iter().enumerate() {
            if definition.steps[..index].iter().any(|s| s.name == step.name) {
                return Err(RegistryError::DuplicateStepName {
                    saga_type: definition.saga_type,
                    step: step.name,
                });
            }
            if step.success_trigger == definition.start_trigger {
                return Err(RegistryError::TriggerConflict {
                    saga_type: definition.saga_type,
                    step: step.name,
                    trigger: step.success_trigger,
                });
            }
        }

        self.definitions.push(definition);
        Ok(())
    }

    pub fn get(&self, saga_type: &str) -> Option<&SagaDefinition> {
        self.definitions
            .iter()
            .find(|def| def.saga_type == saga_type)
    }

    /// Workflow types a given event kind starts.
    pub fn started_by(&self, kind: EventKind) -> impl Iterator<Item = &SagaDefinition> {
        self.definitions
            .iter()
            .filter(move |def| def.start_trigger == kind)
    }

    /// Workflow types a given event kind aborts.
    pub fn aborted_by(&self, kind: EventKind) -> impl Iterator<Item = &SagaDefinition> {
        self.definitions
            .iter()
            .filter(move |def| def.failure_triggers.contains(&kind))
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }
}
