//! Saga error types.

use common::{EventId, InstanceId, StepStatus};
use global_event::CodecError;
use messaging::MessagingError;
use thiserror::Error;
use workflow_store::StoreError;

/// Errors that can occur while orchestrating or retrying saga steps.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The inbound event is missing its correlation ids.
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// No workflow is registered for the event type.
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    /// A non-initiating event refers to an instance that does not exist.
    #[error("Workflow instance not found: {0}")]
    InstanceNotFound(InstanceId),

    /// No step row matches the retry target.
    #[error("Step not found: event {event_id} of instance {instance_id}")]
    StepNotFound {
        event_id: EventId,
        instance_id: InstanceId,
    },

    /// Only steps that ended in ERROR can be retried.
    #[error("step is not in failed state: event {event_id} is {status}")]
    StepNotFailed { event_id: EventId, status: StepStatus },

    /// The step row carries no event snapshot to replay.
    #[error("Step {0} has no stored event to retry")]
    MissingSnapshot(EventId),

    /// The stored snapshot does not decode as an event.
    #[error("Stored event of step {event_id} is malformed: {source}")]
    InvalidSnapshot {
        event_id: EventId,
        source: CodecError,
    },

    /// A retry override cannot be applied.
    #[error("Invalid retry override: {0}")]
    InvalidOverride(String),

    /// Reading step statuses for terminal resolution failed.
    #[error("Cannot resolve terminal status: {0}")]
    TerminalResolution(#[source] StoreError),

    /// Workflow store error.
    #[error("Workflow store error: {0}")]
    Store(#[from] StoreError),

    /// Event encoding or payload merge error.
    #[error("Event codec error: {0}")]
    Codec(#[from] CodecError),

    /// Publishing error.
    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),
}

impl SagaError {
    /// Returns true for errors caused by the caller's input rather than the system.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            SagaError::InvalidEvent(_)
                | SagaError::StepNotFailed { .. }
                | SagaError::MissingSnapshot(_)
                | SagaError::InvalidSnapshot { .. }
                | SagaError::InvalidOverride(_)
        )
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
