//! Records read from and written to the workflow store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{EventId, InstanceId, InstanceStatus, StepId, StepStatus, WorkflowId};

/// Static workflow definition, keyed by its unique `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    #[serde(rename = "type")]
    pub workflow_type: String,
    pub description: String,
    /// States that start a new instance of this workflow.
    pub initiating_states: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Returns true if an event in `state` starts a new saga.
    pub fn is_initiating_state(&self, state: &str) -> bool {
        self.initiating_states.iter().any(|s| s == state)
    }
}

/// A catalog step reachable from a `(type, state)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub step_id: StepId,
    /// The state this step is routed from.
    pub state: String,
    pub service: String,
    pub name: String,
    pub description: String,
    /// Topic the command event is published to.
    pub topic: String,
}

/// One execution of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: InstanceId,
    pub workflow_id: WorkflowId,
    pub status: InstanceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One dispatched step of an instance and its eventual outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstanceStep {
    pub id: i64,
    /// The command event this row represents.
    pub event_id: EventId,
    pub workflow_instance_id: InstanceId,
    pub step_id: StepId,
    pub status: StepStatus,
    /// Serialized snapshot of the last event seen for this step.
    pub event_message: Option<String>,
    pub status_code: Option<i32>,
    pub response: Option<serde_json::Value>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Parameters for recording a newly dispatched step.
#[derive(Debug, Clone)]
pub struct NewInstanceStep {
    pub event_id: EventId,
    pub workflow_instance_id: InstanceId,
    pub step_id: StepId,
    pub status: StepStatus,
    pub event_message: String,
    pub started_at: DateTime<Utc>,
}

/// Outcome reported by a completion event, applied to the matching step row.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub event_id: EventId,
    pub status: StepStatus,
    pub status_code: i32,
    pub response: serde_json::Value,
    pub event_message: String,
    pub completed_at: DateTime<Utc>,
}

/// A step row together with the topic of its catalog step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceStepWithTopic {
    pub step: WorkflowInstanceStep,
    pub topic: String,
}

/// Status of one step row joined with its instance and workflow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceStepStatus {
    pub workflow_id: WorkflowId,
    pub workflow_type: String,
    pub instance_id: InstanceId,
    pub instance_status: InstanceStatus,
    pub step_status: StepStatus,
    pub step_id: StepId,
}

/// Parameters for an audit log entry.
#[derive(Debug, Clone)]
pub struct NewProcessLog {
    pub event_id: EventId,
    pub workflow_instance_id: InstanceId,
    pub state: String,
    pub status: String,
    pub status_code: i32,
    pub event_message: String,
}

/// Raw inbound event recorded for auditing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessLog {
    pub id: i64,
    pub event_id: EventId,
    pub workflow_instance_id: InstanceId,
    pub state: String,
    pub status: String,
    pub status_code: i32,
    pub event_message: String,
    pub created_at: DateTime<Utc>,
}
