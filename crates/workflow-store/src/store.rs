use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    CatalogDefinition, EventId, InstanceId, InstanceStatus, InstanceStepStatus,
    InstanceStepWithTopic, NewInstanceStep, NewProcessLog, ProcessLog, Result, Step, StepId,
    StepOutcome, Workflow, WorkflowId, WorkflowInstance, WorkflowInstanceStep,
};

/// Storage interface consumed by the orchestrator and the retry engine.
///
/// Lookups return `Ok(None)` when nothing matches; callers decide whether a
/// missing record is fatal. All implementations must be thread-safe.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Loads a catalog definition. Loading the same definition twice is a no-op.
    async fn seed_catalog(&self, catalog: &CatalogDefinition) -> Result<()>;

    /// Finds a workflow by its unique type.
    async fn find_workflow_by_type(&self, workflow_type: &str) -> Result<Option<Workflow>>;

    /// Returns the steps routed from `(workflow_type, state)`, in catalog order.
    async fn find_steps_by_type_and_state(
        &self,
        workflow_type: &str,
        state: &str,
    ) -> Result<Vec<Step>>;

    /// Returns every step routed from any state of `workflow_type`.
    async fn find_steps_by_type(&self, workflow_type: &str) -> Result<Vec<Step>>;

    /// Returns the upstream sources a step needs as input, in merge order.
    async fn find_payload_keys_by_step_id(&self, step_id: StepId) -> Result<Vec<String>>;

    /// Creates an instance. Fails with `AlreadyExists` if the id is taken.
    async fn create_workflow_instance(
        &self,
        id: &InstanceId,
        workflow_id: WorkflowId,
        status: InstanceStatus,
    ) -> Result<WorkflowInstance>;

    async fn find_workflow_instance_by_id(&self, id: &InstanceId)
    -> Result<Option<WorkflowInstance>>;

    /// Sets the status of an instance and bumps `updated_at`.
    async fn update_workflow_instance(&self, id: &InstanceId, status: InstanceStatus)
    -> Result<()>;

    /// Records a dispatched step. Fails with `AlreadyExists` on a duplicate event id.
    async fn create_workflow_instance_step(
        &self,
        step: NewInstanceStep,
    ) -> Result<WorkflowInstanceStep>;

    async fn find_workflow_instance_step_by_event_id(
        &self,
        event_id: &EventId,
    ) -> Result<Option<WorkflowInstanceStep>>;

    /// Applies a completion event's outcome to the step row with the same event id.
    async fn update_workflow_instance_step(&self, outcome: StepOutcome) -> Result<()>;

    /// Puts a step row back in progress with a new snapshot, clearing `completed_at`.
    async fn restart_workflow_instance_step(
        &self,
        event_id: &EventId,
        event_message: String,
        started_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Finds a step row of an instance together with its catalog topic.
    async fn find_workflow_instance_step_by_event_id_and_instance_id(
        &self,
        event_id: &EventId,
        instance_id: &InstanceId,
    ) -> Result<Option<InstanceStepWithTopic>>;

    /// Returns the status of every step row of an instance of `workflow_type`.
    async fn find_workflow_instance_steps_by_type_and_instance_id(
        &self,
        workflow_type: &str,
        instance_id: &InstanceId,
    ) -> Result<Vec<InstanceStepStatus>>;

    /// Returns every step row of an instance, oldest first.
    async fn find_workflow_instance_steps(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Vec<WorkflowInstanceStep>>;

    /// Returns in-progress step rows started before `started_before`.
    async fn find_stale_instance_steps(
        &self,
        started_before: DateTime<Utc>,
    ) -> Result<Vec<WorkflowInstanceStep>>;

    /// Appends an audit entry for an inbound event.
    async fn create_process_log(&self, log: NewProcessLog) -> Result<()>;

    /// Returns the audit entries of an instance, oldest first.
    async fn find_process_logs(&self, instance_id: &InstanceId) -> Result<Vec<ProcessLog>>;
}
