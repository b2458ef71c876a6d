use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
    CatalogDefinition, EventId, InstanceId, InstanceStatus, InstanceStepStatus,
    InstanceStepWithTopic, NewInstanceStep, NewProcessLog, ProcessLog, Result, Step,
    StepDefinition, StepId, StepOutcome, StepStatus, StoreError, Workflow, WorkflowId,
    WorkflowInstance, WorkflowInstanceStep, store::WorkflowStore,
};

#[derive(Debug)]
struct StoredStep {
    id: StepId,
    definition: StepDefinition,
}

#[derive(Debug, PartialEq)]
struct Route {
    workflow_type: String,
    state: String,
    step_id: StepId,
}

#[derive(Debug, Default)]
struct MemoryState {
    workflows: Vec<Workflow>,
    steps: Vec<StoredStep>,
    routes: Vec<Route>,
    instances: HashMap<InstanceId, WorkflowInstance>,
    instance_steps: Vec<WorkflowInstanceStep>,
    process_logs: Vec<ProcessLog>,
}

impl MemoryState {
    fn stored_step(&self, id: StepId) -> Option<&StoredStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    fn route_to_step(&self, route: &Route) -> Option<Step> {
        self.stored_step(route.step_id).map(|s| Step {
            step_id: s.id,
            state: route.state.clone(),
            service: s.definition.service.clone(),
            name: s.definition.name.clone(),
            description: s.definition.description.clone(),
            topic: s.definition.topic.clone(),
        })
    }

    fn instance_step_mut(&mut self, event_id: &EventId) -> Result<&mut WorkflowInstanceStep> {
        self.instance_steps
            .iter_mut()
            .find(|s| &s.event_id == event_id)
            .ok_or_else(|| StoreError::not_found("workflow instance step", event_id))
    }
}

/// Operations the store can be told to fail, for exercising error paths.
#[derive(Debug, Default)]
struct Faults {
    process_log: AtomicBool,
    status_scan: AtomicBool,
    step_rows_for: Mutex<HashSet<String>>,
}

/// In-memory workflow store for testing and single-process runs.
///
/// Provides the same interface as the PostgreSQL implementation. Clones
/// share the same underlying state.
#[derive(Clone, Default)]
pub struct InMemoryWorkflowStore {
    state: Arc<RwLock<MemoryState>>,
    faults: Arc<Faults>,
}

impl InMemoryWorkflowStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with the given catalog.
    pub async fn with_catalog(catalog: &CatalogDefinition) -> Result<Self> {
        let store = Self::new();
        store.seed_catalog(catalog).await?;
        Ok(store)
    }

    /// Makes every audit log write fail.
    pub fn set_fail_on_process_log(&self, fail: bool) {
        self.faults.process_log.store(fail, Ordering::SeqCst);
    }

    /// Makes the terminal step-status scan fail.
    pub fn set_fail_on_status_scan(&self, fail: bool) {
        self.faults.status_scan.store(fail, Ordering::SeqCst);
    }

    /// Makes recording a dispatched step fail for the named catalog step.
    pub fn fail_step_rows_for(&self, step_name: impl Into<String>) {
        self.faults
            .step_rows_for
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(step_name.into());
    }

    /// Returns the number of step rows stored.
    pub async fn instance_step_count(&self) -> usize {
        self.state.read().await.instance_steps.len()
    }

    /// Returns the number of audit entries stored.
    pub async fn process_log_count(&self) -> usize {
        self.state.read().await.process_logs.len()
    }

    /// Clears instances, step rows and audit entries, keeping the catalog.
    pub async fn clear_runtime_state(&self) {
        let mut state = self.state.write().await;
        state.instances.clear();
        state.instance_steps.clear();
        state.process_logs.clear();
    }

    fn step_rows_fail_for(&self, name: &str) -> bool {
        self.faults
            .step_rows_for
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name)
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn seed_catalog(&self, catalog: &CatalogDefinition) -> Result<()> {
        catalog.validate()?;
        let mut state = self.state.write().await;
        let now = Utc::now();

        for definition in &catalog.steps {
            if let Some(existing) = state
                .steps
                .iter_mut()
                .find(|s| s.definition.name == definition.name)
            {
                existing.definition = definition.clone();
            } else {
                let id = StepId::new(state.steps.len() as i64 + 1);
                state.steps.push(StoredStep {
                    id,
                    definition: definition.clone(),
                });
            }
        }

        for workflow in &catalog.workflows {
            if let Some(existing) = state
                .workflows
                .iter_mut()
                .find(|w| w.workflow_type == workflow.workflow_type)
            {
                existing.description = workflow.description.clone();
                existing.initiating_states = workflow.initiating_states.clone();
                existing.updated_at = now;
            } else {
                let id = WorkflowId::new(state.workflows.len() as i64 + 1);
                state.workflows.push(Workflow {
                    id,
                    workflow_type: workflow.workflow_type.clone(),
                    description: workflow.description.clone(),
                    initiating_states: workflow.initiating_states.clone(),
                    created_at: now,
                    updated_at: now,
                });
            }

            for transition in &workflow.transitions {
                for name in &transition.steps {
                    let step_id = state
                        .steps
                        .iter()
                        .find(|s| &s.definition.name == name)
                        .map(|s| s.id)
                        .ok_or_else(|| StoreError::not_found("step", name))?;
                    let route = Route {
                        workflow_type: workflow.workflow_type.clone(),
                        state: transition.state.clone(),
                        step_id,
                    };
                    if !state.routes.contains(&route) {
                        state.routes.push(route);
                    }
                }
            }
        }

        tracing::debug!(
            workflows = state.workflows.len(),
            steps = state.steps.len(),
            routes = state.routes.len(),
            "catalog seeded"
        );
        Ok(())
    }

    async fn find_workflow_by_type(&self, workflow_type: &str) -> Result<Option<Workflow>> {
        let state = self.state.read().await;
        Ok(state
            .workflows
            .iter()
            .find(|w| w.workflow_type == workflow_type)
            .cloned())
    }

    async fn find_steps_by_type_and_state(
        &self,
        workflow_type: &str,
        step_state: &str,
    ) -> Result<Vec<Step>> {
        let state = self.state.read().await;
        Ok(state
            .routes
            .iter()
            .filter(|r| r.workflow_type == workflow_type && r.state == step_state)
            .filter_map(|r| state.route_to_step(r))
            .collect())
    }

    async fn find_steps_by_type(&self, workflow_type: &str) -> Result<Vec<Step>> {
        let state = self.state.read().await;
        Ok(state
            .routes
            .iter()
            .filter(|r| r.workflow_type == workflow_type)
            .filter_map(|r| state.route_to_step(r))
            .collect())
    }

    async fn find_payload_keys_by_step_id(&self, step_id: StepId) -> Result<Vec<String>> {
        let state = self.state.read().await;
        Ok(state
            .stored_step(step_id)
            .map(|s| s.definition.payload_keys.clone())
            .unwrap_or_default())
    }

    async fn create_workflow_instance(
        &self,
        id: &InstanceId,
        workflow_id: WorkflowId,
        status: InstanceStatus,
    ) -> Result<WorkflowInstance> {
        let mut state = self.state.write().await;

        if !state.workflows.iter().any(|w| w.id == workflow_id) {
            return Err(StoreError::not_found("workflow", workflow_id));
        }
        if state.instances.contains_key(id) {
            return Err(StoreError::already_exists("workflow instance", id));
        }

        let now = Utc::now();
        let instance = WorkflowInstance {
            id: id.clone(),
            workflow_id,
            status,
            created_at: now,
            updated_at: now,
        };
        state.instances.insert(id.clone(), instance.clone());
        Ok(instance)
    }

    async fn find_workflow_instance_by_id(
        &self,
        id: &InstanceId,
    ) -> Result<Option<WorkflowInstance>> {
        Ok(self.state.read().await.instances.get(id).cloned())
    }

    async fn update_workflow_instance(
        &self,
        id: &InstanceId,
        status: InstanceStatus,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let instance = state
            .instances
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("workflow instance", id))?;
        instance.status = status;
        instance.updated_at = Utc::now();
        Ok(())
    }

    async fn create_workflow_instance_step(
        &self,
        step: NewInstanceStep,
    ) -> Result<WorkflowInstanceStep> {
        let mut state = self.state.write().await;

        let name = state
            .stored_step(step.step_id)
            .map(|s| s.definition.name.clone())
            .ok_or_else(|| StoreError::not_found("step", step.step_id))?;
        if self.step_rows_fail_for(&name) {
            return Err(StoreError::Injected("create_workflow_instance_step"));
        }
        if !state.instances.contains_key(&step.workflow_instance_id) {
            return Err(StoreError::not_found(
                "workflow instance",
                &step.workflow_instance_id,
            ));
        }
        if state
            .instance_steps
            .iter()
            .any(|s| s.event_id == step.event_id)
        {
            return Err(StoreError::already_exists(
                "workflow instance step",
                &step.event_id,
            ));
        }

        let row = WorkflowInstanceStep {
            id: state.instance_steps.len() as i64 + 1,
            event_id: step.event_id,
            workflow_instance_id: step.workflow_instance_id,
            step_id: step.step_id,
            status: step.status,
            event_message: Some(step.event_message),
            status_code: None,
            response: None,
            started_at: Some(step.started_at),
            completed_at: None,
        };
        state.instance_steps.push(row.clone());
        Ok(row)
    }

    async fn find_workflow_instance_step_by_event_id(
        &self,
        event_id: &EventId,
    ) -> Result<Option<WorkflowInstanceStep>> {
        let state = self.state.read().await;
        Ok(state
            .instance_steps
            .iter()
            .find(|s| &s.event_id == event_id)
            .cloned())
    }

    async fn update_workflow_instance_step(&self, outcome: StepOutcome) -> Result<()> {
        let mut state = self.state.write().await;
        let row = state.instance_step_mut(&outcome.event_id)?;
        row.status = outcome.status;
        row.status_code = Some(outcome.status_code);
        row.response = Some(outcome.response);
        row.event_message = Some(outcome.event_message);
        row.completed_at = Some(outcome.completed_at);
        Ok(())
    }

    async fn restart_workflow_instance_step(
        &self,
        event_id: &EventId,
        event_message: String,
        started_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let row = state.instance_step_mut(event_id)?;
        row.status = StepStatus::InProgress;
        row.event_message = Some(event_message);
        row.started_at = Some(started_at);
        row.completed_at = None;
        Ok(())
    }

    async fn find_workflow_instance_step_by_event_id_and_instance_id(
        &self,
        event_id: &EventId,
        instance_id: &InstanceId,
    ) -> Result<Option<InstanceStepWithTopic>> {
        let state = self.state.read().await;
        let found = state
            .instance_steps
            .iter()
            .find(|s| &s.event_id == event_id && &s.workflow_instance_id == instance_id);

        Ok(found.and_then(|row| {
            state
                .stored_step(row.step_id)
                .map(|s| InstanceStepWithTopic {
                    step: row.clone(),
                    topic: s.definition.topic.clone(),
                })
        }))
    }

    async fn find_workflow_instance_steps_by_type_and_instance_id(
        &self,
        workflow_type: &str,
        instance_id: &InstanceId,
    ) -> Result<Vec<InstanceStepStatus>> {
        if self.faults.status_scan.load(Ordering::SeqCst) {
            return Err(StoreError::Injected(
                "find_workflow_instance_steps_by_type_and_instance_id",
            ));
        }

        let state = self.state.read().await;
        let Some(instance) = state.instances.get(instance_id) else {
            return Ok(Vec::new());
        };
        let Some(workflow) = state
            .workflows
            .iter()
            .find(|w| w.id == instance.workflow_id && w.workflow_type == workflow_type)
        else {
            return Ok(Vec::new());
        };

        Ok(state
            .instance_steps
            .iter()
            .filter(|s| &s.workflow_instance_id == instance_id)
            .map(|s| InstanceStepStatus {
                workflow_id: workflow.id,
                workflow_type: workflow.workflow_type.clone(),
                instance_id: instance.id.clone(),
                instance_status: instance.status,
                step_status: s.status,
                step_id: s.step_id,
            })
            .collect())
    }

    async fn find_workflow_instance_steps(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Vec<WorkflowInstanceStep>> {
        let state = self.state.read().await;
        Ok(state
            .instance_steps
            .iter()
            .filter(|s| &s.workflow_instance_id == instance_id)
            .cloned()
            .collect())
    }

    async fn find_stale_instance_steps(
        &self,
        started_before: DateTime<Utc>,
    ) -> Result<Vec<WorkflowInstanceStep>> {
        let state = self.state.read().await;
        Ok(state
            .instance_steps
            .iter()
            .filter(|s| {
                s.status == StepStatus::InProgress
                    && s.started_at.is_some_and(|t| t < started_before)
            })
            .cloned()
            .collect())
    }

    async fn create_process_log(&self, log: NewProcessLog) -> Result<()> {
        if self.faults.process_log.load(Ordering::SeqCst) {
            return Err(StoreError::Injected("create_process_log"));
        }

        let mut state = self.state.write().await;
        let id = state.process_logs.len() as i64 + 1;
        state.process_logs.push(ProcessLog {
            id,
            event_id: log.event_id,
            workflow_instance_id: log.workflow_instance_id,
            state: log.state,
            status: log.status,
            status_code: log.status_code,
            event_message: log.event_message,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn find_process_logs(&self, instance_id: &InstanceId) -> Result<Vec<ProcessLog>> {
        let state = self.state.read().await;
        Ok(state
            .process_logs
            .iter()
            .filter(|l| &l.workflow_instance_id == instance_id)
            .cloned()
            .collect())
    }
}
