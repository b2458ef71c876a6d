//! The saga orchestrator.
//!
//! Reacts to completion events from the participating services: records
//! step outcomes, merges their responses, resolves the next steps from the
//! catalog and dispatches them as command events.

use std::time::Instant;

use chrono::Utc;
use common::{InstanceId, InstanceStatus, StepStatus};
use global_event::GlobalEvent;
use messaging::Producer;
use serde_json::Value;
use workflow_store::{
    NewInstanceStep, NewProcessLog, Step, StepOutcome, StoreError, Workflow, WorkflowInstance,
    WorkflowStore,
};

use crate::cache::{PayloadBag, PayloadCache};
use crate::error::{Result, SagaError};
use crate::locks::InstanceLocks;

/// Drives saga instances forward, one completion event at a time.
pub struct Orchestrator<S, P>
where
    S: WorkflowStore,
    P: Producer,
{
    store: S,
    producer: P,
    cache: PayloadCache,
    locks: InstanceLocks,
}

impl<S, P> Orchestrator<S, P>
where
    S: WorkflowStore,
    P: Producer,
{
    /// Creates an orchestrator with an empty cache and the default lock table.
    pub fn new(store: S, producer: P) -> Self {
        Self {
            store,
            producer,
            cache: PayloadCache::new(),
            locks: InstanceLocks::default(),
        }
    }

    /// Replaces the per-instance lock table.
    pub fn with_locks(mut self, locks: InstanceLocks) -> Self {
        self.locks = locks;
        self
    }

    /// Replaces the payload cache, e.g. to inspect it from tests.
    pub fn with_cache(mut self, cache: PayloadCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn producer(&self) -> &P {
        &self.producer
    }

    pub fn cache(&self) -> &PayloadCache {
        &self.cache
    }

    /// Processes one completion event.
    ///
    /// Returns an error only when the event cannot be routed at all: unknown
    /// workflow, missing instance, or a failed store call outside the
    /// per-step dispatch. Per-step dispatch failures are logged and isolated.
    #[tracing::instrument(
        skip(self, event),
        fields(
            event_id = %event.event_id,
            instance_id = %event.instance_id,
            event_type = %event.event_type,
            state = %event.state,
        )
    )]
    pub async fn process_event(&self, event: &GlobalEvent) -> Result<()> {
        let start = Instant::now();
        let result = self.process(event).await;

        metrics::histogram!("orchestra_process_event_duration_seconds")
            .record(start.elapsed().as_secs_f64());
        match &result {
            Ok(()) => metrics::counter!("orchestra_events_processed_total").increment(1),
            Err(e) => {
                metrics::counter!("orchestra_events_failed_total").increment(1);
                tracing::error!(error = %e, "event processing failed");
            }
        }

        result
    }

    async fn process(&self, event: &GlobalEvent) -> Result<()> {
        if event.event_id.is_blank() || event.instance_id.is_blank() {
            return Err(SagaError::InvalidEvent(
                "event_id and instance_id must not be blank".to_string(),
            ));
        }

        self.audit(event).await;

        let _guard = self.locks.lock(&event.instance_id).await;

        self.warm_cache(&event.instance_id).await;
        self.cache
            .upsert(&event.instance_id, &event.source, event.payload.response.clone())
            .await;

        let workflow = self
            .store
            .find_workflow_by_type(&event.event_type)
            .await?
            .ok_or_else(|| SagaError::WorkflowNotFound(event.event_type.clone()))?;

        self.close_step(event).await?;

        let instance = self.resolve_instance(&workflow, event).await?;

        let steps = self
            .store
            .find_steps_by_type_and_state(&event.event_type, &event.state)
            .await?;

        if steps.is_empty() {
            self.resolve_terminal(&workflow, &instance).await
        } else {
            self.fan_out(event, &steps).await;
            Ok(())
        }
    }

    /// Appends the raw event to the audit log. Failures never abort processing.
    async fn audit(&self, event: &GlobalEvent) {
        let event_message = match event.to_json() {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "cannot serialize event for the audit log");
                return;
            }
        };

        let log = NewProcessLog {
            event_id: event.event_id.clone(),
            workflow_instance_id: event.instance_id.clone(),
            state: event.state.clone(),
            status: event.status.clone(),
            status_code: event.status_code,
            event_message,
        };
        if let Err(e) = self.store.create_process_log(log).await {
            tracing::warn!(error = %e, "failed to write audit log");
        }
    }

    /// Rebuilds a missing cache entry from the audit log.
    ///
    /// The entry is gone after a terminal wave or a restart, but a retried
    /// step can still advance the instance and needs the earlier responses.
    /// Replaying the log in order gives the same last-write-wins bag.
    async fn warm_cache(&self, instance_id: &InstanceId) {
        if self.cache.contains(instance_id).await {
            return;
        }

        let logs = match self.store.find_process_logs(instance_id).await {
            Ok(logs) => logs,
            Err(e) => {
                tracing::warn!(error = %e, "cannot rebuild payload cache from audit log");
                return;
            }
        };

        let mut bag = PayloadBag::new();
        for log in logs {
            match GlobalEvent::from_json(&log.event_message) {
                Ok(logged) => {
                    bag.insert(logged.source, logged.payload.response);
                }
                Err(e) => {
                    tracing::warn!(log_id = log.id, error = %e, "skipping unreadable audit entry");
                }
            }
        }

        if !bag.is_empty() {
            tracing::debug!(sources = bag.len(), "payload cache rebuilt from audit log");
            self.cache.set(instance_id.clone(), bag).await;
        }
    }

    /// Applies the event's outcome to the step row it completes, if any.
    async fn close_step(&self, event: &GlobalEvent) -> Result<()> {
        let Some(row) = self
            .store
            .find_workflow_instance_step_by_event_id(&event.event_id)
            .await?
        else {
            tracing::info!("event closes no dispatched step");
            return Ok(());
        };

        let status = StepStatus::from_event_status(&event.status);
        let completed_at = Utc::now();
        self.store
            .update_workflow_instance_step(StepOutcome {
                event_id: event.event_id.clone(),
                status,
                status_code: event.status_code,
                response: event.payload.response.clone(),
                event_message: event.to_json()?,
                completed_at,
            })
            .await?;

        if let Some(elapsed) = row
            .started_at
            .and_then(|started| (completed_at - started).to_std().ok())
        {
            metrics::histogram!("orchestra_step_duration_seconds").record(elapsed.as_secs_f64());
        }

        if event.is_server_error() {
            tracing::warn!(
                step_id = %row.step_id,
                status_code = event.status_code,
                "step failed on the service side"
            );
        } else {
            tracing::debug!(step_id = %row.step_id, %status, "step closed");
        }

        Ok(())
    }

    /// Creates the instance on an initiating state, otherwise loads it.
    async fn resolve_instance(
        &self,
        workflow: &Workflow,
        event: &GlobalEvent,
    ) -> Result<WorkflowInstance> {
        if !workflow.is_initiating_state(&event.state) {
            return self.fetch_instance(&event.instance_id).await;
        }

        match self
            .store
            .create_workflow_instance(&event.instance_id, workflow.id, InstanceStatus::InProgress)
            .await
        {
            Ok(instance) => {
                tracing::info!(workflow_id = %workflow.id, "workflow instance created");
                Ok(instance)
            }
            Err(StoreError::AlreadyExists { .. }) => {
                tracing::warn!("initiating event seen again, reusing existing instance");
                self.fetch_instance(&event.instance_id).await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn fetch_instance(&self, instance_id: &InstanceId) -> Result<WorkflowInstance> {
        self.store
            .find_workflow_instance_by_id(instance_id)
            .await?
            .ok_or_else(|| SagaError::InstanceNotFound(instance_id.clone()))
    }

    /// No step follows the current state: settle the instance's final status.
    async fn resolve_terminal(
        &self,
        workflow: &Workflow,
        instance: &WorkflowInstance,
    ) -> Result<()> {
        if instance.status.is_terminal() {
            tracing::debug!(status = %instance.status, "instance already resolved");
            self.cache.delete(&instance.id).await;
            return Ok(());
        }

        let rows = self
            .store
            .find_workflow_instance_steps_by_type_and_instance_id(
                &workflow.workflow_type,
                &instance.id,
            )
            .await
            .map_err(SagaError::TerminalResolution)?;

        let unsuccessful = rows.iter().filter(|r| !r.step_status.is_success()).count();
        let status = if unsuccessful > 0 {
            InstanceStatus::Failed
        } else {
            InstanceStatus::Complete
        };

        self.store.update_workflow_instance(&instance.id, status).await?;
        self.cache.delete(&instance.id).await;

        if status == InstanceStatus::Complete {
            metrics::counter!("orchestra_instances_completed_total").increment(1);
            tracing::info!(steps = rows.len(), "saga completed");
        } else {
            metrics::counter!("orchestra_instances_failed_total").increment(1);
            tracing::warn!(steps = rows.len(), unsuccessful, "saga failed");
        }

        Ok(())
    }

    /// Dispatches every step of the wave; a failing step does not stop the others.
    async fn fan_out(&self, event: &GlobalEvent, steps: &[Step]) {
        let mut dispatched = 0;

        for step in steps {
            match self.dispatch(event, step).await {
                Ok(command) => {
                    dispatched += 1;
                    metrics::counter!("orchestra_steps_dispatched_total", "topic" => step.topic.clone())
                        .increment(1);
                    tracing::info!(
                        step = %step.name,
                        topic = %step.topic,
                        command_event_id = %command.event_id,
                        "step dispatched"
                    );
                }
                Err(e) => {
                    if matches!(e, SagaError::Messaging(_)) {
                        metrics::counter!("orchestra_step_publish_failures_total", "topic" => step.topic.clone())
                            .increment(1);
                    }
                    tracing::error!(
                        step = %step.name,
                        topic = %step.topic,
                        error = %e,
                        "step dispatch failed"
                    );
                }
            }
        }

        tracing::debug!(dispatched, total = steps.len(), "wave dispatched");
    }

    /// Builds, records and publishes the command event of one step.
    ///
    /// The step row is written before the publish, so a lost publish leaves
    /// an IN_PROGRESS row behind rather than an untracked command.
    async fn dispatch(&self, event: &GlobalEvent, step: &Step) -> Result<GlobalEvent> {
        let keys = self.store.find_payload_keys_by_step_id(step.step_id).await?;
        let request = self.cache.merged_request(&event.instance_id, &keys).await?;
        let command = GlobalEvent::command(event, Value::Object(request));

        self.store
            .create_workflow_instance_step(NewInstanceStep {
                event_id: command.event_id.clone(),
                workflow_instance_id: command.instance_id.clone(),
                step_id: step.step_id,
                status: StepStatus::InProgress,
                event_message: command.to_json()?,
                started_at: Utc::now(),
            })
            .await?;

        publish(&self.producer, &step.topic, &command).await?;
        Ok(command)
    }
}

/// Publishes an event keyed by its instance id.
pub(crate) async fn publish<P: Producer>(
    producer: &P,
    topic: &str,
    event: &GlobalEvent,
) -> Result<()> {
    let bytes = event.to_bytes()?;
    producer
        .send_message(topic, event.instance_id.as_str(), &bytes)
        .await?;
    Ok(())
}
