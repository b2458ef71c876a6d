//! Operator-driven retry of failed steps.

use chrono::Utc;
use common::{EventId, InstanceId};
use global_event::GlobalEvent;
use messaging::Producer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use workflow_store::{StepOutcome, WorkflowInstanceStep, WorkflowStore};

use crate::error::{Result, SagaError};
use crate::orchestrator::publish;
use crate::workflows;

/// Changes applied to a step's stored event before it is re-driven.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryOverrides {
    /// Replaces the event state.
    #[serde(default)]
    pub state: Option<String>,
    /// Fields shallow-merged into `payload.request`.
    #[serde(default)]
    pub request: Option<Map<String, Value>>,
}

impl RetryOverrides {
    fn apply(self, event: &mut GlobalEvent) -> Result<()> {
        if let Some(state) = self.state {
            if state.trim().is_empty() {
                return Err(SagaError::InvalidOverride("state must not be blank".into()));
            }
            event.state = state;
        }

        if let Some(fields) = self.request {
            if event.payload.request.is_null() {
                event.payload.request = Value::Object(Map::new());
            }
            let Value::Object(request) = &mut event.payload.request else {
                return Err(SagaError::InvalidOverride(
                    "stored payload.request is not a JSON object".into(),
                ));
            };
            request.extend(fields);
        }

        Ok(())
    }
}

/// Identifies the step to retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryRequest {
    pub event_id: EventId,
    pub instance_id: InstanceId,
    #[serde(default)]
    pub overrides: RetryOverrides,
}

impl RetryRequest {
    pub fn new(event_id: impl Into<EventId>, instance_id: impl Into<InstanceId>) -> Self {
        Self {
            event_id: event_id.into(),
            instance_id: instance_id.into(),
            overrides: RetryOverrides::default(),
        }
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.overrides.state = Some(state.into());
        self
    }

    /// Sets one field of the re-driven request.
    pub fn with_request_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.overrides
            .request
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
        self
    }
}

/// Re-drives steps that ended in ERROR from their stored event.
pub struct RetryEngine<S, P>
where
    S: WorkflowStore,
    P: Producer,
{
    store: S,
    producer: P,
}

impl<S, P> RetryEngine<S, P>
where
    S: WorkflowStore,
    P: Producer,
{
    pub fn new(store: S, producer: P) -> Self {
        Self { store, producer }
    }

    /// Retries one failed step and returns the event that was published.
    ///
    /// The event keeps the stored `event_id`, so the service's eventual
    /// completion event closes the same step row. Nothing is written or
    /// published when a precondition fails. If the publish fails the row is
    /// put back in ERROR with its previous snapshot, so it can be retried again.
    #[tracing::instrument(
        skip(self, request),
        fields(event_id = %request.event_id, instance_id = %request.instance_id)
    )]
    pub async fn retry_step(&self, request: RetryRequest) -> Result<GlobalEvent> {
        if request.event_id.is_blank() || request.instance_id.is_blank() {
            return Err(SagaError::InvalidEvent(
                "event_id and instance_id must not be blank".to_string(),
            ));
        }

        let found = self
            .store
            .find_workflow_instance_step_by_event_id_and_instance_id(
                &request.event_id,
                &request.instance_id,
            )
            .await?
            .ok_or_else(|| SagaError::StepNotFound {
                event_id: request.event_id.clone(),
                instance_id: request.instance_id.clone(),
            })?;
        let row = found.step;

        if !row.status.is_retryable() {
            return Err(SagaError::StepNotFailed {
                event_id: row.event_id,
                status: row.status,
            });
        }

        let stored = row
            .event_message
            .clone()
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| SagaError::MissingSnapshot(row.event_id.clone()))?;
        let snapshot =
            GlobalEvent::from_json(&stored).map_err(|source| SagaError::InvalidSnapshot {
                event_id: row.event_id.clone(),
                source,
            })?;

        let mut event = GlobalEvent::retry_of(snapshot);
        request.overrides.apply(&mut event)?;

        self.store
            .restart_workflow_instance_step(&row.event_id, event.to_json()?, Utc::now())
            .await?;
        if let Err(e) = publish(&self.producer, &found.topic, &event).await {
            self.restore_failed(row, stored).await;
            return Err(e);
        }

        metrics::counter!("orchestra_retries_total").increment(1);
        tracing::info!(topic = %found.topic, state = %event.state, "step retried");

        Ok(event)
    }

    /// Puts a restarted row back to the failed state it was retried from.
    async fn restore_failed(&self, row: WorkflowInstanceStep, event_message: String) {
        let outcome = StepOutcome {
            event_id: row.event_id,
            status: row.status,
            status_code: row.status_code.unwrap_or_default(),
            response: row.response.unwrap_or(Value::Null),
            event_message,
            completed_at: row.completed_at.unwrap_or_else(Utc::now),
        };
        if let Err(e) = self.store.update_workflow_instance_step(outcome).await {
            tracing::error!(error = %e, "cannot restore step after failed retry publish");
        } else {
            tracing::warn!("retry publish failed, step left in error");
        }
    }

    /// Retries a failed product reservation with a corrected quantity.
    pub async fn retry_product_quantity(
        &self,
        event_id: impl Into<EventId>,
        instance_id: impl Into<InstanceId>,
        quantity: i64,
    ) -> Result<GlobalEvent> {
        if quantity < 1 {
            return Err(SagaError::InvalidOverride(format!(
                "quantity must be at least 1, got {quantity}"
            )));
        }

        let request = RetryRequest::new(event_id, instance_id)
            .with_state(workflows::STATE_PRODUCT_RETRY)
            .with_request_field("quantity", json!(quantity));
        self.retry_step(request).await
    }
}
