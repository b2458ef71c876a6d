//! HTTP handlers and the state they share.

pub mod events;
pub mod health;
pub mod instances;
pub mod metrics;
pub mod retry;
pub mod steps;
pub mod workflows;

use common::{EventId, InstanceId};
use messaging::Producer;
use saga::RetryEngine;
use workflow_store::WorkflowStore;

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S, P>
where
    S: WorkflowStore,
    P: Producer,
{
    pub store: S,
    pub producer: P,
    pub retry: RetryEngine<S, P>,
    /// Topic that `POST /events` forwards completion events to.
    pub inbound_topic: String,
}

impl<S, P> AppState<S, P>
where
    S: WorkflowStore + Clone,
    P: Producer + Clone,
{
    pub fn new(store: S, producer: P, inbound_topic: impl Into<String>) -> Self {
        Self {
            retry: RetryEngine::new(store.clone(), producer.clone()),
            store,
            producer,
            inbound_topic: inbound_topic.into(),
        }
    }
}

fn require_ids(event_id: &EventId, instance_id: &InstanceId) -> Result<(), ApiError> {
    if event_id.is_blank() || instance_id.is_blank() {
        return Err(ApiError::BadRequest(
            "event_id and instance_id must not be blank".to_string(),
        ));
    }
    Ok(())
}

fn require_instance_id(id: String) -> Result<InstanceId, ApiError> {
    let id = InstanceId::from(id);
    if id.is_blank() {
        return Err(ApiError::BadRequest("instance id must not be blank".to_string()));
    }
    Ok(id)
}
