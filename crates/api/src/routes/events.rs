//! Completion-event ingress.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use common::EventId;
use global_event::GlobalEvent;
use messaging::Producer;
use serde::Serialize;
use workflow_store::WorkflowStore;

use super::{AppState, require_ids};
use crate::error::ApiError;

#[derive(Serialize)]
pub struct AcceptedResponse {
    pub event_id: EventId,
    pub topic: String,
}

/// POST /events: forwards a completion event to the inbound topic.
///
/// The event is processed asynchronously by the consumer; poll
/// `GET /instances/{id}` for the outcome.
pub async fn publish<S, P>(
    State(state): State<Arc<AppState<S, P>>>,
    Json(event): Json<GlobalEvent>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError>
where
    S: WorkflowStore,
    P: Producer,
{
    require_ids(&event.event_id, &event.instance_id)?;

    let bytes = event
        .to_bytes()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    state
        .producer
        .send_message(&state.inbound_topic, event.instance_id.as_str(), &bytes)
        .await?;

    metrics::counter!("orchestra_http_events_accepted_total").increment(1);
    tracing::debug!(event_id = %event.event_id, state = %event.state, "event accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            event_id: event.event_id,
            topic: state.inbound_topic.clone(),
        }),
    ))
}
