//! Operator retry endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use common::{EventId, InstanceId};
use global_event::GlobalEvent;
use messaging::Producer;
use saga::RetryRequest;
use serde::Deserialize;
use workflow_store::WorkflowStore;

use super::{AppState, require_ids};
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct ProductRetryRequest {
    pub event_id: EventId,
    pub instance_id: InstanceId,
    pub quantity: i64,
}

/// PATCH /retry: re-drives a failed step from its stored event.
///
/// Responds with the event that was published.
pub async fn retry_step<S, P>(
    State(state): State<Arc<AppState<S, P>>>,
    Json(request): Json<RetryRequest>,
) -> Result<Json<GlobalEvent>, ApiError>
where
    S: WorkflowStore,
    P: Producer,
{
    require_ids(&request.event_id, &request.instance_id)?;
    let event = state.retry.retry_step(request).await?;
    Ok(Json(event))
}

/// PATCH /product-retry: retries a product reservation with a new quantity.
pub async fn product_retry<S, P>(
    State(state): State<Arc<AppState<S, P>>>,
    Json(req): Json<ProductRetryRequest>,
) -> Result<Json<GlobalEvent>, ApiError>
where
    S: WorkflowStore,
    P: Producer,
{
    require_ids(&req.event_id, &req.instance_id)?;
    let event = state
        .retry
        .retry_product_quantity(req.event_id, req.instance_id, req.quantity)
        .await?;
    Ok(Json(event))
}
