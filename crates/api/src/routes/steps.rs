//! Stale step detection.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use chrono::{TimeDelta, Utc};
use messaging::Producer;
use serde::Deserialize;
use workflow_store::{WorkflowInstanceStep, WorkflowStore};

use super::AppState;
use crate::error::ApiError;

/// Threshold used when the query omits `older_than_secs`.
pub const DEFAULT_STALE_AFTER_SECS: i64 = 300;

#[derive(Deserialize)]
pub struct StaleQuery {
    pub older_than_secs: Option<i64>,
}

/// GET /steps/stale?older_than_secs=N: in-progress steps dispatched more
/// than N seconds ago.
pub async fn stale<S, P>(
    State(state): State<Arc<AppState<S, P>>>,
    Query(query): Query<StaleQuery>,
) -> Result<Json<Vec<WorkflowInstanceStep>>, ApiError>
where
    S: WorkflowStore,
    P: Producer,
{
    let secs = query.older_than_secs.unwrap_or(DEFAULT_STALE_AFTER_SECS);
    if secs < 0 {
        return Err(ApiError::BadRequest(
            "older_than_secs must not be negative".to_string(),
        ));
    }

    let cutoff = TimeDelta::try_seconds(secs)
        .and_then(|age| Utc::now().checked_sub_signed(age))
        .ok_or_else(|| ApiError::BadRequest(format!("older_than_secs out of range: {secs}")))?;

    let steps = state.store.find_stale_instance_steps(cutoff).await?;
    Ok(Json(steps))
}
