//! Instance status and audit trail.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use messaging::Producer;
use serde::Serialize;
use workflow_store::{ProcessLog, WorkflowInstance, WorkflowInstanceStep, WorkflowStore};

use super::{AppState, require_instance_id};
use crate::error::ApiError;

#[derive(Serialize)]
pub struct InstanceResponse {
    #[serde(flatten)]
    pub instance: WorkflowInstance,
    pub steps: Vec<WorkflowInstanceStep>,
}

/// GET /instances/{id}: instance status with its step rows, oldest first.
pub async fn get<S, P>(
    State(state): State<Arc<AppState<S, P>>>,
    Path(id): Path<String>,
) -> Result<Json<InstanceResponse>, ApiError>
where
    S: WorkflowStore,
    P: Producer,
{
    let id = require_instance_id(id)?;

    let instance = state
        .store
        .find_workflow_instance_by_id(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Workflow instance {id} not found")))?;
    let steps = state.store.find_workflow_instance_steps(&id).await?;

    Ok(Json(InstanceResponse { instance, steps }))
}

/// GET /instances/{id}/logs: every inbound event recorded for the instance.
///
/// Events are audited before the instance is resolved, so logs may exist
/// for an id that never became an instance.
pub async fn logs<S, P>(
    State(state): State<Arc<AppState<S, P>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ProcessLog>>, ApiError>
where
    S: WorkflowStore,
    P: Producer,
{
    let id = require_instance_id(id)?;
    let logs = state.store.find_process_logs(&id).await?;
    Ok(Json(logs))
}
