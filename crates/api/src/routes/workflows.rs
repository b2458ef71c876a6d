//! Step catalog inspection.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use messaging::Producer;
use serde::Serialize;
use workflow_store::{Step, Workflow, WorkflowStore};

use super::AppState;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct WorkflowResponse {
    #[serde(flatten)]
    pub workflow: Workflow,
    pub steps: Vec<StepResponse>,
}

#[derive(Serialize)]
pub struct StepResponse {
    #[serde(flatten)]
    pub step: Step,
    pub payload_keys: Vec<String>,
}

/// GET /workflows/{type}: a workflow with every step routed from its states.
pub async fn get<S, P>(
    State(state): State<Arc<AppState<S, P>>>,
    Path(workflow_type): Path<String>,
) -> Result<Json<WorkflowResponse>, ApiError>
where
    S: WorkflowStore,
    P: Producer,
{
    let workflow = state
        .store
        .find_workflow_by_type(&workflow_type)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Workflow {workflow_type} not found")))?;

    let mut steps = Vec::new();
    for step in state.store.find_steps_by_type(&workflow_type).await? {
        let payload_keys = state.store.find_payload_keys_by_step_id(step.step_id).await?;
        steps.push(StepResponse { step, payload_keys });
    }

    Ok(Json(WorkflowResponse { workflow, steps }))
}
