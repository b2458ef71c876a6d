//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use messaging::MessagingError;
use saga::SagaError;
use workflow_store::StoreError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Orchestration or retry error.
    Saga(SagaError),
    /// Workflow store error.
    Store(StoreError),
    /// The inbound topic refused the event.
    Messaging(MessagingError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Saga(err) => saga_error_to_response(err),
            ApiError::Store(err) => store_error_to_response(err),
            ApiError::Messaging(err) => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
        };

        if status.is_server_error() {
            tracing::error!(error = %message, "request failed");
        }

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, String) {
    match err {
        SagaError::WorkflowNotFound(_)
        | SagaError::InstanceNotFound(_)
        | SagaError::StepNotFound { .. } => (StatusCode::NOT_FOUND, err.to_string()),
        SagaError::StepNotFailed { .. }
        | SagaError::MissingSnapshot(_)
        | SagaError::InvalidSnapshot { .. } => (StatusCode::CONFLICT, err.to_string()),
        SagaError::InvalidEvent(_) | SagaError::InvalidOverride(_) => {
            (StatusCode::BAD_REQUEST, err.to_string())
        }
        SagaError::Store(err) => store_error_to_response(err),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

fn store_error_to_response(err: StoreError) -> (StatusCode, String) {
    match &err {
        StoreError::NotFound { .. } => (StatusCode::NOT_FOUND, err.to_string()),
        StoreError::AlreadyExists { .. } => (StatusCode::CONFLICT, err.to_string()),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Store(err)
    }
}

impl From<MessagingError> for ApiError {
    fn from(err: MessagingError) -> Self {
        ApiError::Messaging(err)
    }
}
