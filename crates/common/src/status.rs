//! Instance and step status machines.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when a stored status string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown status: {value}")]
pub struct ParseStatusError {
    pub value: String,
}

/// The status of a workflow instance (one saga execution).
///
/// State transitions:
/// ```text
/// Pending ──► InProgress ──┬──► Complete
///                          └──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    #[default]
    Pending,
    InProgress,
    #[serde(rename = "completed")]
    Complete,
    Failed,
}

impl InstanceStatus {
    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstanceStatus::Complete | InstanceStatus::Failed)
    }

    /// Returns the status name as stored and sent on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Pending => "pending",
            InstanceStatus::InProgress => "in_progress",
            InstanceStatus::Complete => "completed",
            InstanceStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InstanceStatus::Pending),
            "in_progress" => Ok(InstanceStatus::InProgress),
            "completed" => Ok(InstanceStatus::Complete),
            "failed" => Ok(InstanceStatus::Failed),
            other => Err(ParseStatusError {
                value: other.to_string(),
            }),
        }
    }
}

/// The status of one dispatched step execution.
///
/// A step row is created `InProgress` and closed once by the matching
/// completion event. Only `Error` rows can be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    InProgress,
    Success,
    Error,
    Failed,
}

impl StepStatus {
    /// Returns true if the step finished successfully.
    pub fn is_success(&self) -> bool {
        matches!(self, StepStatus::Success)
    }

    /// Returns true if the step may be re-driven by an operator.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StepStatus::Error)
    }

    /// Maps the free-form `status` field of a completion event to a step status.
    ///
    /// Services only agree on "success" and "error"; anything unrecognised is
    /// treated as an error so that it can never resolve an instance as complete.
    pub fn from_event_status(status: &str) -> Self {
        status.parse().unwrap_or(StepStatus::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::InProgress => "in_progress",
            StepStatus::Success => "success",
            StepStatus::Error => "error",
            StepStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StepStatus::Pending),
            "in_progress" => Ok(StepStatus::InProgress),
            "success" => Ok(StepStatus::Success),
            "error" => Ok(StepStatus::Error),
            "failed" => Ok(StepStatus::Failed),
            other => Err(ParseStatusError {
                value: other.to_string(),
            }),
        }
    }
}
