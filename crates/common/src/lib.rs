//! Identifiers and status types shared by every crate in the workspace.

pub mod ids;
pub mod status;

pub use ids::{EventId, InstanceId, StepId, WorkflowId};
pub use status::{InstanceStatus, ParseStatusError, StepStatus};
