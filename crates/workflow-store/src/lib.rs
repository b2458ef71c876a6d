//! Durable state of the saga orchestrator.
//!
//! This crate provides:
//! - [`WorkflowStore`], the storage interface consumed by the orchestrator
//! - [`CatalogDefinition`], the declarative state→step routing table
//! - [`InMemoryWorkflowStore`] for tests and single-process deployments
//! - [`PostgresWorkflowStore`] backed by sqlx

pub mod catalog;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod record;
pub mod store;

pub use catalog::{
    CatalogDefinition, MergeCandidate, StepDefinition, Transition, WorkflowDefinition,
    default_catalog,
};
pub use common::{EventId, InstanceId, InstanceStatus, StepId, StepStatus, WorkflowId};
pub use error::{Result, StoreError};
pub use memory::InMemoryWorkflowStore;
pub use postgres::PostgresWorkflowStore;
pub use record::{
    InstanceStepStatus, InstanceStepWithTopic, NewInstanceStep, NewProcessLog, ProcessLog, Step,
    StepOutcome, Workflow, WorkflowInstance, WorkflowInstanceStep,
};
pub use store::WorkflowStore;
