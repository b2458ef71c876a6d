//! Saga orchestration for the order and bank registration workflows.
//!
//! Participating services each execute one step and report back with a
//! completion event. The [`Orchestrator`] records the outcome, merges the
//! reported responses in a [`PayloadCache`], resolves the next steps from
//! the step catalog and publishes their command events. When no step
//! follows, the instance is settled as COMPLETE or FAILED.
//!
//! A step that ended in ERROR can be re-driven by an operator through the
//! [`RetryEngine`].

pub mod cache;
pub mod error;
pub mod handler;
pub mod locks;
pub mod orchestrator;
pub mod retry;
pub mod workflows;

pub use cache::{PayloadBag, PayloadCache};
pub use error::{Result, SagaError};
pub use locks::{DEFAULT_LOCK_SHARDS, InstanceLocks};
pub use orchestrator::Orchestrator;
pub use retry::{RetryEngine, RetryOverrides, RetryRequest};
