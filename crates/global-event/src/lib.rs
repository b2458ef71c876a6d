//! The `GlobalEvent` envelope exchanged between the orchestrator and the
//! participating services.
//!
//! Payloads are kept as untyped JSON: the orchestrator never needs typed
//! access, it only merges response objects by top-level key. Each service
//! decodes `payload.request` into its own type on demand with
//! [`GlobalEvent::decode_request`].

pub mod error;
pub mod event;
pub mod merge;

pub use common::{EventId, InstanceId};
pub use error::{CodecError, Result};
pub use event::{
    ACTION_REDIRECT, ACTION_RETRY, GlobalEvent, GlobalEventBuilder, ORCHESTRATOR_SOURCE, Payload,
    STATUS_ERROR, STATUS_SUCCESS,
};
pub use merge::{merge_into, merge_objects};
