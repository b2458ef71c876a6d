use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{EventId, InstanceId, Result};

/// Source name stamped on every event minted by the orchestrator.
pub const ORCHESTRATOR_SOURCE: &str = "orchestra-svc";

/// Action of a command event produced by normal step resolution.
pub const ACTION_REDIRECT: &str = "redirect";

/// Action of a command event re-driven by an operator.
pub const ACTION_RETRY: &str = "retry";

pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_ERROR: &str = "error";

/// Request/response pair carried by every event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(default)]
    pub request: Value,
    #[serde(default)]
    pub response: Value,
}

impl Payload {
    pub fn new(request: Value, response: Value) -> Self {
        Self { request, response }
    }

    /// A payload carrying only a request, as sent with command events.
    pub fn request(request: Value) -> Self {
        Self {
            request,
            response: Value::Null,
        }
    }
}

/// The envelope every participating service publishes and consumes.
///
/// `event_id` is unique per dispatch, `instance_id` is stable for the
/// lifetime of one saga. `state` names the transition that just happened and
/// is agreed between services out of band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalEvent {
    pub event_id: EventId,
    pub instance_id: InstanceId,
    pub event_type: String,
    pub state: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub status_code: i32,
    #[serde(default)]
    pub payload: Payload,
}

impl GlobalEvent {
    /// Creates a new event builder.
    pub fn builder() -> GlobalEventBuilder {
        GlobalEventBuilder::default()
    }

    /// Builds the command event that dispatches the next step of a saga.
    ///
    /// The command gets a fresh `event_id`; correlation fields, state, status
    /// and status code are carried over from the event that triggered it.
    pub fn command(trigger: &GlobalEvent, request: Value) -> Self {
        Self {
            event_id: EventId::new(),
            instance_id: trigger.instance_id.clone(),
            event_type: trigger.event_type.clone(),
            state: trigger.state.clone(),
            timestamp: Utc::now(),
            source: ORCHESTRATOR_SOURCE.to_string(),
            action: ACTION_REDIRECT.to_string(),
            status: trigger.status.clone(),
            status_code: trigger.status_code,
            payload: Payload::request(request),
        }
    }

    /// Rebuilds a stored snapshot as an operator retry.
    ///
    /// The original `event_id` is kept so the eventual completion event still
    /// closes the original step row. The outcome is stamped optimistically.
    pub fn retry_of(snapshot: GlobalEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            source: ORCHESTRATOR_SOURCE.to_string(),
            action: ACTION_RETRY.to_string(),
            status: STATUS_SUCCESS.to_string(),
            status_code: 200,
            ..snapshot
        }
    }

    /// Returns true if the emitting service reported success.
    pub fn is_success(&self) -> bool {
        self.status == STATUS_SUCCESS
    }

    /// Returns true if the status code reports a server-side failure.
    pub fn is_server_error(&self) -> bool {
        self.status_code >= 500
    }

    /// Decodes `payload.request` into a service-specific type.
    pub fn decode_request<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.payload.request.clone())?)
    }

    /// Decodes `payload.response` into a service-specific type.
    pub fn decode_response<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.payload.response.clone())?)
    }

    /// Serializes the envelope to its JSON wire form.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Serializes the envelope to JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses an envelope from JSON bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Parses an envelope from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Builder for constructing events, mostly used by emitting services and tests.
#[derive(Debug, Default)]
pub struct GlobalEventBuilder {
    event_id: Option<EventId>,
    instance_id: Option<InstanceId>,
    event_type: Option<String>,
    state: Option<String>,
    timestamp: Option<DateTime<Utc>>,
    source: Option<String>,
    action: Option<String>,
    status: Option<String>,
    status_code: Option<i32>,
    request: Value,
    response: Value,
}

impl GlobalEventBuilder {
    /// Sets the event ID. If not set, a new ID will be generated.
    pub fn event_id(mut self, id: impl Into<EventId>) -> Self {
        self.event_id = Some(id.into());
        self
    }

    /// Sets the instance ID. If not set, a new ID will be generated.
    pub fn instance_id(mut self, id: impl Into<InstanceId>) -> Self {
        self.instance_id = Some(id.into());
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Sets status and status code together.
    pub fn status(mut self, status: impl Into<String>, status_code: i32) -> Self {
        self.status = Some(status.into());
        self.status_code = Some(status_code);
        self
    }

    pub fn request(mut self, request: Value) -> Self {
        self.request = request;
        self
    }

    pub fn response(mut self, response: Value) -> Self {
        self.response = response;
        self
    }

    /// Builds the event.
    ///
    /// # Panics
    ///
    /// Panics if `event_type` or `state` are not set.
    pub fn build(self) -> GlobalEvent {
        self.try_build()
            .expect("event_type and state are required")
    }

    /// Tries to build the event, returning None if required fields are missing.
    pub fn try_build(self) -> Option<GlobalEvent> {
        Some(GlobalEvent {
            event_id: self.event_id.unwrap_or_default(),
            instance_id: self.instance_id.unwrap_or_default(),
            event_type: self.event_type?,
            state: self.state?,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            source: self.source.unwrap_or_default(),
            action: self.action.unwrap_or_default(),
            status: self.status.unwrap_or_else(|| STATUS_SUCCESS.to_string()),
            status_code: self.status_code.unwrap_or(200),
            payload: Payload::new(self.request, self.response),
        })
    }
}
