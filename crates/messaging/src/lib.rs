//! Messaging transport for saga events.
//!
//! Events travel as keyed byte payloads on named topics. This crate provides:
//! - [`Producer`], the publishing interface used by the orchestrator
//! - [`InProcessBus`], a topic bus backed by tokio channels
//! - [`RecordingProducer`], a producer that records sends and can be told to fail
//! - [`Consumer`], a subscription loop with redelivery and a dead-letter topic

pub mod bus;
pub mod consumer;
pub mod error;
pub mod message;
pub mod producer;

pub use bus::{InProcessBus, Subscription};
pub use consumer::{Consumer, ConsumerConfig, Delivery, HandlerError, MessageHandler};
pub use error::{MessagingError, Result};
pub use message::Message;
pub use producer::{Producer, RecordingProducer};
