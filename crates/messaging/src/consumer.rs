//! Subscription loop with bounded redelivery.
//!
//! A message is handed to the handler until it succeeds or the delivery
//! limit is reached, then forwarded unchanged to the dead-letter topic.
//! Rejected messages skip redelivery.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

use crate::{Message, Producer, Subscription};

/// Why a handler did not accept a message.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The message can never be handled, e.g. it does not decode.
    #[error("rejected: {0}")]
    Rejected(String),

    /// Handling failed but may succeed on redelivery.
    #[error("failed: {0}")]
    Failed(String),
}

/// Processes messages delivered from a subscription.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError>;
}

#[async_trait]
impl<T: MessageHandler + ?Sized> MessageHandler for Arc<T> {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        (**self).handle(message).await
    }
}

/// Consumer settings.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Deliveries attempted before a message is dead-lettered.
    pub max_deliveries: u32,
    pub dead_letter_topic: String,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_deliveries: 3,
            dead_letter_topic: "orchestra-dead-letter".to_string(),
        }
    }
}

/// Final outcome of delivering one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Handled { attempts: u32 },
    DeadLettered { attempts: u32 },
    /// Dead-lettering itself failed; the message is dropped.
    Dropped { attempts: u32 },
}

/// Feeds a subscription to a handler.
pub struct Consumer<H, P> {
    handler: H,
    dead_letters: P,
    config: ConsumerConfig,
}

impl<H, P> Consumer<H, P>
where
    H: MessageHandler,
    P: Producer,
{
    pub fn new(handler: H, dead_letters: P, config: ConsumerConfig) -> Self {
        Self {
            handler,
            dead_letters,
            config,
        }
    }

    /// Consumes until `shutdown` flips to true or the subscription ends.
    ///
    /// A message already being delivered is finished before returning.
    #[tracing::instrument(skip_all, fields(topic = %subscription.topic()))]
    pub async fn run(&self, mut subscription: Subscription, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("consumer started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                message = subscription.recv() => match message {
                    Some(message) => {
                        self.deliver(&message).await;
                    }
                    None => break,
                },
            }
        }

        tracing::info!("consumer stopped");
    }

    /// Delivers one message, redelivering and dead-lettering as configured.
    pub async fn deliver(&self, message: &Message) -> Delivery {
        let max = self.config.max_deliveries.max(1);
        let mut attempts = 0;

        let reason = loop {
            attempts += 1;
            match self.handler.handle(message).await {
                Ok(()) => return Delivery::Handled { attempts },
                Err(HandlerError::Rejected(reason)) => break reason,
                Err(HandlerError::Failed(reason)) if attempts >= max => break reason,
                Err(HandlerError::Failed(reason)) => {
                    tracing::warn!(
                        key = %message.key,
                        attempt = attempts,
                        error = %reason,
                        "delivery failed, redelivering"
                    );
                }
            }
        };

        self.dead_letter(message, attempts, &reason).await
    }

    async fn dead_letter(&self, message: &Message, attempts: u32, reason: &str) -> Delivery {
        let topic = &self.config.dead_letter_topic;
        match self
            .dead_letters
            .send_message(topic, &message.key, &message.payload)
            .await
        {
            Ok(()) => {
                metrics::counter!("messaging_dead_lettered_total").increment(1);
                tracing::error!(
                    key = %message.key,
                    attempts,
                    error = %reason,
                    dead_letter_topic = %topic,
                    "message dead-lettered"
                );
                Delivery::DeadLettered { attempts }
            }
            Err(e) => {
                tracing::error!(
                    key = %message.key,
                    attempts,
                    error = %reason,
                    dead_letter_error = %e,
                    "message dropped"
                );
                Delivery::Dropped { attempts }
            }
        }
    }
}
