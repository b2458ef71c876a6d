//! In-process topic bus.
//!
//! Each topic has at most one subscriber and is backed by an unbounded tokio
//! channel, so messages on a topic are delivered in publish order.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{Message, MessagingError, Producer, Result};

type Topics = HashMap<String, mpsc::UnboundedSender<Message>>;

/// Topic bus connecting producers and consumers in one process.
#[derive(Debug, Clone, Default)]
pub struct InProcessBus {
    topics: Arc<RwLock<Topics>>,
}

impl InProcessBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the single consumer of `topic`.
    ///
    /// A topic whose previous subscription was dropped can be subscribed again.
    pub fn subscribe(&self, topic: impl Into<String>) -> Result<Subscription> {
        let topic = topic.into();
        let mut topics = self.write();

        if topics.get(&topic).is_some_and(|tx| !tx.is_closed()) {
            return Err(MessagingError::AlreadySubscribed(topic));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        topics.insert(topic.clone(), tx);
        tracing::debug!(topic = %topic, "topic subscribed");

        Ok(Subscription { topic, rx })
    }

    /// Returns the names of topics with a live subscriber.
    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .read()
            .iter()
            .filter(|(_, tx)| !tx.is_closed())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    fn read(&self) -> RwLockReadGuard<'_, Topics> {
        self.topics.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Topics> {
        self.topics.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Producer for InProcessBus {
    async fn send_message(&self, topic: &str, key: &str, value: &[u8]) -> Result<()> {
        let topics = self.read();
        let tx = topics
            .get(topic)
            .ok_or_else(|| MessagingError::NoSubscriber(topic.to_string()))?;

        tx.send(Message::new(topic, key, value.to_vec()))
            .map_err(|_| MessagingError::Closed(topic.to_string()))?;

        metrics::counter!("messaging_published_total", "topic" => topic.to_string()).increment(1);
        Ok(())
    }
}

/// The receiving end of a topic.
#[derive(Debug)]
pub struct Subscription {
    topic: String,
    rx: mpsc::UnboundedReceiver<Message>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Waits for the next message. Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Returns the next message if one is already queued.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }
}
