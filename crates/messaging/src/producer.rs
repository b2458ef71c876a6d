//! Publishing interface and a recording implementation for tests.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::{Message, MessagingError, Result};

/// Publishes keyed messages to topics.
#[async_trait]
pub trait Producer: Send + Sync {
    /// Sends `value` to `topic`. Returns once the transport has accepted it.
    async fn send_message(&self, topic: &str, key: &str, value: &[u8]) -> Result<()>;
}

#[async_trait]
impl<T: Producer + ?Sized> Producer for Arc<T> {
    async fn send_message(&self, topic: &str, key: &str, value: &[u8]) -> Result<()> {
        (**self).send_message(topic, key, value).await
    }
}

#[derive(Debug, Default)]
struct RecordingState {
    sent: Vec<Message>,
    calls: usize,
    fail_on_calls: HashSet<usize>,
    fail_topics: HashSet<String>,
}

/// Producer that keeps every accepted message in memory.
///
/// Failures can be injected per call number (1-based, counting failed calls
/// too) or per topic. A failed send is not recorded.
#[derive(Debug, Clone, Default)]
pub struct RecordingProducer {
    state: Arc<Mutex<RecordingState>>,
}

impl RecordingProducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the `n`th send fail.
    pub fn fail_on_call(&self, n: usize) {
        self.lock().fail_on_calls.insert(n);
    }

    /// Makes every send to `topic` fail.
    pub fn fail_topic(&self, topic: impl Into<String>) {
        self.lock().fail_topics.insert(topic.into());
    }

    /// Stops injecting failures.
    pub fn heal(&self) {
        let mut state = self.lock();
        state.fail_on_calls.clear();
        state.fail_topics.clear();
    }

    /// Returns every accepted message, in send order.
    pub fn sent(&self) -> Vec<Message> {
        self.lock().sent.clone()
    }

    /// Returns the accepted messages for one topic, in send order.
    pub fn sent_to(&self, topic: &str) -> Vec<Message> {
        self.lock()
            .sent
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    /// Returns the number of send attempts, including failed ones.
    pub fn call_count(&self) -> usize {
        self.lock().calls
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.sent.clear();
        state.calls = 0;
    }

    fn lock(&self) -> MutexGuard<'_, RecordingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Producer for RecordingProducer {
    async fn send_message(&self, topic: &str, key: &str, value: &[u8]) -> Result<()> {
        let mut state = self.lock();
        state.calls += 1;

        if state.fail_on_calls.contains(&state.calls) || state.fail_topics.contains(topic) {
            return Err(MessagingError::Injected(topic.to_string()));
        }

        state.sent.push(Message::new(topic, key, value.to_vec()));
        Ok(())
    }
}
