//! Process-local cache of the responses each upstream service contributed
//! to a saga instance.

use std::collections::HashMap;
use std::sync::Arc;

use common::InstanceId;
use global_event::merge_objects;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::Result;

/// Latest response per source service of one instance.
pub type PayloadBag = HashMap<String, Value>;

/// Two-level map `instance_id -> (source -> response)`.
///
/// Clones share the same underlying map. Entries are not durable and are
/// dropped by the orchestrator once an instance reaches a terminal status.
/// The orchestrator rebuilds a missing entry from the audit log.
#[derive(Debug, Clone, Default)]
pub struct PayloadCache {
    entries: Arc<RwLock<HashMap<InstanceId, PayloadBag>>>,
}

impl PayloadCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the bag of an instance.
    pub async fn get(&self, instance_id: &InstanceId) -> Option<PayloadBag> {
        self.entries.read().await.get(instance_id).cloned()
    }

    /// Returns true if the instance has a bag, even an empty one.
    pub async fn contains(&self, instance_id: &InstanceId) -> bool {
        self.entries.read().await.contains_key(instance_id)
    }

    /// Replaces the bag of an instance.
    pub async fn set(&self, instance_id: InstanceId, bag: PayloadBag) {
        self.entries.write().await.insert(instance_id, bag);
    }

    /// Removes the bag of an instance, returning it if present.
    pub async fn delete(&self, instance_id: &InstanceId) -> Option<PayloadBag> {
        self.entries.write().await.remove(instance_id)
    }

    /// Returns a copy of every bag.
    pub async fn get_all(&self) -> HashMap<InstanceId, PayloadBag> {
        self.entries.read().await.clone()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Returns the number of cached instances.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Records the latest response of `source`, creating the bag if needed.
    ///
    /// Applying the same response twice leaves the bag unchanged.
    pub async fn upsert(&self, instance_id: &InstanceId, source: &str, response: Value) {
        let mut entries = self.entries.write().await;
        entries
            .entry(instance_id.clone())
            .or_default()
            .insert(source.to_string(), response);
    }

    /// Builds a step request by merging the cached responses of `keys`, in order.
    ///
    /// Sources with nothing cached are skipped.
    pub async fn merged_request(
        &self,
        instance_id: &InstanceId,
        keys: &[String],
    ) -> Result<Map<String, Value>> {
        let entries = self.entries.read().await;
        let bag = entries.get(instance_id);
        let sources = keys
            .iter()
            .map(|key| (key.as_str(), bag.and_then(|b| b.get(key))));

        Ok(merge_objects(sources)?)
    }
}
