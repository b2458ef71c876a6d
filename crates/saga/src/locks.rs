//! Per-instance serialization of event processing.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use common::InstanceId;
use tokio::sync::{Mutex, MutexGuard};

/// Default number of lock shards.
pub const DEFAULT_LOCK_SHARDS: usize = 64;

/// A fixed table of mutexes, one chosen per instance by hashing its id.
///
/// Two events of the same instance always contend on the same shard, so they
/// are processed one after the other. Unrelated instances may share a shard.
#[derive(Debug, Clone)]
pub struct InstanceLocks {
    shards: Arc<[Mutex<()>]>,
}

impl InstanceLocks {
    /// Creates a table with `shards` mutexes (at least one).
    pub fn new(shards: usize) -> Self {
        let shards = (0..shards.max(1)).map(|_| Mutex::new(())).collect();
        Self { shards }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Waits for the shard of `instance_id` and holds it until the guard drops.
    pub async fn lock(&self, instance_id: &InstanceId) -> MutexGuard<'_, ()> {
        self.shards[self.shard_of(instance_id)].lock().await
    }

    fn shard_of(&self, instance_id: &InstanceId) -> usize {
        let mut hasher = DefaultHasher::new();
        instance_id.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }
}

impl Default for InstanceLocks {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_SHARDS)
    }
}
