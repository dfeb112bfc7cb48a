//! Per-entity run serialization
//!
//! Two triggers for the same entity (an HTTP resolve racing a batch run,
//! say) must not interleave their read-resolve-commit sequences. Each entity
//! gets its own async mutex; different entities never contend.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, Default)]
pub struct EntityLocks {
    inner: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl EntityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `entity_id`; released when the guard drops
    pub async fn acquire(&self, entity_id: &str) -> OwnedMutexGuard<()> {
        let entity_lock = {
            let mut map = self.inner.lock().await;
            map.entry(entity_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        entity_lock.lock_owned().await
    }

    /// Drop the entry for `entity_id` once nobody holds or waits on it
    pub async fn release(&self, entity_id: &str) {
        let mut map = self.inner.lock().await;
        if map
            .get(entity_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            map.remove(entity_id);
        }
    }

    /// Drop lock entries nobody holds or waits on
    pub async fn prune_idle(&self) {
        let mut map = self.inner.lock().await;
        map.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}
