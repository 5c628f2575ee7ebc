use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use stockledger_core::{ItemKey, KeyLease, KeyLock};
use uuid::Uuid;

/// One async mutex per item key, for workers running as a single process.
///
/// Slots are dropped once nobody holds or waits on them.
#[derive(Default)]
pub struct LocalKeyLocks {
    slots: Mutex<HashMap<ItemKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl LocalKeyLocks {
    pub fn tracked_keys(&self) -> usize {
        self.slots.lock().map_or(0, |slots| slots.len())
    }

    fn slot(&self, key: &ItemKey) -> anyhow::Result<Arc<tokio::sync::Mutex<()>>> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| anyhow::anyhow!("lock table poisoned"))?;
        Ok(slots.entry(key.clone()).or_default().clone())
    }
}

#[async_trait]
impl KeyLock for LocalKeyLocks {
    async fn acquire(&self, key: &ItemKey) -> anyhow::Result<KeyLease> {
        let slot = self.slot(key)?;
        let guard = slot.lock_owned().await;
        Ok(KeyLease::holding(Uuid::new_v4().to_string(), guard))
    }

    async fn release(&self, key: &ItemKey, lease: KeyLease) -> anyhow::Result<()> {
        drop(lease);

        let mut slots = self
            .slots
            .lock()
            .map_err(|_| anyhow::anyhow!("lock table poisoned"))?;
        if slots
            .get(key)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(key);
        }
        Ok(())
    }
}
