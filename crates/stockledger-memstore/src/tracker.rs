use std::collections::HashMap;

use async_trait::async_trait;
use stockledger_core::{ItemKey, MovementSnapshot, PositionTracker};
use tokio::sync::RwLock;

/// Position log held in process memory, storing encoded snapshots.
#[derive(Default)]
pub struct InMemoryPositionTracker {
    logs: RwLock<HashMap<ItemKey, Vec<String>>>,
}

impl InMemoryPositionTracker {
    pub async fn entries(&self, key: &ItemKey) -> Vec<String> {
        let logs = self.logs.read().await;
        logs.get(key).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl PositionTracker for InMemoryPositionTracker {
    async fn append(&self, key: &ItemKey, snapshot: &MovementSnapshot) -> anyhow::Result<()> {
        let encoded = snapshot.encode()?;
        let mut logs = self.logs.write().await;
        logs.entry(key.clone()).or_default().push(encoded);
        Ok(())
    }

    async fn count(&self, key: &ItemKey) -> anyhow::Result<i64> {
        let logs = self.logs.read().await;
        Ok(logs.get(key).map_or(0, |log| log.len() as i64))
    }

    async fn locate(
        &self,
        key: &ItemKey,
        snapshot: &MovementSnapshot,
    ) -> anyhow::Result<Option<i64>> {
        let encoded = snapshot.encode()?;
        let logs = self.logs.read().await;
        Ok(logs
            .get(key)
            .and_then(|log| log.iter().position(|entry| *entry == encoded))
            .map(|position| position as i64))
    }

    async fn snapshots(&self, key: &ItemKey) -> anyhow::Result<Vec<MovementSnapshot>> {
        self.entries(key)
            .await
            .iter()
            .map(|entry| MovementSnapshot::decode(entry))
            .collect()
    }

    async fn replace(&self, key: &ItemKey, snapshots: &[MovementSnapshot]) -> anyhow::Result<()> {
        let encoded = snapshots
            .iter()
            .map(MovementSnapshot::encode)
            .collect::<anyhow::Result<Vec<_>>>()?;
        let mut logs = self.logs.write().await;
        logs.insert(key.clone(), encoded);
        Ok(())
    }
}
