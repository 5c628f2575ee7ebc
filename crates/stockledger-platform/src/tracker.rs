use anyhow::Result;
use async_trait::async_trait;
use redis::{AsyncCommands, LposOptions, aio::MultiplexedConnection};
use stockledger_core::{ItemKey, MovementSnapshot, PositionTracker};

use crate::redis_bus::RedisBus;

pub fn tracker_key(key: &ItemKey) -> String {
    format!("STKPROCESS::{}::{}", key.shop_id, key.barcode)
}

/// Position log kept as one Redis list per item.
#[derive(Clone)]
pub struct RedisPositionTracker {
    connection: MultiplexedConnection,
}

impl RedisPositionTracker {
    pub async fn connect(bus: &RedisBus) -> Result<Self> {
        let connection = bus.connection().await?;
        Ok(Self { connection })
    }
}

#[async_trait]
impl PositionTracker for RedisPositionTracker {
    async fn append(&self, key: &ItemKey, snapshot: &MovementSnapshot) -> Result<()> {
        let mut connection = self.connection.clone();
        let _: i64 = connection
            .rpush(tracker_key(key), snapshot.encode()?)
            .await?;
        Ok(())
    }

    async fn count(&self, key: &ItemKey) -> Result<i64> {
        let mut connection = self.connection.clone();
        Ok(connection.llen(tracker_key(key)).await?)
    }

    async fn locate(&self, key: &ItemKey, snapshot: &MovementSnapshot) -> Result<Option<i64>> {
        let mut connection = self.connection.clone();
        let position: Option<i64> = connection
            .lpos(tracker_key(key), snapshot.encode()?, LposOptions::default())
            .await?;
        Ok(position)
    }

    async fn snapshots(&self, key: &ItemKey) -> Result<Vec<MovementSnapshot>> {
        let mut connection = self.connection.clone();
        let entries: Vec<String> = connection.lrange(tracker_key(key), 0, -1).await?;
        entries
            .iter()
            .map(|entry| MovementSnapshot::decode(entry))
            .collect()
    }

    async fn replace(&self, key: &ItemKey, snapshots: &[MovementSnapshot]) -> Result<()> {
        let list_key = tracker_key(key);
        let encoded = snapshots
            .iter()
            .map(MovementSnapshot::encode)
            .collect::<Result<Vec<_>>>()?;

        let mut pipe = redis::pipe();
        pipe.atomic().del(&list_key).ignore();
        if !encoded.is_empty() {
            pipe.rpush(&list_key, encoded).ignore();
        }

        let mut connection = self.connection.clone();
        let _: () = pipe.query_async(&mut connection).await?;
        Ok(())
    }
}
