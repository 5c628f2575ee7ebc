use anyhow::{Context, Result};
use redis::{AsyncCommands, Client, aio::{MultiplexedConnection, PubSub}};
use serde::Serialize;

/// Recompute triggers travel as JSON over Redis pub/sub. Tracker and lease
/// state live on the same server.
#[derive(Clone)]
pub struct RedisBus {
    client: Client,
}

impl RedisBus {
    pub fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).context("invalid REDIS_URL")?;
        Ok(Self { client })
    }

    pub async fn connection(&self) -> Result<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .context("failed to connect to redis")
    }

    /// Returns how many subscribers received the message.
    pub async fn publish_json<T: Serialize>(&self, channel: &str, payload: &T) -> Result<i64> {
        let serialized = serde_json::to_string(payload)?;
        let mut connection = self.connection().await?;
        let receivers: i64 = connection.publish(channel, serialized).await?;
        Ok(receivers)
    }

    pub async fn subscribe(&self, channels: &[&str]) -> Result<PubSub> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        for channel in channels {
            pubsub
                .subscribe(*channel)
                .await
                .with_context(|| format!("failed to subscribe to {channel}"))?;
        }
        Ok(pubsub)
    }
}
