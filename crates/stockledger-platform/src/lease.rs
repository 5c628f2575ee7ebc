use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use redis::{Script, aio::MultiplexedConnection};
use stockledger_core::{ItemKey, KeyLease, KeyLock};
use tracing::warn;
use uuid::Uuid;

use crate::redis_bus::RedisBus;

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

pub fn lease_key(key: &ItemKey) -> String {
    format!("STKLOCK::{}::{}", key.shop_id, key.barcode)
}

/// Per-item lease shared by every worker process through Redis.
///
/// The lease expires after `ttl` even if its holder never releases it.
#[derive(Clone)]
pub struct RedisKeyLock {
    connection: MultiplexedConnection,
    ttl: Duration,
    poll_interval: Duration,
}

impl RedisKeyLock {
    pub async fn connect(bus: &RedisBus, ttl: Duration) -> Result<Self> {
        let connection = bus.connection().await?;
        Ok(Self {
            connection,
            ttl,
            poll_interval: Duration::from_millis(50),
        })
    }
}

#[async_trait]
impl KeyLock for RedisKeyLock {
    async fn acquire(&self, key: &ItemKey) -> Result<KeyLease> {
        let lock_key = lease_key(key);
        let token = Uuid::new_v4().to_string();
        let ttl_ms = u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX);
        let mut connection = self.connection.clone();

        loop {
            let acquired: Option<String> = redis::cmd("SET")
                .arg(&lock_key)
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(ttl_ms)
                .query_async(&mut connection)
                .await?;

            if acquired.is_some() {
                return Ok(KeyLease::new(token));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn release(&self, key: &ItemKey, lease: KeyLease) -> Result<()> {
        let mut connection = self.connection.clone();
        let deleted: i64 = Script::new(RELEASE_SCRIPT)
            .key(lease_key(key))
            .arg(lease.token())
            .invoke_async(&mut connection)
            .await?;

        if deleted == 0 {
            warn!(
                shop_id = %key.shop_id,
                barcode = %key.barcode,
                "recompute lease expired before release"
            );
        }
        Ok(())
    }
}
