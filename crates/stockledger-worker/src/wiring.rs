use std::sync::Arc;

use anyhow::Result;
use stockledger_core::KeyLock;
use stockledger_inventory::{Recomputer, TracingObserver};
use stockledger_memstore::LocalKeyLocks;
use stockledger_platform::{
    LockBackend, PgLedgerGateway, RedisBus, RedisKeyLock, RedisPositionTracker, WorkerConfig,
    connect_database,
};

use crate::consumer::TriggerConsumer;

pub async fn build_consumer(config: &WorkerConfig, redis: &RedisBus) -> Result<TriggerConsumer> {
    let pool = connect_database(&config.database_url, config.db_max_connections).await?;
    let gateway = Arc::new(PgLedgerGateway::new(pool));

    let locks: Arc<dyn KeyLock> = match config.lock_backend {
        LockBackend::Redis => Arc::new(RedisKeyLock::connect(redis, config.lock_ttl).await?),
        LockBackend::Local => Arc::new(LocalKeyLocks::default()),
    };

    let mut recomputer = Recomputer::new(
        gateway,
        locks,
        Arc::new(TracingObserver),
        config.recompute.clone(),
    );
    if config.recompute.dedup_gate {
        recomputer = recomputer.with_tracker(Arc::new(RedisPositionTracker::connect(redis).await?));
    }

    Ok(TriggerConsumer::new(
        Arc::new(recomputer),
        config.workers,
        config.retry.clone(),
    ))
}
