use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use redis::Msg;
use stockledger_core::RECOMPUTE_CHANNELS;
use stockledger_platform::{RedisBus, WorkerConfig};
use stockledger_worker::{ConsumeError, TriggerConsumer, build_consumer};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| {
            "stockledger_worker=info,stockledger_inventory=info,stockledger_platform=info"
                .to_string()
        }))
        .init();

    let config = WorkerConfig::from_env()?;
    let redis = RedisBus::connect(&config.redis_url)?;
    let consumer = build_consumer(&config, &redis).await?;

    let mut pubsub = redis.subscribe(&RECOMPUTE_CHANNELS).await?;
    let mut messages = pubsub.on_message();
    let in_flight = Arc::new(Semaphore::new(config.message_concurrency));

    info!(
        workers = config.workers,
        message_concurrency = config.message_concurrency,
        lock_backend = ?config.lock_backend,
        "stock recompute worker subscribed to {}",
        RECOMPUTE_CHANNELS.join(", ")
    );

    loop {
        let msg = messages
            .next()
            .await
            .context("recompute trigger stream ended unexpectedly")?;
        let permit = in_flight
            .clone()
            .acquire_owned()
            .await
            .context("message limiter closed")?;

        let consumer = consumer.clone();
        tokio::spawn(async move {
            handle_message(&consumer, msg).await;
            drop(permit);
        });
    }
}

async fn handle_message(consumer: &TriggerConsumer, msg: Msg) {
    let channel = msg.get_channel_name().to_string();
    let payload: String = match msg.get_payload() {
        Ok(payload) => payload,
        Err(err) => {
            warn!(channel = %channel, "dropping unreadable message: {err}");
            return;
        }
    };

    match consumer.handle_payload(&channel, &payload).await {
        Ok(report) if !report.failed.is_empty() => {
            for failure in &report.failed {
                error!(
                    channel = %channel,
                    shop_id = %failure.key.shop_id,
                    barcode = %failure.key.barcode,
                    attempts = failure.attempts,
                    retryable = failure.retryable,
                    "item balance left stale: {}",
                    failure.error
                );
            }
        }
        Ok(_) => {}
        Err(ConsumeError::Malformed(err)) => {
            warn!(channel = %channel, "dropping malformed recompute request: {err}");
        }
    }
}
