use std::{
    collections::{HashSet, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use backoff::future::retry_notify;
use serde::Serialize;
use stockledger_core::{ItemKey, RecomputeRequest};
use stockledger_inventory::{RecomputeError, RecomputeOutcome, RecomputeStatus, Recomputer};
use stockledger_platform::RetryConfig;
use thiserror::Error;
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum ConsumeError {
    #[error("malformed recompute request: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemFailure {
    pub key: ItemKey,
    pub error: String,
    pub retryable: bool,
    pub attempts: u32,
}

/// Per-key results of one trigger message.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkReport {
    pub applied: Vec<ItemKey>,
    pub unchanged: Vec<ItemKey>,
    pub skipped: Vec<ItemKey>,
    pub empty: Vec<ItemKey>,
    pub failed: Vec<ItemFailure>,
}

impl BulkReport {
    fn record(&mut self, result: Result<RecomputeOutcome, ItemFailure>) {
        match result {
            Ok(outcome) => {
                let bucket = match outcome.status {
                    RecomputeStatus::Applied => &mut self.applied,
                    RecomputeStatus::Unchanged => &mut self.unchanged,
                    RecomputeStatus::Skipped => &mut self.skipped,
                    RecomputeStatus::Empty => &mut self.empty,
                };
                bucket.push(outcome.key);
            }
            Err(failure) => self.failed.push(failure),
        }
    }

    pub fn total(&self) -> usize {
        self.applied.len()
            + self.unchanged.len()
            + self.skipped.len()
            + self.empty.len()
            + self.failed.len()
    }
}

/// Turns recompute triggers into per-item recomputes.
///
/// Bulk requests run on at most `workers` tasks pulling keys from a shared
/// queue. Clones share one limiter, so no more than `workers` recomputes run
/// at once across every message being handled. Failures are retried while
/// retryable, then reported and dropped.
#[derive(Clone)]
pub struct TriggerConsumer {
    recomputer: Arc<Recomputer>,
    workers: usize,
    limiter: Arc<Semaphore>,
    retry: RetryConfig,
}

impl TriggerConsumer {
    pub fn new(recomputer: Arc<Recomputer>, workers: usize, retry: RetryConfig) -> Self {
        let workers = workers.max(1);
        Self {
            recomputer,
            workers,
            limiter: Arc::new(Semaphore::new(workers)),
            retry,
        }
    }

    pub async fn handle_payload(
        &self,
        channel: &str,
        payload: &str,
    ) -> Result<BulkReport, ConsumeError> {
        let request = RecomputeRequest::decode(payload)?;

        let report = match request {
            RecomputeRequest::Single(event) => {
                let mut report = BulkReport::default();
                report.record(self.recompute_with_retry(&event.into()).await);
                report
            }
            RecomputeRequest::Bulk(events) => {
                self.fan_out(events.into_iter().map(ItemKey::from).collect())
                    .await
            }
        };

        info!(
            channel,
            applied = report.applied.len(),
            unchanged = report.unchanged.len(),
            skipped = report.skipped.len(),
            empty = report.empty.len(),
            failed = report.failed.len(),
            "recompute trigger handled"
        );
        Ok(report)
    }

    pub async fn fan_out(&self, keys: Vec<ItemKey>) -> BulkReport {
        let mut seen = HashSet::new();
        let keys: VecDeque<ItemKey> = keys
            .into_iter()
            .filter(|key| seen.insert(key.clone()))
            .collect();

        let mut report = BulkReport::default();
        if keys.is_empty() {
            return report;
        }

        let pool_size = self.workers.min(keys.len());
        let queue = Arc::new(Mutex::new(keys));
        let mut workers = JoinSet::new();

        for _ in 0..pool_size {
            let consumer = self.clone();
            let queue = queue.clone();
            workers.spawn(async move {
                let mut results = Vec::new();
                while let Some(key) = next_key(&queue) {
                    results.push(consumer.recompute_with_retry(&key).await);
                }
                results
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(results) => results
                    .into_iter()
                    .for_each(|result| report.record(result)),
                Err(err) => error!("bulk recompute worker aborted: {err}"),
            }
        }

        report
    }

    /// Retries retryable failures with backoff, up to the configured attempts.
    pub async fn recompute_with_retry(&self, key: &ItemKey) -> Result<RecomputeOutcome, ItemFailure> {
        let Ok(_slot) = self.limiter.acquire().await else {
            return Err(ItemFailure {
                key: key.clone(),
                error: "recompute limiter closed".to_string(),
                retryable: true,
                attempts: 0,
            });
        };

        let attempts = AtomicU32::new(0);
        let attempts_ref = &attempts;
        let recomputer = self.recomputer.as_ref();
        let max_attempts = self.retry.max_attempts;

        let result = retry_notify(
            self.retry.policy(),
            || async move {
                let attempt = attempts_ref.fetch_add(1, Ordering::SeqCst) + 1;
                recomputer.recompute(key).await.map_err(|err| {
                    if err.is_retryable() && attempt < max_attempts {
                        backoff::Error::transient(err)
                    } else {
                        backoff::Error::permanent(err)
                    }
                })
            },
            |err: RecomputeError, delay: Duration| {
                warn!(
                    shop_id = %key.shop_id,
                    barcode = %key.barcode,
                    attempt = attempts_ref.load(Ordering::SeqCst),
                    ?delay,
                    "recompute failed, retrying: {err}"
                );
            },
        )
        .await;

        result.map_err(|err| {
            let attempts = attempts.load(Ordering::SeqCst);
            error!(
                shop_id = %key.shop_id,
                barcode = %key.barcode,
                attempts,
                "recompute failed: {err}"
            );
            ItemFailure {
                key: key.clone(),
                retryable: err.is_retryable(),
                error: err.to_string(),
                attempts,
            }
        })
    }
}

fn next_key(queue: &Mutex<VecDeque<ItemKey>>) -> Option<ItemKey> {
    queue.lock().ok()?.pop_front()
}
