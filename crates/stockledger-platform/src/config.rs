use std::{str::FromStr, time::Duration};

use anyhow::{Context, Result};
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use stockledger_inventory::{MissingReferencePolicy, RecomputeSettings};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockBackend {
    Redis,
    Local,
}

impl FromStr for LockBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "local" => Ok(Self::Local),
            other => anyhow::bail!("unsupported lock backend: {other}"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryConfig {
    /// Jittered delays doubling from `backoff` up to `max_backoff`. Attempts
    /// are bounded by `max_attempts` rather than elapsed time.
    pub fn policy(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.backoff)
            .with_multiplier(2.0)
            .with_randomization_factor(0.2)
            .with_max_interval(self.max_backoff)
            .with_max_elapsed_time(None)
            .build()
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub database_url: String,
    pub redis_url: String,
    pub db_max_connections: u32,
    pub workers: usize,
    pub message_concurrency: usize,
    pub lock_backend: LockBackend,
    pub lock_ttl: Duration,
    pub retry: RetryConfig,
    pub recompute: RecomputeSettings,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url = lookup("DATABASE_URL").context("DATABASE_URL is required")?;
        let redis_url = lookup("REDIS_URL").context("REDIS_URL is required")?;

        let deadline = Duration::from_secs(parse_or(&lookup, "RECOMPUTE_DEADLINE_SECS", 30)?);
        let lock_wait = Duration::from_secs(parse_or(&lookup, "RECOMPUTE_LOCK_WAIT_SECS", 30)?);
        let lock_ttl = Duration::from_secs(parse_or(
            &lookup,
            "RECOMPUTE_LOCK_TTL_SECS",
            deadline.as_secs() + 10,
        )?);
        if lock_ttl <= deadline {
            anyhow::bail!("RECOMPUTE_LOCK_TTL_SECS must exceed RECOMPUTE_DEADLINE_SECS");
        }

        let workers: usize = parse_or(&lookup, "RECOMPUTE_WORKERS", 16)?;
        if workers == 0 {
            anyhow::bail!("RECOMPUTE_WORKERS must be at least 1");
        }
        let message_concurrency: usize = parse_or(&lookup, "RECOMPUTE_MESSAGE_CONCURRENCY", 8)?;
        if message_concurrency == 0 {
            anyhow::bail!("RECOMPUTE_MESSAGE_CONCURRENCY must be at least 1");
        }
        let max_attempts: u32 = parse_or(&lookup, "RECOMPUTE_MAX_ATTEMPTS", 3)?;
        if max_attempts == 0 {
            anyhow::bail!("RECOMPUTE_MAX_ATTEMPTS must be at least 1");
        }

        Ok(Self {
            database_url,
            redis_url,
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 10)?,
            workers,
            message_concurrency,
            lock_backend: parse_or(&lookup, "RECOMPUTE_LOCK_BACKEND", LockBackend::Redis)?,
            lock_ttl,
            retry: RetryConfig {
                max_attempts,
                backoff: Duration::from_millis(parse_or(
                    &lookup,
                    "RECOMPUTE_RETRY_BACKOFF_MS",
                    200,
                )?),
                ..RetryConfig::default()
            },
            recompute: RecomputeSettings {
                precision: parse_or(&lookup, "RECOMPUTE_PRECISION", 2)?,
                deadline,
                lock_wait,
                missing_reference: parse_or(
                    &lookup,
                    "RECOMPUTE_MISSING_REFERENCE",
                    MissingReferencePolicy::ZeroCost,
                )?,
                dedup_gate: parse_or(&lookup, "RECOMPUTE_DEDUP_GATE", true)?,
            },
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|err| anyhow::anyhow!("invalid {name}={raw}: {err}")),
        _ => Ok(default),
    }
}
