use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::{PgPool, postgres::PgPoolOptions};

/// Opens the ledger pool. Each recompute holds at most one connection at a
/// time, so `max_connections` bounds database load across all workers.
pub async fn connect_database(database_url: &str, max_connections: u32) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await
        .context("failed to connect to stock ledger database")
}
