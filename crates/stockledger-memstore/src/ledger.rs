use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use stockledger_core::{ItemBalance, ItemKey, LedgerGateway, Movement};
use tokio::sync::RwLock;

/// Stock ledger and item master held in process memory.
#[derive(Default)]
pub struct InMemoryLedger {
    movements: RwLock<HashMap<ItemKey, Vec<Movement>>>,
    balances: RwLock<HashMap<ItemKey, ItemBalance>>,
}

impl InMemoryLedger {
    pub async fn insert(&self, movement: Movement) {
        let mut movements = self.movements.write().await;
        movements.entry(movement.key()).or_default().push(movement);
    }

    pub async fn remove_document(&self, key: &ItemKey, doc_no: &str) {
        let mut movements = self.movements.write().await;
        if let Some(rows) = movements.get_mut(key) {
            rows.retain(|row| row.doc_no != doc_no);
        }
    }

    pub async fn set_balance(&self, key: &ItemKey, balance: ItemBalance) {
        self.balances.write().await.insert(key.clone(), balance);
    }

    /// Stored movements in insertion order.
    pub async fn movements(&self, key: &ItemKey) -> Vec<Movement> {
        let movements = self.movements.read().await;
        movements.get(key).cloned().unwrap_or_default()
    }

    pub async fn balance(&self, key: &ItemKey) -> Option<ItemBalance> {
        self.balances.read().await.get(key).copied()
    }
}

#[async_trait]
impl LedgerGateway for InMemoryLedger {
    async fn fetch_ordered_movements(&self, key: &ItemKey) -> anyhow::Result<Vec<Movement>> {
        let mut rows = self.movements(key).await;
        rows.sort_by(Movement::replay_order);
        Ok(rows)
    }

    async fn commit_changes(&self, key: &ItemKey, changes: &[Movement]) -> anyhow::Result<()> {
        let mut movements = self.movements.write().await;
        let rows = movements
            .get_mut(key)
            .with_context(|| format!("no ledger for {key}"))?;

        let mut positions = Vec::with_capacity(changes.len());
        for change in changes {
            let position = rows
                .iter()
                .position(|row| row.row_id == change.row_id)
                .with_context(|| format!("ledger row {} of {key} not found", change.row_id))?;
            positions.push(position);
        }

        for (position, change) in positions.into_iter().zip(changes) {
            rows[position].derived = change.derived;
        }
        Ok(())
    }

    async fn fetch_balance(&self, key: &ItemKey) -> anyhow::Result<Option<ItemBalance>> {
        Ok(self.balance(key).await)
    }

    async fn update_balance(&self, key: &ItemKey, balance: &ItemBalance) -> anyhow::Result<()> {
        self.set_balance(key, *balance).await;
        Ok(())
    }
}
