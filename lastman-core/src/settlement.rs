//! Settlement substrate seam.
//!
//! The engine never holds value itself. It issues `credit` instructions and
//! only commits its own state transition once the instruction succeeded, so a
//! failed transfer leaves the round exactly as it was. A backend that journals
//! into the engine's database is written in the same transaction as the round.

use crate::error::{GameError, Result};
use crate::storage::Storage;
use crate::types::{Amount, Identity};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementReceipt {
    pub id: Uuid,
    pub to: Identity,
    pub amount: Amount,
    pub memo: String,
    pub timestamp: DateTime<Utc>,
}

impl SettlementReceipt {
    pub fn new(to: &Identity, amount: Amount, memo: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            to: to.clone(),
            amount,
            memo: memo.to_string(),
            timestamp: Utc::now(),
        }
    }
}

#[async_trait]
pub trait Settlement: Send + Sync {
    /// Transfer `amount` out of the game pot to `to`.
    async fn credit(&self, to: &Identity, amount: Amount, memo: &str) -> Result<SettlementReceipt>;

    /// Database the backend records its credits in, if any.
    ///
    /// When this is the engine's own storage, the engine writes the credit
    /// and the round transition in one transaction instead of calling `credit`.
    fn journal(&self) -> Option<&Arc<Storage>> {
        None
    }
}

/// Ledger kept in memory; used by tests and embedders without a real substrate.
#[derive(Default)]
pub struct InMemoryLedger {
    balances: Mutex<HashMap<Identity, Amount>>,
    receipts: Mutex<Vec<SettlementReceipt>>,
    fail_next: Mutex<Option<String>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self, identity: &Identity) -> Amount {
        self.balances
            .lock()
            .get(identity)
            .copied()
            .unwrap_or(Amount::ZERO)
    }

    pub fn receipts(&self) -> Vec<SettlementReceipt> {
        self.receipts.lock().clone()
    }

    /// Make the next `credit` call fail with `reason`.
    pub fn fail_next(&self, reason: impl Into<String>) {
        *self.fail_next.lock() = Some(reason.into());
    }
}

#[async_trait]
impl Settlement for InMemoryLedger {
    async fn credit(&self, to: &Identity, amount: Amount, memo: &str) -> Result<SettlementReceipt> {
        if let Some(reason) = self.fail_next.lock().take() {
            return Err(GameError::settlement(reason));
        }

        {
            let mut balances = self.balances.lock();
            let balance = balances.entry(to.clone()).or_insert(Amount::ZERO);
            *balance = balance
                .checked_add(amount)
                .ok_or_else(|| GameError::settlement("balance overflow"))?;
        }

        let receipt = SettlementReceipt::new(to, amount, memo);
        self.receipts.lock().push(receipt.clone());
        tracing::debug!("Credited {} to {} ({})", amount, to, memo);
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_ledger_credits() {
        let ledger = InMemoryLedger::new();
        let alice = Identity::from("alice");

        ledger.credit(&alice, Amount::from_units(5), "a").await.unwrap();
        ledger.credit(&alice, Amount::from_units(7), "b").await.unwrap();

        assert_eq!(ledger.balance(&alice), Amount::from_units(12));
        assert_eq!(ledger.receipts().len(), 2);
    }

    #[tokio::test]
    async fn test_in_memory_ledger_injected_failure() {
        let ledger = InMemoryLedger::new();
        let alice = Identity::from("alice");

        ledger.fail_next("substrate down");
        assert!(ledger.credit(&alice, Amount::from_units(5), "a").await.is_err());
        assert_eq!(ledger.balance(&alice), Amount::ZERO);

        ledger.credit(&alice, Amount::from_units(5), "a").await.unwrap();
        assert_eq!(ledger.balance(&alice), Amount::from_units(5));
    }
}
