use crate::error::{GameError, Result};
use crate::settlement::{Settlement, SettlementReceipt};
use crate::storage::Storage;
use crate::types::{Amount, Identity};
use async_trait::async_trait;
use chrono::DateTime;
use rusqlite::{params, Connection};
use std::sync::Arc;
use uuid::Uuid;

/// Settlement backend that records every credit instruction in the local
/// database for an external payer to execute.
pub struct SettlementJournal {
    storage: Arc<Storage>,
}

impl SettlementJournal {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    pub async fn list(&self) -> Result<Vec<SettlementReceipt>> {
        let conn = self.storage.get_connection().await;
        let mut stmt = conn.prepare(
            "SELECT id, recipient, amount, memo, timestamp FROM settlements ORDER BY timestamp ASC",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?;

        let mut receipts = Vec::new();
        for row in rows {
            let (id, recipient, amount, memo, timestamp) = row?;
            receipts.push(SettlementReceipt {
                id: Uuid::parse_str(&id).map_err(|e| {
                    GameError::internal(format!("Invalid settlement id {}: {}", id, e))
                })?,
                to: Identity::new(recipient),
                amount: Amount::try_from(amount).map_err(|e| {
                    GameError::internal(format!("Settlement {} has {}", id, e))
                })?,
                memo,
                timestamp: DateTime::from_timestamp(timestamp, 0).ok_or_else(|| {
                    GameError::internal(format!(
                        "Settlement {} has invalid timestamp {}",
                        id, timestamp
                    ))
                })?,
            });
        }
        Ok(receipts)
    }
}

/// Insert one credit row. Shared with the round store so a credit can land in
/// the same transaction as the round it settles.
pub(crate) fn insert_receipt(conn: &Connection, receipt: &SettlementReceipt) -> Result<()> {
    conn.execute(
        "INSERT INTO settlements (id, recipient, amount, memo, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            receipt.id.to_string(),
            receipt.to.as_str(),
            String::from(receipt.amount),
            receipt.memo,
            receipt.timestamp.timestamp(),
        ],
    )?;
    Ok(())
}

#[async_trait]
impl Settlement for SettlementJournal {
    async fn credit(&self, to: &Identity, amount: Amount, memo: &str) -> Result<SettlementReceipt> {
        let receipt = SettlementReceipt::new(to, amount, memo);
        let conn = self.storage.get_connection().await;
        insert_receipt(&conn, &receipt)?;

        tracing::info!("Journaled credit of {} to {} ({})", amount, to, memo);
        Ok(receipt)
    }

    fn journal(&self) -> Option<&Arc<Storage>> {
        Some(&self.storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_journal_records_credits() {
        let storage = Arc::new(Storage::in_memory().await.unwrap());
        let journal = SettlementJournal::new(storage);

        let alice = Identity::from("alice");
        journal
            .credit(&alice, Amount::from_units(123), "prize round 1")
            .await
            .unwrap();

        let receipts = journal.list().await.unwrap();
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].to, alice);
        assert_eq!(receipts[0].amount, Amount::from_units(123));
        assert_eq!(receipts[0].memo, "prize round 1");
    }

    #[tokio::test]
    async fn test_corrupt_row_is_an_error() {
        let storage = Arc::new(Storage::in_memory().await.unwrap());
        let journal = SettlementJournal::new(storage.clone());

        storage
            .get_connection()
            .await
            .execute(
                "INSERT INTO settlements (id, recipient, amount, memo, timestamp)
                 VALUES ('not-a-uuid', 'alice', '5', 'prize round 1', 0)",
                [],
            )
            .unwrap();
        assert!(matches!(journal.list().await, Err(GameError::Internal(_))));

        storage
            .get_connection()
            .await
            .execute("DELETE FROM settlements", [])
            .unwrap();
        storage
            .get_connection()
            .await
            .execute(
                "INSERT INTO settlements (id, recipient, amount, memo, timestamp)
                 VALUES (?1, 'alice', 'five', 'prize round 1', 0)",
                params![Uuid::new_v4().to_string()],
            )
            .unwrap();
        assert!(matches!(journal.list().await, Err(GameError::Internal(_))));
    }
}
