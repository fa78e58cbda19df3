use crate::audit::{AuditEntry, OracleAnomaly};
use crate::bonus::{BonusLedger, BonusSlot};
use crate::error::Result;
use crate::gateway::RandomnessRequest;
use crate::round::Round;
use crate::settlement::SettlementReceipt;
use crate::storage::journal::insert_receipt;
use crate::storage::Storage;
use crate::types::RoundId;
use chrono::Utc;
use rusqlite::{params, Connection};
use std::collections::HashMap;

pub struct RoundStore<'a> {
    storage: &'a Storage,
}

impl<'a> RoundStore<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    /// Persist a round, its bonus slots and the oracle requests correlated to it
    /// in one transaction.
    pub async fn save_round(
        &self,
        round: &Round,
        ledger: &BonusLedger,
        requests: &[RandomnessRequest],
    ) -> Result<()> {
        let mut conn = self.storage.get_connection().await;
        let tx = conn.transaction()?;
        write_round(&tx, round, ledger, requests)?;
        tx.commit()?;

        tracing::debug!("Saved round {} with {} slots", round.id, ledger.slots().count());
        Ok(())
    }

    /// Persist a round together with the journaled credit that moved funds out
    /// of it. Neither is stored without the other.
    pub async fn save_round_with_credit(
        &self,
        round: &Round,
        ledger: &BonusLedger,
        requests: &[RandomnessRequest],
        receipt: &SettlementReceipt,
    ) -> Result<()> {
        let mut conn = self.storage.get_connection().await;
        let tx = conn.transaction()?;
        insert_receipt(&tx, receipt)?;
        write_round(&tx, round, ledger, requests)?;
        tx.commit()?;

        tracing::debug!("Saved round {} with credit {}", round.id, receipt.id);
        Ok(())
    }

    pub async fn load_rounds(&self) -> Result<Vec<(Round, BonusLedger)>> {
        let conn = self.storage.get_connection().await;

        let mut stmt = conn.prepare("SELECT data FROM rounds ORDER BY round_id ASC")?;
        let round_rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut rounds = Vec::new();
        for row in round_rows {
            let round: Round = serde_json::from_str(&row?)?;
            rounds.push(round);
        }

        let mut stmt =
            conn.prepare("SELECT data FROM bonus_slots ORDER BY round_id ASC, deposit_number ASC")?;
        let slot_rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut slots: HashMap<RoundId, Vec<BonusSlot>> = HashMap::new();
        for row in slot_rows {
            let slot: BonusSlot = serde_json::from_str(&row?)?;
            slots.entry(slot.round_id).or_default().push(slot);
        }

        Ok(rounds
            .into_iter()
            .map(|round| {
                let ledger =
                    BonusLedger::from_slots(round.id, slots.remove(&round.id).unwrap_or_default());
                (round, ledger)
            })
            .collect())
    }

    pub async fn load_requests(&self) -> Result<Vec<RandomnessRequest>> {
        let conn = self.storage.get_connection().await;

        let mut stmt = conn.prepare("SELECT data FROM oracle_requests ORDER BY request_id ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut requests = Vec::new();
        for row in rows {
            requests.push(serde_json::from_str(&row?)?);
        }
        Ok(requests)
    }

    pub async fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        let conn = self.storage.get_connection().await;
        conn.execute(
            "INSERT INTO audit_log (id, data, timestamp) VALUES (?1, ?2, ?3)",
            params![
                entry.id.to_string(),
                serde_json::to_string(entry)?,
                entry.timestamp.timestamp(),
            ],
        )?;
        Ok(())
    }

    pub async fn list_audit(&self) -> Result<Vec<AuditEntry>> {
        let conn = self.storage.get_connection().await;
        let mut stmt = conn.prepare("SELECT data FROM audit_log ORDER BY timestamp ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(serde_json::from_str(&row?)?);
        }
        Ok(entries)
    }

    pub async fn append_anomaly(&self, anomaly: &OracleAnomaly) -> Result<()> {
        let conn = self.storage.get_connection().await;
        conn.execute(
            "INSERT INTO oracle_anomalies (id, data, timestamp) VALUES (?1, ?2, ?3)",
            params![
                anomaly.id.to_string(),
                serde_json::to_string(anomaly)?,
                anomaly.timestamp.timestamp(),
            ],
        )?;
        Ok(())
    }

    pub async fn list_anomalies(&self) -> Result<Vec<OracleAnomaly>> {
        let conn = self.storage.get_connection().await;
        let mut stmt = conn.prepare("SELECT data FROM oracle_anomalies ORDER BY timestamp ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut anomalies = Vec::new();
        for row in rows {
            anomalies.push(serde_json::from_str(&row?)?);
        }
        Ok(anomalies)
    }
}

fn write_round(
    conn: &Connection,
    round: &Round,
    ledger: &BonusLedger,
    requests: &[RandomnessRequest],
) -> Result<()> {
    let round_id = round.id.0 as i64;

    conn.execute(
        "INSERT OR REPLACE INTO rounds (round_id, status, data, updated_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            round_id,
            format!("{:?}", round.status),
            serde_json::to_string(round)?,
            Utc::now().timestamp(),
        ],
    )?;

    for slot in ledger.slots() {
        conn.execute(
            "INSERT OR REPLACE INTO bonus_slots (round_id, deposit_number, phase, data)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                round_id,
                slot.deposit_number as i64,
                format!("{:?}", slot.phase()),
                serde_json::to_string(slot)?,
            ],
        )?;
    }

    conn.execute(
        "DELETE FROM oracle_requests WHERE round_id = ?1",
        params![round_id],
    )?;
    for request in requests
        .iter()
        .filter(|r| r.correlates_to.round_id == round.id)
    {
        conn.execute(
            "INSERT OR REPLACE INTO oracle_requests (request_id, kind, round_id, deposit_number, data)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                request.request_id.0 as i64,
                format!("{:?}", request.kind),
                round_id,
                request.correlates_to.deposit_number as i64,
                serde_json::to_string(request)?,
            ],
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use crate::gateway::RequestKind;
    use crate::pricing::PricingPolicy;
    use crate::types::{Amount, Identity, RequestId, SlotId};

    #[tokio::test]
    async fn test_round_roundtrip_with_slots_and_requests() {
        let storage = Storage::in_memory().await.unwrap();
        let store = RoundStore::new(&storage);
        let config = GameConfig::default();

        let mut round = Round::open(RoundId::FIRST, Utc::now(), &PricingPolicy::from_config(&config));
        round.pot_amount = Amount::from_units(1_000);
        round.deposit_count = 10;
        let mut ledger = BonusLedger::new(round.id);
        ledger
            .open_slot(&mut round, Identity::from("bob"), Utc::now(), &config)
            .unwrap();
        ledger.attach_randomness_request(10, RequestId(7)).unwrap();

        let request = RandomnessRequest {
            request_id: RequestId(7),
            kind: RequestKind::RawRandom,
            correlates_to: SlotId::new(round.id, 10),
            unlock_milestone: None,
            dispatched_at: Utc::now(),
        };
        store.save_round(&round, &ledger, &[request]).await.unwrap();

        let loaded = store.load_rounds().await.unwrap();
        assert_eq!(loaded.len(), 1);
        let (loaded_round, loaded_ledger) = &loaded[0];
        assert_eq!(loaded_round.reserved_bonus, round.reserved_bonus);
        assert_eq!(loaded_ledger.get(10).unwrap().hold, Amount::from_units(50));

        let requests = store.load_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].request_id, RequestId(7));

        // fulfilled request disappears on the next save
        store.save_round(&round, &ledger, &[]).await.unwrap();
        assert!(store.load_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_credit_rolls_back_with_failed_round_write() {
        let storage = Storage::in_memory().await.unwrap();
        let store = RoundStore::new(&storage);
        let config = GameConfig::default();
        let round = Round::open(RoundId::FIRST, Utc::now(), &PricingPolicy::from_config(&config));
        let ledger = BonusLedger::new(round.id);
        let receipt = SettlementReceipt::new(&Identity::from("alice"), Amount::from_units(5), "prize round 1");

        store
            .save_round_with_credit(&round, &ledger, &[], &receipt)
            .await
            .unwrap();

        storage
            .get_connection()
            .await
            .execute("DROP TABLE oracle_requests", [])
            .unwrap();
        let second = SettlementReceipt::new(&Identity::from("alice"), Amount::from_units(5), "prize round 1");
        assert!(store
            .save_round_with_credit(&round, &ledger, &[], &second)
            .await
            .is_err());

        let conn = storage.get_connection().await;
        let credits: i64 = conn
            .query_row("SELECT COUNT(*) FROM settlements", [], |row| row.get(0))
            .unwrap();
        assert_eq!(credits, 1);
    }
}
