#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use lastman_core::{
    Amount, CallbackOutcome, DepositReceipt, GameConfig, Identity, InMemoryLedger, ManualOracle,
    RequestId, RoundEngine, SlotId, UNIT,
};
use std::sync::Arc;

pub struct Harness {
    pub engine: RoundEngine,
    pub ledger: Arc<InMemoryLedger>,
    pub oracle: Arc<ManualOracle>,
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
}

pub fn at(secs: i64) -> DateTime<Utc> {
    t0() + Duration::seconds(secs)
}

pub const DAY: i64 = 24 * 3600;

/// Flat 0.5 deposits, so twenty deposits build a 10.0 pot.
pub fn flat_config() -> GameConfig {
    GameConfig {
        base_deposit: Amount::from_units(UNIT / 2),
        pot_percentage_bps: 0,
        ..GameConfig::default()
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("lastman_core=debug")
        .with_test_writer()
        .try_init();
}

pub fn harness(config: GameConfig) -> Harness {
    init_tracing();
    let ledger = Arc::new(InMemoryLedger::new());
    let oracle = Arc::new(ManualOracle::new());
    let engine = RoundEngine::new(config, ledger.clone(), oracle.clone()).unwrap();
    Harness {
        engine,
        ledger,
        oracle,
    }
}

pub fn id(name: &str) -> Identity {
    Identity::from(name)
}

pub fn units(display: &str) -> Amount {
    Amount::parse_decimal(display).unwrap()
}

/// Raw oracle value that maps to `percentage` under the default 1..=5 range.
pub fn raw_for(percentage: u8) -> [u8; 32] {
    let mut raw = [0u8; 32];
    raw[31] = percentage - 1;
    raw
}

impl Harness {
    /// Deposit exactly the quoted amount.
    pub async fn deposit(&self, who: &str, now: DateTime<Utc>) -> DepositReceipt {
        let amount = match self.engine.current_round(now).await {
            Some(round) => round.next_deposit_amount,
            None => self.engine.pricing().base_deposit(),
        };
        self.engine
            .submit_deposit(&id(who), amount, now)
            .await
            .unwrap()
    }

    pub fn request_for(&self, slot: SlotId) -> RequestId {
        self.engine
            .outstanding_requests()
            .into_iter()
            .find(|r| r.correlates_to == slot)
            .map(|r| r.request_id)
            .unwrap()
    }

    /// Drive a slot through randomness and an honest reveal.
    pub async fn resolve(&self, slot: SlotId, percentage: u8, now: DateTime<Utc>) -> CallbackOutcome {
        let callback = self
            .oracle
            .fulfill_random(self.request_for(slot), Some(raw_for(percentage)))
            .unwrap();
        let outcome = self.engine.handle_callback(callback, now).await.unwrap();
        let CallbackOutcome::Committed {
            timelock_request: Some(timelock),
            ..
        } = outcome
        else {
            panic!("expected commit, got {:?}", outcome);
        };

        let callback = self.oracle.fulfill_timelock(timelock, None).unwrap();
        self.engine
            .handle_callback(callback, now + Duration::seconds(DAY))
            .await
            .unwrap()
    }
}
