use crate::pricing::PricingPolicy;
use crate::settlement::SettlementReceipt;
use crate::types::{Amount, Identity, RoundId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Round lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RoundStatus {
    Active,
    /// Timeout is observable but nobody has finalized the round yet.
    AwaitingSettlement,
    Finalized,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrizeClaim {
    pub winner: Identity,
    pub amount: Amount,
    pub claimed_at: DateTime<Utc>,
    pub receipt: SettlementReceipt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    pub id: RoundId,
    pub pot_amount: Amount,
    pub reserved_bonus: Amount,
    pub deposit_count: u64,
    pub last_depositor: Option<Identity>,
    pub last_deposit_time: Option<DateTime<Utc>>,
    pub start_time: DateTime<Utc>,
    pub next_deposit_amount: Amount,
    pub status: RoundStatus,
    pub winner: Option<Identity>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Pot at the moment the round was finalized.
    pub final_pot: Option<Amount>,
    pub prize_claim: Option<PrizeClaim>,
}

impl Round {
    pub fn open(id: RoundId, now: DateTime<Utc>, pricing: &PricingPolicy) -> Self {
        Self {
            id,
            pot_amount: Amount::ZERO,
            reserved_bonus: Amount::ZERO,
            deposit_count: 0,
            last_depositor: None,
            last_deposit_time: None,
            start_time: now,
            next_deposit_amount: pricing.next_deposit(Amount::ZERO),
            status: RoundStatus::Active,
            winner: None,
            ended_at: None,
            final_pot: None,
            prize_claim: None,
        }
    }

    pub fn last_activity_time(&self) -> DateTime<Utc> {
        self.last_deposit_time.unwrap_or(self.start_time)
    }

    /// Moment at which the round becomes finalizable. Empty rounds have none.
    pub fn deadline(&self, timeout: Duration) -> Option<DateTime<Utc>> {
        self.last_deposit_time.map(|t| t + timeout)
    }

    pub fn is_timed_out(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.deposit_count > 0 && now - self.last_activity_time() >= timeout
    }

    /// Status as an observer at `now` would see it.
    pub fn observed_status(&self, now: DateTime<Utc>, timeout: Duration) -> RoundStatus {
        match self.status {
            RoundStatus::Active if self.is_timed_out(now, timeout) => {
                RoundStatus::AwaitingSettlement
            }
            status => status,
        }
    }

    /// Pot not earmarked for outstanding bonus slots.
    pub fn available_pot(&self) -> Amount {
        self.pot_amount.saturating_sub(self.reserved_bonus)
    }

    pub fn is_claimed(&self) -> bool {
        self.prize_claim.is_some()
    }

    pub fn snapshot(&self, now: DateTime<Utc>, timeout: Duration) -> RoundSnapshot {
        let time_remaining = match (self.status, self.deadline(timeout)) {
            (RoundStatus::Active, Some(deadline)) => (deadline - now).max(Duration::zero()),
            (RoundStatus::Active, None) => timeout,
            _ => Duration::zero(),
        };

        RoundSnapshot {
            id: self.id,
            pot_amount: self.pot_amount,
            reserved_bonus: self.reserved_bonus,
            available_pot: self.available_pot(),
            deposit_count: self.deposit_count,
            last_depositor: self.last_depositor.clone(),
            last_deposit_time: self.last_deposit_time,
            start_time: self.start_time,
            next_deposit_amount: self.next_deposit_amount,
            status: self.observed_status(now, timeout),
            winner: self.winner.clone(),
            deadline: self.deadline(timeout),
            time_remaining_secs: time_remaining.num_seconds(),
            prize_claimed: self.is_claimed(),
        }
    }
}

/// Read-only view of a round for callers and UIs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundSnapshot {
    pub id: RoundId,
    pub pot_amount: Amount,
    pub reserved_bonus: Amount,
    pub available_pot: Amount,
    pub deposit_count: u64,
    pub last_depositor: Option<Identity>,
    pub last_deposit_time: Option<DateTime<Utc>>,
    pub start_time: DateTime<Utc>,
    pub next_deposit_amount: Amount,
    pub status: RoundStatus,
    pub winner: Option<Identity>,
    pub deadline: Option<DateTime<Utc>>,
    pub time_remaining_secs: i64,
    pub prize_claimed: bool,
}

/// Record of a finalized round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundSummary {
    pub round_id: RoundId,
    pub winner: Identity,
    pub final_pot: Amount,
    pub total_deposits: u64,
    pub ended_at: DateTime<Utc>,
    pub last_bonus: Option<LastBonus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastBonus {
    pub depositor: Identity,
    pub amount: Amount,
    pub percentage: u32,
    pub deposit_number: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;

    #[test]
    fn test_empty_round_never_times_out() {
        let config = GameConfig::default();
        let pricing = PricingPolicy::from_config(&config);
        let start = Utc::now();
        let round = Round::open(RoundId::FIRST, start, &pricing);

        let much_later = start + Duration::days(30);
        assert!(!round.is_timed_out(much_later, config.round_timeout()));
        assert_eq!(
            round.observed_status(much_later, config.round_timeout()),
            RoundStatus::Active
        );
        assert!(round.last_depositor.is_none());
        assert_eq!(round.next_deposit_amount, config.base_deposit);
    }

    #[test]
    fn test_observed_status_after_timeout() {
        let config = GameConfig::default();
        let timeout = config.round_timeout();
        let pricing = PricingPolicy::from_config(&config);
        let start = Utc::now();
        let mut round = Round::open(RoundId::FIRST, start, &pricing);
        round.deposit_count = 1;
        round.last_depositor = Some(Identity::from("alice"));
        round.last_deposit_time = Some(start);

        assert_eq!(
            round.observed_status(start + timeout - Duration::seconds(1), timeout),
            RoundStatus::Active
        );
        assert_eq!(
            round.observed_status(start + timeout, timeout),
            RoundStatus::AwaitingSettlement
        );

        let snapshot = round.snapshot(start + Duration::hours(1), timeout);
        assert_eq!(snapshot.time_remaining_secs, 23 * 3600);
    }
}
