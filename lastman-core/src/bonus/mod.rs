//! Bonus slots opened on every Nth deposit, resolved through commit-reveal.
//!
//! A slot advances only when the gateway routes an oracle callback to it:
//!
//! ```text
//! Requested -> RandomnessCommitted -> AwaitingReveal -> Revealed -> Paid
//!      \______________\____________________\__________ Cancelled (operator)
//! ```
//!
//! From the moment it opens, a slot holds up to `floor(potSnapshot * MAX_PCT / 100)`
//! of the pot in the round's `reserved_bonus`, limited to what other slots left
//! unreserved. The reveal resizes the hold to `floor(potSnapshot * pct / 100)`,
//! drawing on unreserved pot if the opening hold fell short. Payment releases
//! it together with the funds.

pub mod commitment;

pub use commitment::{percentage_from_randomness, PercentageCommitment};

use crate::config::GameConfig;
use crate::error::{GameError, Result};
use crate::round::Round;
use crate::settlement::SettlementReceipt;
use crate::types::{Amount, Identity, RequestId, RoundId, SlotId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "state")]
pub enum SlotState {
    /// `None` when the randomness dispatch failed at the transport.
    Requested {
        randomness_request: Option<RequestId>,
    },
    RandomnessCommitted {
        percentage: u32,
        commitment: PercentageCommitment,
    },
    AwaitingReveal {
        percentage: u32,
        commitment: PercentageCommitment,
        timelock_request: RequestId,
        unlock_at: DateTime<Utc>,
    },
    Revealed {
        percentage: u32,
        bonus_amount: Amount,
        revealed_at: DateTime<Utc>,
    },
    Paid {
        percentage: u32,
        bonus_amount: Amount,
        receipt: SettlementReceipt,
    },
    Cancelled {
        reason: String,
        released: Amount,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotPhase {
    Requested,
    RandomnessCommitted,
    AwaitingReveal,
    Revealed,
    Paid,
    Cancelled,
}

impl SlotState {
    pub fn phase(&self) -> SlotPhase {
        match self {
            SlotState::Requested { .. } => SlotPhase::Requested,
            SlotState::RandomnessCommitted { .. } => SlotPhase::RandomnessCommitted,
            SlotState::AwaitingReveal { .. } => SlotPhase::AwaitingReveal,
            SlotState::Revealed { .. } => SlotPhase::Revealed,
            SlotState::Paid { .. } => SlotPhase::Paid,
            SlotState::Cancelled { .. } => SlotPhase::Cancelled,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BonusSlot {
    pub round_id: RoundId,
    pub deposit_number: u64,
    pub depositor: Identity,
    pub pot_snapshot: Amount,
    /// Portion of `reserved_bonus` currently held for this slot.
    pub hold: Amount,
    pub opened_at: DateTime<Utc>,
    pub state: SlotState,
}

impl BonusSlot {
    pub fn id(&self) -> SlotId {
        SlotId::new(self.round_id, self.deposit_number)
    }

    pub fn phase(&self) -> SlotPhase {
        self.state.phase()
    }

    /// Unresolved slots still wait on an oracle.
    pub fn is_unresolved(&self) -> bool {
        matches!(
            self.phase(),
            SlotPhase::Requested | SlotPhase::RandomnessCommitted | SlotPhase::AwaitingReveal
        )
    }

    pub fn view(&self) -> BonusSlotView {
        let (percentage, bonus_amount) = match &self.state {
            SlotState::Revealed {
                percentage,
                bonus_amount,
                ..
            }
            | SlotState::Paid {
                percentage,
                bonus_amount,
                ..
            } => (Some(*percentage), Some(*bonus_amount)),
            _ => (None, None),
        };
        let randomness_request = match &self.state {
            SlotState::Requested { randomness_request } => *randomness_request,
            _ => None,
        };
        let commitment_hash = self.commitment().map(|c| c.hash.clone());
        let (timelock_request, unlock_at) = match &self.state {
            SlotState::AwaitingReveal {
                timelock_request,
                unlock_at,
                ..
            } => (Some(*timelock_request), Some(*unlock_at)),
            _ => (None, None),
        };

        BonusSlotView {
            slot_id: self.id(),
            depositor: self.depositor.clone(),
            pot_snapshot: self.pot_snapshot,
            reserved: self.hold,
            phase: self.phase(),
            randomness_request,
            timelock_request,
            unlock_at,
            commitment_hash,
            percentage,
            bonus_amount,
        }
    }

    /// Commitment of a slot that has drawn its percentage but not revealed it.
    pub fn commitment(&self) -> Option<&PercentageCommitment> {
        match &self.state {
            SlotState::RandomnessCommitted { commitment, .. }
            | SlotState::AwaitingReveal { commitment, .. } => Some(commitment),
            _ => None,
        }
    }
}

/// Public view of a slot. Percentage and amount stay hidden until revealed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BonusSlotView {
    pub slot_id: SlotId,
    pub depositor: Identity,
    pub pot_snapshot: Amount,
    pub reserved: Amount,
    pub phase: SlotPhase,
    pub randomness_request: Option<RequestId>,
    pub timelock_request: Option<RequestId>,
    pub unlock_at: Option<DateTime<Utc>>,
    /// Published once the percentage is drawn, so the reveal can be checked against it.
    pub commitment_hash: Option<String>,
    pub percentage: Option<u32>,
    pub bonus_amount: Option<Amount>,
}

/// Result of routing a randomness callback into the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed {
        slot_id: SlotId,
        percentage: u32,
        commitment_hash: String,
        unlock_at: DateTime<Utc>,
    },
    /// No slot waits on this request any more.
    Ignored,
}

/// Result of routing a timelock callback into the ledger.
#[derive(Debug)]
pub enum RevealOutcome {
    Revealed {
        slot_id: SlotId,
        depositor: Identity,
        percentage: u32,
        bonus_amount: Amount,
        /// Opens the commitment published when the percentage was drawn.
        nonce: String,
        /// Set when the oracle's plaintext disagreed with the committed percentage.
        mismatch: Option<GameError>,
        /// Formula amount the pot could not cover, if the bonus had to be capped.
        capped_from: Option<Amount>,
    },
    Ignored,
}

/// What a slot still needs from the oracle after a failed dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingDispatch {
    Randomness,
    Timelock { percentage: u32 },
}

/// Bonus slots of one round, keyed by deposit number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BonusLedger {
    round_id: RoundId,
    slots: BTreeMap<u64, BonusSlot>,
}

impl BonusLedger {
    pub fn new(round_id: RoundId) -> Self {
        Self {
            round_id,
            slots: BTreeMap::new(),
        }
    }

    pub fn from_slots(round_id: RoundId, slots: impl IntoIterator<Item = BonusSlot>) -> Self {
        Self {
            round_id,
            slots: slots
                .into_iter()
                .map(|slot| (slot.deposit_number, slot))
                .collect(),
        }
    }

    pub fn round_id(&self) -> RoundId {
        self.round_id
    }

    pub fn get(&self, deposit_number: u64) -> Option<&BonusSlot> {
        self.slots.get(&deposit_number)
    }

    pub fn slots(&self) -> impl Iterator<Item = &BonusSlot> {
        self.slots.values()
    }

    pub fn views(&self) -> Vec<BonusSlotView> {
        self.slots.values().map(BonusSlot::view).collect()
    }

    pub fn unresolved_count(&self) -> usize {
        self.slots.values().filter(|s| s.is_unresolved()).count()
    }

    /// Most recently revealed or paid slot.
    pub fn last_revealed(&self) -> Option<&BonusSlot> {
        self.slots.values().rev().find(|s| {
            matches!(s.phase(), SlotPhase::Revealed | SlotPhase::Paid)
        })
    }

    /// Open a slot for the deposit that just landed and reserve its maximum payout.
    pub fn open_slot(
        &mut self,
        round: &mut Round,
        depositor: Identity,
        now: DateTime<Utc>,
        config: &GameConfig,
    ) -> Result<&mut BonusSlot> {
        let deposit_number = round.deposit_count;
        if self.slots.contains_key(&deposit_number) {
            return Err(GameError::internal(format!(
                "slot {} already exists",
                SlotId::new(round.id, deposit_number)
            )));
        }

        let pot_snapshot = round.pot_amount;
        let hold = pot_snapshot
            .mul_div_floor(config.max_bonus_pct as u128, 100)
            .min(round.available_pot());
        round.reserved_bonus = round.reserved_bonus.saturating_add(hold);

        let slot = BonusSlot {
            round_id: round.id,
            deposit_number,
            depositor,
            pot_snapshot,
            hold,
            opened_at: now,
            state: SlotState::Requested {
                randomness_request: None,
            },
        };

        tracing::debug!(
            slot = %slot.id(),
            pot_snapshot = %pot_snapshot,
            hold = %hold,
            "Opened bonus slot"
        );
        Ok(self.slots.entry(deposit_number).or_insert(slot))
    }

    /// Record the randomness request id once the transport accepted it.
    pub fn attach_randomness_request(&mut self, deposit_number: u64, request_id: RequestId) -> Result<()> {
        let slot = self.slot_mut(deposit_number)?;
        match &mut slot.state {
            SlotState::Requested { randomness_request } if randomness_request.is_none() => {
                *randomness_request = Some(request_id);
                Ok(())
            }
            _ => Err(GameError::internal(format!(
                "slot {} is not waiting for a randomness request",
                slot.id()
            ))),
        }
    }

    pub fn on_randomness_fulfilled(
        &mut self,
        request_id: RequestId,
        raw_value: &[u8],
        now: DateTime<Utc>,
        config: &GameConfig,
    ) -> CommitOutcome {
        let Some(slot) = self.slots.values_mut().find(|s| {
            matches!(
                s.state,
                SlotState::Requested { randomness_request: Some(id) } if id == request_id
            )
        }) else {
            return CommitOutcome::Ignored;
        };

        let percentage =
            percentage_from_randomness(raw_value, config.min_bonus_pct, config.bonus_pct_span());
        let commitment = PercentageCommitment::create(percentage, now);
        let commitment_hash = commitment.hash.clone();
        let unlock_at = slot.opened_at + config.reveal_delay();

        slot.state = SlotState::RandomnessCommitted {
            percentage,
            commitment,
        };

        tracing::info!(slot = %slot.id(), request_id = %request_id, "Bonus percentage committed");
        CommitOutcome::Committed {
            slot_id: slot.id(),
            percentage,
            commitment_hash,
            unlock_at,
        }
    }

    /// Move a committed slot to `AwaitingReveal` once its timelock request is out.
    pub fn begin_reveal(
        &mut self,
        deposit_number: u64,
        timelock_request: RequestId,
        unlock_at: DateTime<Utc>,
    ) -> Result<()> {
        let slot = self.slot_mut(deposit_number)?;
        let SlotState::RandomnessCommitted {
            percentage,
            commitment,
        } = &slot.state
        else {
            return Err(GameError::internal(format!(
                "slot {} is not committed",
                slot.id()
            )));
        };

        slot.state = SlotState::AwaitingReveal {
            percentage: *percentage,
            commitment: commitment.clone(),
            timelock_request,
            unlock_at,
        };
        Ok(())
    }

    pub fn on_timelock_fulfilled(
        &mut self,
        round: &mut Round,
        request_id: RequestId,
        decrypted_percentage: u32,
        now: DateTime<Utc>,
    ) -> RevealOutcome {
        let Some(slot) = self.slots.values_mut().find(|s| {
            matches!(
                s.state,
                SlotState::AwaitingReveal { timelock_request, .. } if timelock_request == request_id
            )
        }) else {
            return RevealOutcome::Ignored;
        };

        let SlotState::AwaitingReveal {
            percentage,
            commitment,
            unlock_at,
            ..
        } = &slot.state
        else {
            return RevealOutcome::Ignored;
        };
        let percentage = *percentage;
        let nonce = commitment.nonce.clone();

        if now < *unlock_at {
            tracing::warn!(
                slot = %slot.id(),
                unlock_at = %unlock_at,
                "Timelock reveal arrived before its unlock milestone"
            );
        }

        let mismatch = if decrypted_percentage != percentage {
            Some(GameError::RevealMismatch {
                slot: slot.id(),
                committed: percentage,
                claimed: decrypted_percentage,
            })
        } else {
            None
        };

        // the hold may grow into unreserved pot, never into other slots' holds
        let owed = slot.pot_snapshot.mul_div_floor(percentage as u128, 100);
        let coverable = round.available_pot().saturating_add(slot.hold);
        let bonus_amount = owed.min(coverable);
        let capped_from = (bonus_amount < owed).then_some(owed);
        round.reserved_bonus = round
            .reserved_bonus
            .saturating_sub(slot.hold)
            .saturating_add(bonus_amount);
        slot.hold = bonus_amount;
        slot.state = SlotState::Revealed {
            percentage,
            bonus_amount,
            revealed_at: now,
        };

        tracing::info!(
            slot = %slot.id(),
            percentage,
            bonus_amount = %bonus_amount,
            "Bonus revealed"
        );

        RevealOutcome::Revealed {
            slot_id: slot.id(),
            depositor: slot.depositor.clone(),
            percentage,
            bonus_amount,
            nonce,
            mismatch,
            capped_from,
        }
    }

    /// Payee and amount of a revealed slot.
    pub fn payable(&self, slot_id: SlotId) -> Result<(Identity, Amount)> {
        let slot = self
            .slots
            .get(&slot_id.deposit_number)
            .ok_or(GameError::SlotNotFound(slot_id))?;
        match &slot.state {
            SlotState::Revealed { bonus_amount, .. } => Ok((slot.depositor.clone(), *bonus_amount)),
            _ => Err(GameError::NotRevealed(slot_id)),
        }
    }

    /// Apply a settled bonus payment: the amount leaves both the pot and the reserve.
    pub fn complete_payment(
        &mut self,
        round: &mut Round,
        deposit_number: u64,
        receipt: SettlementReceipt,
    ) -> Result<()> {
        let slot = self.slot_mut(deposit_number)?;
        let SlotState::Revealed {
            percentage,
            bonus_amount,
            ..
        } = slot.state
        else {
            return Err(GameError::NotRevealed(slot.id()));
        };

        round.pot_amount = round.pot_amount.saturating_sub(bonus_amount);
        round.reserved_bonus = round.reserved_bonus.saturating_sub(slot.hold);
        slot.hold = Amount::ZERO;
        slot.state = SlotState::Paid {
            percentage,
            bonus_amount,
            receipt,
        };
        Ok(())
    }

    /// Force-cancel an unresolved slot, releasing its hold.
    ///
    /// Returns the released amount and the oracle request that was outstanding.
    pub fn cancel(
        &mut self,
        round: &mut Round,
        deposit_number: u64,
        reason: &str,
    ) -> Result<(Amount, Option<RequestId>)> {
        let slot = self.slot_mut(deposit_number)?;
        let outstanding = match &slot.state {
            SlotState::Requested { randomness_request } => *randomness_request,
            SlotState::RandomnessCommitted { .. } => None,
            SlotState::AwaitingReveal {
                timelock_request, ..
            } => Some(*timelock_request),
            _ => return Err(GameError::SlotNotCancellable(slot.id())),
        };

        let released = slot.hold;
        round.reserved_bonus = round.reserved_bonus.saturating_sub(released);
        slot.hold = Amount::ZERO;
        slot.state = SlotState::Cancelled {
            reason: reason.to_string(),
            released,
        };
        Ok((released, outstanding))
    }

    /// Oracle phase a slot is stuck in because its dispatch never went out.
    pub fn pending_dispatch(&self, deposit_number: u64) -> Option<PendingDispatch> {
        match &self.slots.get(&deposit_number)?.state {
            SlotState::Requested {
                randomness_request: None,
            } => Some(PendingDispatch::Randomness),
            SlotState::RandomnessCommitted { percentage, .. } => Some(PendingDispatch::Timelock {
                percentage: *percentage,
            }),
            _ => None,
        }
    }

    fn slot_mut(&mut self, deposit_number: u64) -> Result<&mut BonusSlot> {
        self.slots
            .get_mut(&deposit_number)
            .ok_or(GameError::SlotNotFound(SlotId::new(self.round_id, deposit_number)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::PricingPolicy;
    use crate::types::UNIT;

    fn round_with_pot(units: u128, deposits: u64) -> Round {
        let config = GameConfig::default();
        let mut round = Round::open(RoundId::FIRST, Utc::now(), &PricingPolicy::from_config(&config));
        round.pot_amount = Amount::from_units(units);
        round.deposit_count = deposits;
        round
    }

    fn committed_slot(
        ledger: &mut BonusLedger,
        round: &mut Round,
        config: &GameConfig,
        raw_last_byte: u8,
    ) -> (u32, RequestId) {
        let now = Utc::now();
        ledger
            .open_slot(round, Identity::from("bob"), now, config)
            .unwrap();
        let n = round.deposit_count;
        ledger.attach_randomness_request(n, RequestId(1)).unwrap();

        let mut raw = [0u8; 32];
        raw[31] = raw_last_byte;
        let CommitOutcome::Committed {
            percentage,
            unlock_at,
            ..
        } = ledger.on_randomness_fulfilled(RequestId(1), &raw, now, config)
        else {
            panic!("expected commit");
        };
        ledger.begin_reveal(n, RequestId(2), unlock_at).unwrap();
        (percentage, RequestId(2))
    }

    #[test]
    fn test_open_slot_holds_maximum() {
        let config = GameConfig::default();
        let mut round = round_with_pot(10 * UNIT, 10);
        let mut ledger = BonusLedger::new(RoundId::FIRST);

        let slot = ledger
            .open_slot(&mut round, Identity::from("bob"), Utc::now(), &config)
            .unwrap();
        assert_eq!(slot.deposit_number, 10);
        assert_eq!(slot.hold, Amount::from_units(UNIT / 2));
        assert_eq!(round.reserved_bonus, Amount::from_units(UNIT / 2));
        assert!(round.reserved_bonus <= round.pot_amount);
    }

    #[test]
    fn test_reveal_shrinks_hold_to_bonus() {
        let config = GameConfig::default();
        let mut round = round_with_pot(10 * UNIT, 10);
        let mut ledger = BonusLedger::new(RoundId::FIRST);

        // raw = 2 -> percentage 3
        let (percentage, timelock) = committed_slot(&mut ledger, &mut round, &config, 2);
        assert_eq!(percentage, 3);

        let outcome = ledger.on_timelock_fulfilled(&mut round, timelock, 3, Utc::now());
        let RevealOutcome::Revealed {
            bonus_amount,
            mismatch,
            ..
        } = outcome
        else {
            panic!("expected reveal");
        };
        assert!(mismatch.is_none());
        assert_eq!(bonus_amount, Amount::from_units(3 * UNIT / 10));
        assert_eq!(round.reserved_bonus, bonus_amount);
        assert_eq!(ledger.get(10).unwrap().phase(), SlotPhase::Revealed);
    }

    #[test]
    fn test_mismatched_reveal_uses_committed_percentage() {
        let config = GameConfig::default();
        let mut round = round_with_pot(10 * UNIT, 10);
        let mut ledger = BonusLedger::new(RoundId::FIRST);
        let (percentage, timelock) = committed_slot(&mut ledger, &mut round, &config, 0);
        assert_eq!(percentage, 1);

        let outcome = ledger.on_timelock_fulfilled(&mut round, timelock, 5, Utc::now());
        let RevealOutcome::Revealed {
            percentage: used,
            bonus_amount,
            mismatch,
            ..
        } = outcome
        else {
            panic!("expected reveal");
        };
        assert_eq!(used, 1);
        assert_eq!(bonus_amount, Amount::from_units(UNIT / 10));
        assert!(matches!(
            mismatch,
            Some(GameError::RevealMismatch {
                committed: 1,
                claimed: 5,
                ..
            })
        ));
    }

    #[test]
    fn test_duplicate_randomness_is_ignored() {
        let config = GameConfig::default();
        let mut round = round_with_pot(10 * UNIT, 10);
        let mut ledger = BonusLedger::new(RoundId::FIRST);
        committed_slot(&mut ledger, &mut round, &config, 1);

        let again = ledger.on_randomness_fulfilled(RequestId(1), &[9u8; 32], Utc::now(), &config);
        assert_eq!(again, CommitOutcome::Ignored);
        assert_eq!(ledger.get(10).unwrap().phase(), SlotPhase::AwaitingReveal);
    }

    #[test]
    fn test_pay_requires_reveal() {
        let config = GameConfig::default();
        let mut round = round_with_pot(10 * UNIT, 10);
        let mut ledger = BonusLedger::new(RoundId::FIRST);
        ledger
            .open_slot(&mut round, Identity::from("bob"), Utc::now(), &config)
            .unwrap();

        let slot_id = SlotId::new(RoundId::FIRST, 10);
        assert!(matches!(ledger.payable(slot_id), Err(GameError::NotRevealed(_))));
        assert!(matches!(
            ledger.payable(SlotId::new(RoundId::FIRST, 20)),
            Err(GameError::SlotNotFound(_))
        ));
    }

    #[test]
    fn test_payment_debits_pot_and_reserve() {
        let config = GameConfig::default();
        let mut round = round_with_pot(10 * UNIT, 10);
        let mut ledger = BonusLedger::new(RoundId::FIRST);
        let (_, timelock) = committed_slot(&mut ledger, &mut round, &config, 4);
        ledger.on_timelock_fulfilled(&mut round, timelock, 5, Utc::now());

        let (to, amount) = ledger.payable(SlotId::new(RoundId::FIRST, 10)).unwrap();
        let receipt = SettlementReceipt::new(&to, amount, "bonus");
        ledger.complete_payment(&mut round, 10, receipt).unwrap();

        assert_eq!(round.pot_amount, Amount::from_units(10 * UNIT - UNIT / 2));
        assert_eq!(round.reserved_bonus, Amount::ZERO);
        assert_eq!(ledger.get(10).unwrap().phase(), SlotPhase::Paid);
        assert!(ledger.get(10).unwrap().view().percentage == Some(5));
    }

    #[test]
    fn test_cancel_releases_hold() {
        let config = GameConfig::default();
        let mut round = round_with_pot(10 * UNIT, 10);
        let mut ledger = BonusLedger::new(RoundId::FIRST);
        let (_, timelock) = committed_slot(&mut ledger, &mut round, &config, 0);

        let (released, outstanding) = ledger.cancel(&mut round, 10, "oracle stuck").unwrap();
        assert_eq!(released, Amount::from_units(UNIT / 2));
        assert_eq!(outstanding, Some(timelock));
        assert_eq!(round.reserved_bonus, Amount::ZERO);

        assert!(matches!(
            ledger.cancel(&mut round, 10, "again"),
            Err(GameError::SlotNotCancellable(_))
        ));
    }

    #[test]
    fn test_reveal_grows_short_hold_from_unreserved_pot() {
        let config = GameConfig::default();
        let mut round = round_with_pot(10 * UNIT, 10);
        let others = Amount::from_units(9 * UNIT + 8 * UNIT / 10);
        round.reserved_bonus = others;
        let mut ledger = BonusLedger::new(RoundId::FIRST);

        // raw = 4 -> percentage 5, but only 0.2 was left to hold
        let (_, timelock) = committed_slot(&mut ledger, &mut round, &config, 4);
        assert_eq!(ledger.get(10).unwrap().hold, Amount::from_units(UNIT / 5));

        // the other holds resolve before this reveal
        round.reserved_bonus = round.reserved_bonus.saturating_sub(others);

        let RevealOutcome::Revealed {
            bonus_amount,
            capped_from,
            ..
        } = ledger.on_timelock_fulfilled(&mut round, timelock, 5, Utc::now())
        else {
            panic!("expected reveal");
        };
        assert_eq!(bonus_amount, Amount::from_units(UNIT / 2));
        assert!(capped_from.is_none());
        assert_eq!(round.reserved_bonus, bonus_amount);
        assert_eq!(ledger.get(10).unwrap().hold, bonus_amount);
    }

    #[test]
    fn test_reveal_caps_bonus_when_pot_is_spoken_for() {
        let config = GameConfig::default();
        let mut round = round_with_pot(10 * UNIT, 10);
        round.reserved_bonus = Amount::from_units(9 * UNIT + 8 * UNIT / 10);
        let mut ledger = BonusLedger::new(RoundId::FIRST);
        let (_, timelock) = committed_slot(&mut ledger, &mut round, &config, 4);

        let RevealOutcome::Revealed {
            bonus_amount,
            capped_from,
            ..
        } = ledger.on_timelock_fulfilled(&mut round, timelock, 5, Utc::now())
        else {
            panic!("expected reveal");
        };
        assert_eq!(bonus_amount, Amount::from_units(UNIT / 5));
        assert_eq!(capped_from, Some(Amount::from_units(UNIT / 2)));
        assert_eq!(round.reserved_bonus, round.pot_amount);
    }

    #[test]
    fn test_reveal_nonce_opens_published_commitment() {
        let config = GameConfig::default();
        let mut round = round_with_pot(10 * UNIT, 10);
        let mut ledger = BonusLedger::new(RoundId::FIRST);
        let (percentage, timelock) = committed_slot(&mut ledger, &mut round, &config, 1);
        let hash = ledger.get(10).unwrap().view().commitment_hash.unwrap();

        let RevealOutcome::Revealed { nonce, .. } =
            ledger.on_timelock_fulfilled(&mut round, timelock, percentage, Utc::now())
        else {
            panic!("expected reveal");
        };
        let published = PercentageCommitment {
            hash,
            nonce,
            committed_at: Utc::now(),
        };
        assert!(published.verify(percentage));
        assert!(!published.verify(percentage + 1));
        assert!(ledger.get(10).unwrap().view().commitment_hash.is_none());
    }

    #[test]
    fn test_percentage_hidden_until_reveal() {
        let config = GameConfig::default();
        let mut round = round_with_pot(10 * UNIT, 10);
        let mut ledger = BonusLedger::new(RoundId::FIRST);
        committed_slot(&mut ledger, &mut round, &config, 3);

        let view = ledger.get(10).unwrap().view();
        assert_eq!(view.phase, SlotPhase::AwaitingReveal);
        assert!(view.percentage.is_none());
        assert!(view.bonus_amount.is_none());
        assert!(view.commitment_hash.is_some());
        assert_eq!(view.timelock_request, Some(RequestId(2)));
    }
}
