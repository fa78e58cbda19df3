//! Round lifecycle and payout engine.
//!
//! Every round lives behind its own async mutex, so all mutations of one
//! round and its bonus slots are serialized while different rounds proceed
//! independently. The "current round" is a single id swapped only when a
//! round is opened or finalized.

use crate::audit::{AdminAction, AuditEntry, OracleAnomaly};
use crate::bonus::{BonusLedger, BonusSlotView, CommitOutcome, PendingDispatch, RevealOutcome};
use crate::config::GameConfig;
use crate::error::{GameError, Result};
use crate::events::GameEvent;
use crate::gateway::{
    DispatchParams, OracleCallback, OracleTransport, RandomnessGateway, RandomnessRequest,
};
use crate::pricing::PricingPolicy;
use crate::round::{LastBonus, PrizeClaim, Round, RoundSnapshot, RoundStatus, RoundSummary};
use crate::settlement::{Settlement, SettlementReceipt};
use crate::storage::{RoundStore, Storage};
use crate::types::{Amount, Identity, RequestId, RoundId, SlotId};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};

const EVENT_BUFFER: usize = 256;

/// A round together with the bonus slots it owns.
#[derive(Debug, Clone)]
struct RoundEntry {
    round: Round,
    bonuses: BonusLedger,
}

type SharedEntry = Arc<Mutex<RoundEntry>>;

#[derive(Debug, Clone)]
pub struct DepositReceipt {
    pub round_id: RoundId,
    pub deposit_number: u64,
    pub new_pot_amount: Amount,
    pub next_deposit_amount: Amount,
    pub deadline: DateTime<Utc>,
    /// Slot opened by this deposit, if it hit the bonus interval.
    pub bonus_slot: Option<SlotId>,
}

#[derive(Debug, Clone)]
pub struct FinalizedRound {
    pub round_id: RoundId,
    pub winner: Identity,
    pub pot_amount: Amount,
    pub reserved_bonus: Amount,
    pub unresolved_slots: usize,
    pub next_round: RoundId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// Percentage committed; `timelock_request` is `None` if the timelock dispatch failed.
    Committed {
        slot: SlotId,
        timelock_request: Option<RequestId>,
    },
    Revealed {
        slot: SlotId,
        bonus_amount: Amount,
        mismatch: bool,
        paid: bool,
    },
    Ignored,
}

pub struct RoundEngine {
    config: GameConfig,
    pricing: PricingPolicy,
    rounds: RwLock<BTreeMap<RoundId, SharedEntry>>,
    active: RwLock<Option<RoundId>>,
    // serializes the very first round opening
    lifecycle: Mutex<()>,
    gateway: RandomnessGateway,
    settlement: Arc<dyn Settlement>,
    storage: Option<Arc<Storage>>,
    events: broadcast::Sender<GameEvent>,
    anomalies: parking_lot::Mutex<Vec<OracleAnomaly>>,
    audit: parking_lot::Mutex<Vec<AuditEntry>>,
}

impl RoundEngine {
    pub fn new(
        config: GameConfig,
        settlement: Arc<dyn Settlement>,
        transport: Arc<dyn OracleTransport>,
    ) -> Result<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        Ok(Self {
            pricing: PricingPolicy::from_config(&config),
            config,
            rounds: RwLock::new(BTreeMap::new()),
            active: RwLock::new(None),
            lifecycle: Mutex::new(()),
            gateway: RandomnessGateway::new(transport),
            settlement,
            storage: None,
            events,
            anomalies: parking_lot::Mutex::new(Vec::new()),
            audit: parking_lot::Mutex::new(Vec::new()),
        })
    }

    /// Build an engine backed by `storage`, restoring whatever state it holds.
    pub async fn with_storage(
        config: GameConfig,
        settlement: Arc<dyn Settlement>,
        transport: Arc<dyn OracleTransport>,
        storage: Arc<Storage>,
    ) -> Result<Self> {
        config.validate()?;
        let store = RoundStore::new(&storage);
        let persisted = store.load_rounds().await?;
        let requests = store.load_requests().await?;
        let anomalies = store.list_anomalies().await?;
        let audit = store.list_audit().await?;

        let mut rounds = BTreeMap::new();
        let mut active = None;
        for (round, bonuses) in persisted {
            if round.status == RoundStatus::Active {
                active = Some(round.id);
            }
            rounds.insert(round.id, Arc::new(Mutex::new(RoundEntry { round, bonuses })));
        }

        tracing::info!(
            "Restored {} rounds, {} outstanding oracle requests, active round: {:?}",
            rounds.len(),
            requests.len(),
            active
        );

        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Ok(Self {
            pricing: PricingPolicy::from_config(&config),
            config,
            rounds: RwLock::new(rounds),
            active: RwLock::new(active),
            lifecycle: Mutex::new(()),
            gateway: RandomnessGateway::restore(transport, requests),
            settlement,
            storage: Some(storage),
            events,
            anomalies: parking_lot::Mutex::new(anomalies),
            audit: parking_lot::Mutex::new(audit),
        })
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn pricing(&self) -> &PricingPolicy {
        &self.pricing
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.events.subscribe()
    }

    /// Open a new round. Fails if a round is already active.
    pub async fn open_round(&self, now: DateTime<Utc>) -> Result<RoundSnapshot> {
        let _lifecycle = self.lifecycle.lock().await;
        if let Some(id) = *self.active.read() {
            return Err(GameError::RoundAlreadyActive(id));
        }

        let entry = self.install_round(self.next_round_id(), now).await;
        let guard = entry.lock().await;
        Ok(guard.round.snapshot(now, self.config.round_timeout()))
    }

    pub async fn submit_deposit(
        &self,
        depositor: &Identity,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<DepositReceipt> {
        let entry = self.active_entry_or_open(now).await;
        let mut guard = entry.lock().await;
        let RoundEntry { round, bonuses } = &mut *guard;
        let timeout = self.config.round_timeout();

        if round.status != RoundStatus::Active {
            return Err(GameError::RoundNotActive(round.id));
        }
        if round.is_timed_out(now, timeout) {
            return Err(GameError::TimeoutElapsed(round.id));
        }
        if amount != round.next_deposit_amount {
            return Err(GameError::WrongAmount {
                expected: round.next_deposit_amount,
                got: amount,
            });
        }
        let new_pot = round
            .pot_amount
            .checked_add(amount)
            .ok_or_else(|| GameError::internal("pot overflow"))?;

        round.pot_amount = new_pot;
        round.deposit_count += 1;
        round.last_depositor = Some(depositor.clone());
        round.last_deposit_time = Some(now);
        round.next_deposit_amount = self.pricing.next_deposit(new_pot);

        let deposit_number = round.deposit_count;
        let deadline = now + timeout;
        tracing::info!(
            round_id = %round.id,
            deposit_number,
            depositor = %depositor,
            amount = %amount,
            pot = %new_pot,
            "Deposit accepted"
        );
        self.emit(GameEvent::DepositMade {
            round_id: round.id,
            depositor: depositor.clone(),
            amount,
            deposit_number,
            new_pot_amount: new_pot,
            next_deposit_amount: round.next_deposit_amount,
            deadline,
        });

        let bonus_slot = if deposit_number % self.config.bonus_interval == 0 {
            let slot_id = bonuses
                .open_slot(round, depositor.clone(), now, &self.config)?
                .id();

            let request_id = match self.gateway.dispatch(slot_id, DispatchParams::RawRandom).await {
                Ok(request) => {
                    bonuses.attach_randomness_request(deposit_number, request.request_id)?;
                    Some(request.request_id)
                }
                Err(e) => {
                    tracing::warn!(slot = %slot_id, "Randomness dispatch failed, slot needs redispatch: {}", e);
                    None
                }
            };

            self.emit(GameEvent::BonusRandomnessRequested {
                slot: slot_id,
                depositor: depositor.clone(),
                request_id,
                pot_at_time: new_pot,
            });
            Some(slot_id)
        } else {
            None
        };

        let receipt = DepositReceipt {
            round_id: round.id,
            deposit_number,
            new_pot_amount: new_pot,
            next_deposit_amount: round.next_deposit_amount,
            deadline,
            bonus_slot,
        };

        self.persist(&guard).await?;
        Ok(receipt)
    }

    /// Finalize the active round once its timeout has passed. Any caller may do this.
    pub async fn check_timeout(&self, now: DateTime<Utc>) -> Result<FinalizedRound> {
        let entry = self
            .active_entry()
            .ok_or(GameError::RoundNotFound(RoundId::FIRST))?;
        let mut guard = entry.lock().await;
        let timeout = self.config.round_timeout();

        let RoundEntry { round, bonuses } = &mut *guard;
        if round.status != RoundStatus::Active {
            return Err(GameError::RoundNotActive(round.id));
        }
        let elapsed = now - round.last_activity_time();
        if elapsed < timeout {
            return Err(GameError::TimeoutNotReached {
                round_id: round.id,
                remaining_secs: (timeout - elapsed).num_seconds(),
            });
        }
        if round.deposit_count == 0 {
            return Err(GameError::NoDeposits(round.id));
        }
        let winner = round
            .last_depositor
            .clone()
            .ok_or_else(|| GameError::internal("round with deposits has no last depositor"))?;

        round.status = RoundStatus::Finalized;
        round.winner = Some(winner.clone());
        round.ended_at = Some(now);
        round.final_pot = Some(round.pot_amount);

        let finalized = FinalizedRound {
            round_id: round.id,
            winner: winner.clone(),
            pot_amount: round.pot_amount,
            reserved_bonus: round.reserved_bonus,
            unresolved_slots: bonuses.unresolved_count(),
            next_round: round.id.next(),
        };

        tracing::info!(
            round_id = %finalized.round_id,
            winner = %winner,
            pot = %finalized.pot_amount,
            unresolved_slots = finalized.unresolved_slots,
            "Round finalized"
        );
        self.emit(GameEvent::RoundEnded {
            round_id: finalized.round_id,
            winner,
            pot_amount: finalized.pot_amount,
            end_time: now,
        });

        self.persist(&guard).await?;
        self.install_round(finalized.next_round, now).await;
        Ok(finalized)
    }

    /// Pay the winner everything in the pot not held for bonus slots. One time only.
    pub async fn claim_prize(
        &self,
        identity: &Identity,
        round_id: RoundId,
        now: DateTime<Utc>,
    ) -> Result<SettlementReceipt> {
        let entry = self.entry(round_id)?;
        let mut guard = entry.lock().await;
        let round = &guard.round;

        if round.status != RoundStatus::Finalized {
            return Err(GameError::RoundNotFinalized(round_id));
        }
        if round.winner.as_ref() != Some(identity) {
            return Err(GameError::NotWinner {
                round_id,
                identity: identity.to_string(),
            });
        }
        if round.is_claimed() {
            return Err(GameError::AlreadyClaimed(round_id));
        }

        let payout = round.available_pot();
        let receipt = self
            .pay_out(
                &mut guard,
                identity,
                payout,
                &format!("prize round {}", round_id),
                |entry, receipt| {
                    let round = &mut entry.round;
                    round.pot_amount = round.pot_amount.saturating_sub(payout);
                    round.prize_claim = Some(PrizeClaim {
                        winner: identity.clone(),
                        amount: payout,
                        claimed_at: now,
                        receipt,
                    });
                    Ok(())
                },
            )
            .await?;

        tracing::info!(
            round_id = %round_id,
            winner = %identity,
            amount = %payout,
            still_reserved = %guard.round.reserved_bonus,
            "Prize claimed"
        );
        self.emit(GameEvent::WinnerPaid {
            round_id,
            winner: identity.clone(),
            amount: payout,
        });
        Ok(receipt)
    }

    pub async fn pay_bonus(&self, slot: SlotId) -> Result<SettlementReceipt> {
        let entry = self.entry(slot.round_id)?;
        let mut guard = entry.lock().await;
        self.settle_bonus(&mut guard, slot).await
    }

    /// Route one oracle callback to the slot it belongs to.
    pub async fn handle_callback(
        &self,
        callback: OracleCallback,
        now: DateTime<Utc>,
    ) -> Result<CallbackOutcome> {
        let Some(request) = self.gateway.on_callback(&callback) else {
            return Ok(CallbackOutcome::Ignored);
        };
        let slot_id = request.correlates_to;

        let Ok(entry) = self.entry(slot_id.round_id) else {
            tracing::warn!(request_id = %request.request_id, slot = %slot_id, "Callback for unknown round");
            return Ok(CallbackOutcome::Ignored);
        };
        let mut guard = entry.lock().await;

        let outcome = match callback {
            OracleCallback::RandomReady { request_id, value } => {
                self.apply_randomness(&mut guard, request_id, &value, now).await?
            }
            OracleCallback::TimelockReady {
                request_id,
                decrypted,
            } => self.apply_reveal(&mut guard, request_id, decrypted, now).await,
        };

        if outcome != CallbackOutcome::Ignored {
            self.persist(&guard).await?;
        }
        Ok(outcome)
    }

    pub async fn on_randomness_fulfilled(
        &self,
        request_id: RequestId,
        raw_value: [u8; 32],
        now: DateTime<Utc>,
    ) -> Result<CallbackOutcome> {
        self.handle_callback(
            OracleCallback::RandomReady {
                request_id,
                value: raw_value,
            },
            now,
        )
        .await
    }

    pub async fn on_timelock_fulfilled(
        &self,
        request_id: RequestId,
        decrypted_percentage: u32,
        now: DateTime<Utc>,
    ) -> Result<CallbackOutcome> {
        self.handle_callback(
            OracleCallback::TimelockReady {
                request_id,
                decrypted: decrypted_percentage,
            },
            now,
        )
        .await
    }

    /// Consume oracle callbacks until the sending side closes.
    pub async fn run_callbacks(self: Arc<Self>, mut rx: mpsc::Receiver<OracleCallback>) {
        while let Some(callback) = rx.recv().await {
            let request_id = callback.request_id();
            match self.handle_callback(callback, Utc::now()).await {
                Ok(outcome) => tracing::debug!(request_id = %request_id, ?outcome, "Callback applied"),
                Err(e) => tracing::error!(request_id = %request_id, "Callback failed: {}", e),
            }
        }
        tracing::info!("Oracle callback channel closed");
    }

    /// Re-send the oracle request of a slot whose dispatch failed. Any caller may do this.
    pub async fn redispatch_slot(&self, slot: SlotId) -> Result<RequestId> {
        let entry = self.entry(slot.round_id)?;
        let mut guard = entry.lock().await;
        let bonuses = &mut guard.bonuses;

        let opened_at = bonuses
            .get(slot.deposit_number)
            .map(|s| s.opened_at)
            .ok_or(GameError::SlotNotFound(slot))?;
        let pending = bonuses
            .pending_dispatch(slot.deposit_number)
            .ok_or(GameError::NothingToRedispatch(slot))?;

        let request_id = match pending {
            PendingDispatch::Randomness => {
                let request = self.gateway.dispatch(slot, DispatchParams::RawRandom).await?;
                bonuses.attach_randomness_request(slot.deposit_number, request.request_id)?;
                request.request_id
            }
            PendingDispatch::Timelock { percentage } => {
                let unlock_at = opened_at + self.config.reveal_delay();
                let commitment_hash = bonuses
                    .get(slot.deposit_number)
                    .and_then(|s| s.commitment())
                    .map(|c| c.hash.clone())
                    .ok_or_else(|| GameError::internal(format!("slot {} has no commitment", slot)))?;
                let request = self
                    .gateway
                    .dispatch(
                        slot,
                        DispatchParams::TimelockEncrypted {
                            value: percentage,
                            unlock_milestone: unlock_at,
                        },
                    )
                    .await?;
                bonuses.begin_reveal(slot.deposit_number, request.request_id, unlock_at)?;
                self.emit(GameEvent::BonusPercentageEncrypted {
                    slot,
                    request_id: request.request_id,
                    commitment_hash,
                    unlock_at,
                });
                request.request_id
            }
        };

        tracing::info!(slot = %slot, request_id = %request_id, "Redispatched oracle request");
        self.persist(&guard).await?;
        Ok(request_id)
    }

    /// Force-cancel a slot whose oracle never answered and release its hold.
    pub async fn cancel_slot(
        &self,
        operator: &Identity,
        slot: SlotId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Amount> {
        self.authorize(operator)?;
        let entry = self.entry(slot.round_id)?;
        let mut guard = entry.lock().await;
        let RoundEntry { round, bonuses } = &mut *guard;

        let (released, outstanding) = bonuses.cancel(round, slot.deposit_number, reason)?;
        if let Some(request_id) = outstanding {
            self.gateway.forget(request_id);
        }

        tracing::warn!(
            slot = %slot,
            operator = %operator,
            released = %released,
            reason,
            "Bonus slot cancelled by operator"
        );
        self.record_audit(AuditEntry::new(
            operator,
            AdminAction::CancelSlot {
                slot,
                released,
                reason: reason.to_string(),
            },
            now,
        ))
        .await;
        self.emit(GameEvent::SlotCancelled {
            slot,
            operator: operator.clone(),
            released,
            reason: reason.to_string(),
        });

        self.persist(&guard).await?;
        Ok(released)
    }

    /// Transfer funds released into a finalized, already claimed round.
    pub async fn sweep_residual(
        &self,
        operator: &Identity,
        round_id: RoundId,
        to: &Identity,
        now: DateTime<Utc>,
    ) -> Result<SettlementReceipt> {
        self.authorize(operator)?;
        let entry = self.entry(round_id)?;
        let mut guard = entry.lock().await;
        let round = &guard.round;

        if round.status != RoundStatus::Finalized {
            return Err(GameError::RoundNotFinalized(round_id));
        }
        let residual = round.available_pot();
        if !round.is_claimed() || residual.is_zero() {
            return Err(GameError::NothingToSweep(round_id));
        }

        let receipt = self
            .pay_out(
                &mut guard,
                to,
                residual,
                &format!("residual round {}", round_id),
                |entry, _| {
                    entry.round.pot_amount = entry.round.pot_amount.saturating_sub(residual);
                    Ok(())
                },
            )
            .await?;

        tracing::warn!(round_id = %round_id, to = %to, amount = %residual, "Residual swept by operator");
        self.record_audit(AuditEntry::new(
            operator,
            AdminAction::SweepResidual {
                round_id,
                to: to.clone(),
                amount: residual,
            },
            now,
        ))
        .await;
        self.emit(GameEvent::ResidualSwept {
            round_id,
            to: to.clone(),
            amount: residual,
        });
        Ok(receipt)
    }

    pub async fn current_round(&self, now: DateTime<Utc>) -> Option<RoundSnapshot> {
        let entry = self.active_entry()?;
        let guard = entry.lock().await;
        Some(guard.round.snapshot(now, self.config.round_timeout()))
    }

    pub async fn round(&self, round_id: RoundId, now: DateTime<Utc>) -> Result<RoundSnapshot> {
        let entry = self.entry(round_id)?;
        let guard = entry.lock().await;
        Ok(guard.round.snapshot(now, self.config.round_timeout()))
    }

    pub async fn bonus_slots(&self, round_id: RoundId) -> Result<Vec<BonusSlotView>> {
        let entry = self.entry(round_id)?;
        let guard = entry.lock().await;
        Ok(guard.bonuses.views())
    }

    /// Time left before the active round can be finalized. `None` without an active round.
    pub async fn time_until_timeout(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.current_round(now)
            .await
            .map(|s| Duration::seconds(s.time_remaining_secs))
    }

    /// Pot of the active round minus reserved bonuses.
    pub async fn available_pot(&self) -> Amount {
        match self.active_entry() {
            Some(entry) => entry.lock().await.round.available_pot(),
            None => Amount::ZERO,
        }
    }

    pub async fn round_summaries(&self) -> Vec<RoundSummary> {
        let entries: Vec<SharedEntry> = self.rounds.read().values().cloned().collect();
        let mut summaries = Vec::new();

        for entry in entries {
            let guard = entry.lock().await;
            let round = &guard.round;
            let (Some(winner), Some(ended_at)) = (round.winner.clone(), round.ended_at) else {
                continue;
            };
            let last_bonus = guard.bonuses.last_revealed().and_then(|slot| {
                let view = slot.view();
                let (percentage, amount) = view.percentage.zip(view.bonus_amount)?;
                Some(LastBonus {
                    depositor: view.depositor,
                    amount,
                    percentage,
                    deposit_number: slot.deposit_number,
                })
            });

            summaries.push(RoundSummary {
                round_id: round.id,
                winner,
                final_pot: round.final_pot.unwrap_or(round.pot_amount),
                total_deposits: round.deposit_count,
                ended_at,
                last_bonus,
            });
        }
        summaries
    }

    pub fn outstanding_requests(&self) -> Vec<RandomnessRequest> {
        self.gateway.outstanding()
    }

    pub fn anomalies(&self) -> Vec<OracleAnomaly> {
        self.anomalies.lock().clone()
    }

    pub fn audit_log(&self) -> Vec<AuditEntry> {
        self.audit.lock().clone()
    }

    async fn apply_randomness(
        &self,
        entry: &mut RoundEntry,
        request_id: RequestId,
        value: &[u8; 32],
        now: DateTime<Utc>,
    ) -> Result<CallbackOutcome> {
        let (slot_id, percentage, commitment_hash, unlock_at) =
            match entry
                .bonuses
                .on_randomness_fulfilled(request_id, value, now, &self.config)
            {
                CommitOutcome::Committed {
                    slot_id,
                    percentage,
                    commitment_hash,
                    unlock_at,
                } => (slot_id, percentage, commitment_hash, unlock_at),
                CommitOutcome::Ignored => {
                    tracing::warn!(request_id = %request_id, "Randomness for a slot no longer waiting on it");
                    return Ok(CallbackOutcome::Ignored);
                }
            };

        let params = DispatchParams::TimelockEncrypted {
            value: percentage,
            unlock_milestone: unlock_at,
        };
        let timelock_request = match self.gateway.dispatch(slot_id, params).await {
            Ok(request) => {
                entry
                    .bonuses
                    .begin_reveal(slot_id.deposit_number, request.request_id, unlock_at)?;
                self.emit(GameEvent::BonusPercentageEncrypted {
                    slot: slot_id,
                    request_id: request.request_id,
                    commitment_hash,
                    unlock_at,
                });
                Some(request.request_id)
            }
            Err(e) => {
                tracing::warn!(slot = %slot_id, "Timelock dispatch failed, slot needs redispatch: {}", e);
                None
            }
        };

        Ok(CallbackOutcome::Committed {
            slot: slot_id,
            timelock_request,
        })
    }

    async fn apply_reveal(
        &self,
        entry: &mut RoundEntry,
        request_id: RequestId,
        decrypted: u32,
        now: DateTime<Utc>,
    ) -> CallbackOutcome {
        let outcome =
            entry
                .bonuses
                .on_timelock_fulfilled(&mut entry.round, request_id, decrypted, now);

        let RevealOutcome::Revealed {
            slot_id,
            depositor,
            percentage,
            bonus_amount,
            nonce,
            mismatch,
            capped_from,
        } = outcome
        else {
            tracing::warn!(request_id = %request_id, "Reveal for a slot no longer waiting on it");
            return CallbackOutcome::Ignored;
        };

        let mismatched = mismatch.is_some();
        if let Some(err) = mismatch {
            tracing::warn!(slot = %slot_id, "Oracle integrity: {}", err);
            self.record_anomaly(OracleAnomaly::new(slot_id, err.to_string(), now))
                .await;
        }
        if let Some(owed) = capped_from {
            let description = format!(
                "bonus capped at {} of {} owed, the pot could not cover it",
                bonus_amount, owed
            );
            tracing::warn!(slot = %slot_id, "{}", description);
            self.record_anomaly(OracleAnomaly::new(slot_id, description, now))
                .await;
        }

        self.emit(GameEvent::BonusPercentageRevealed {
            slot: slot_id,
            percentage,
            nonce,
        });
        self.emit(GameEvent::BonusWinnerDetermined {
            slot: slot_id,
            depositor,
            percentage,
            bonus_amount,
        });

        let paid = if self.config.auto_pay_bonus {
            match self.settle_bonus(entry, slot_id).await {
                Ok(_) => true,
                Err(e) => {
                    tracing::warn!(slot = %slot_id, "Automatic bonus payment failed: {}", e);
                    false
                }
            }
        } else {
            false
        };

        CallbackOutcome::Revealed {
            slot: slot_id,
            bonus_amount,
            mismatch: mismatched,
            paid,
        }
    }

    async fn settle_bonus(&self, entry: &mut RoundEntry, slot: SlotId) -> Result<SettlementReceipt> {
        let (depositor, amount) = entry.bonuses.payable(slot)?;
        let receipt = self
            .pay_out(
                entry,
                &depositor,
                amount,
                &format!("bonus {}", slot),
                |entry, receipt| {
                    entry
                        .bonuses
                        .complete_payment(&mut entry.round, slot.deposit_number, receipt)
                },
            )
            .await?;

        tracing::info!(slot = %slot, depositor = %depositor, amount = %amount, "Bonus paid");
        self.emit(GameEvent::BonusPaid {
            slot,
            depositor,
            amount,
        });
        Ok(receipt)
    }

    /// Credit `amount` to `to` and apply `transition` to the round it leaves.
    ///
    /// With a journal in the engine's own database, the credit row and the new
    /// round state commit in one transaction. Any other backend is credited
    /// first, and the transition applies only once the credit succeeded.
    async fn pay_out<F>(
        &self,
        entry: &mut RoundEntry,
        to: &Identity,
        amount: Amount,
        memo: &str,
        transition: F,
    ) -> Result<SettlementReceipt>
    where
        F: FnOnce(&mut RoundEntry, SettlementReceipt) -> Result<()>,
    {
        if let Some(storage) = self.shared_journal() {
            let receipt = SettlementReceipt::new(to, amount, memo);
            let mut staged = entry.clone();
            transition(&mut staged, receipt.clone())?;
            RoundStore::new(storage)
                .save_round_with_credit(
                    &staged.round,
                    &staged.bonuses,
                    &self.gateway.outstanding(),
                    &receipt,
                )
                .await?;
            *entry = staged;

            tracing::info!("Journaled credit of {} to {} ({})", amount, to, memo);
            return Ok(receipt);
        }

        let receipt = self.settlement.credit(to, amount, memo).await?;
        transition(entry, receipt.clone())?;
        self.persist(entry).await?;
        Ok(receipt)
    }

    /// The engine's storage, if the settlement backend journals into it.
    fn shared_journal(&self) -> Option<&Arc<Storage>> {
        let storage = self.storage.as_ref()?;
        let journal = self.settlement.journal()?;
        Arc::ptr_eq(storage, journal).then_some(storage)
    }

    fn authorize(&self, operator: &Identity) -> Result<()> {
        if operator != &self.config.operator {
            return Err(GameError::unauthorized(format!(
                "{} is not the operator",
                operator
            )));
        }
        Ok(())
    }

    fn entry(&self, round_id: RoundId) -> Result<SharedEntry> {
        self.rounds
            .read()
            .get(&round_id)
            .cloned()
            .ok_or(GameError::RoundNotFound(round_id))
    }

    fn active_entry(&self) -> Option<SharedEntry> {
        let id = (*self.active.read())?;
        self.rounds.read().get(&id).cloned()
    }

    fn next_round_id(&self) -> RoundId {
        self.rounds
            .read()
            .keys()
            .next_back()
            .map(|id| id.next())
            .unwrap_or(RoundId::FIRST)
    }

    /// The active round, opening the very first one if none exists yet.
    async fn active_entry_or_open(&self, now: DateTime<Utc>) -> SharedEntry {
        if let Some(entry) = self.active_entry() {
            return entry;
        }

        let _lifecycle = self.lifecycle.lock().await;
        if let Some(entry) = self.active_entry() {
            return entry;
        }
        self.install_round(self.next_round_id(), now).await
    }

    /// Create a round, make it the active one and persist it.
    async fn install_round(&self, round_id: RoundId, now: DateTime<Utc>) -> SharedEntry {
        let entry = RoundEntry {
            round: Round::open(round_id, now, &self.pricing),
            bonuses: BonusLedger::new(round_id),
        };
        // an empty round that fails to persist is opened again after a restart
        if let Err(e) = self.persist(&entry).await {
            tracing::error!(round_id = %round_id, "Failed to persist new round: {}", e);
        }

        let shared = Arc::new(Mutex::new(entry));
        self.rounds.write().insert(round_id, shared.clone());
        *self.active.write() = Some(round_id);

        tracing::info!(round_id = %round_id, "Round started");
        self.emit(GameEvent::RoundStarted {
            round_id,
            start_time: now,
        });
        shared
    }

    async fn persist(&self, entry: &RoundEntry) -> Result<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        let requests = self.gateway.outstanding();
        if let Err(e) = RoundStore::new(storage)
            .save_round(&entry.round, &entry.bonuses, &requests)
            .await
        {
            tracing::error!(round_id = %entry.round.id, "Failed to persist round: {}", e);
            return Err(e);
        }
        Ok(())
    }

    async fn record_anomaly(&self, anomaly: OracleAnomaly) {
        if let Some(storage) = &self.storage {
            if let Err(e) = RoundStore::new(storage).append_anomaly(&anomaly).await {
                tracing::error!("Failed to persist oracle anomaly: {}", e);
            }
        }
        self.emit(GameEvent::OracleAnomaly {
            slot: anomaly.slot,
            description: anomaly.description.clone(),
        });
        self.anomalies.lock().push(anomaly);
    }

    async fn record_audit(&self, entry: AuditEntry) {
        if let Some(storage) = &self.storage {
            if let Err(e) = RoundStore::new(storage).append_audit(&entry).await {
                tracing::error!("Failed to persist audit entry: {}", e);
            }
        }
        self.audit.lock().push(entry);
    }

    fn emit(&self, event: GameEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}
