use crate::types::{Amount, Identity, RequestId, RoundId, SlotId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Notifications published by the engine after each committed transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum GameEvent {
    RoundStarted {
        round_id: RoundId,
        start_time: DateTime<Utc>,
    },
    DepositMade {
        round_id: RoundId,
        depositor: Identity,
        amount: Amount,
        deposit_number: u64,
        new_pot_amount: Amount,
        next_deposit_amount: Amount,
        deadline: DateTime<Utc>,
    },
    BonusRandomnessRequested {
        slot: SlotId,
        depositor: Identity,
        request_id: Option<RequestId>,
        pot_at_time: Amount,
    },
    BonusPercentageEncrypted {
        slot: SlotId,
        request_id: RequestId,
        /// `sha256(percentage_be || nonce)`, hex encoded
        commitment_hash: String,
        unlock_at: DateTime<Utc>,
    },
    BonusPercentageRevealed {
        slot: SlotId,
        percentage: u32,
        nonce: String,
    },
    BonusWinnerDetermined {
        slot: SlotId,
        depositor: Identity,
        percentage: u32,
        bonus_amount: Amount,
    },
    BonusPaid {
        slot: SlotId,
        depositor: Identity,
        amount: Amount,
    },
    RoundEnded {
        round_id: RoundId,
        winner: Identity,
        pot_amount: Amount,
        end_time: DateTime<Utc>,
    },
    WinnerPaid {
        round_id: RoundId,
        winner: Identity,
        amount: Amount,
    },
    SlotCancelled {
        slot: SlotId,
        operator: Identity,
        released: Amount,
        reason: String,
    },
    ResidualSwept {
        round_id: RoundId,
        to: Identity,
        amount: Amount,
    },
    OracleAnomaly {
        slot: SlotId,
        description: String,
    },
}
