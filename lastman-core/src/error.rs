use crate::types::{Amount, RequestId, RoundId, SlotId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GameError>;

#[derive(Error, Debug)]
pub enum GameError {
    #[error("Wrong deposit amount: expected {expected}, got {got}")]
    WrongAmount { expected: Amount, got: Amount },

    #[error("Round {0} is not active")]
    RoundNotActive(RoundId),

    #[error("Round {0} already timed out")]
    TimeoutElapsed(RoundId),

    #[error("Round {round_id} times out in {remaining_secs}s")]
    TimeoutNotReached { round_id: RoundId, remaining_secs: i64 },

    #[error("Round {0} has no deposits")]
    NoDeposits(RoundId),

    #[error("Round not found: {0}")]
    RoundNotFound(RoundId),

    #[error("Round {0} is not finalized")]
    RoundNotFinalized(RoundId),

    #[error("Round {0} already has an active successor")]
    RoundAlreadyActive(RoundId),

    #[error("{identity} is not the winner of round {round_id}")]
    NotWinner { round_id: RoundId, identity: String },

    #[error("Prize for round {0} already claimed")]
    AlreadyClaimed(RoundId),

    #[error("Bonus slot not found: {0}")]
    SlotNotFound(SlotId),

    #[error("Bonus slot {0} is not revealed")]
    NotRevealed(SlotId),

    #[error("Bonus slot {slot} reveal mismatch: committed {committed}%, oracle claimed {claimed}%")]
    RevealMismatch {
        slot: SlotId,
        committed: u32,
        claimed: u32,
    },

    #[error("Bonus slot {0} cannot be cancelled in its current state")]
    SlotNotCancellable(SlotId),

    #[error("Bonus slot {0} has no failed dispatch to retry")]
    NothingToRedispatch(SlotId),

    #[error("Round {0} has no residual funds to sweep")]
    NothingToSweep(RoundId),

    #[error("Request already outstanding for slot {slot}: {request_id}")]
    DuplicateRequest { slot: SlotId, request_id: RequestId },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Settlement failed: {0}")]
    Settlement(String),

    #[error("Oracle transport error: {0}")]
    Oracle(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Recovery class of a [`GameError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad input or wrong round state; retry with corrected input.
    Validation,
    /// Too early or too late; re-query state.
    Timing,
    /// Terminal for this identity.
    Authorization,
    /// Oracle disagreed with an earlier commitment.
    OracleIntegrity,
    /// An oracle request never called back, or its dispatch failed.
    StuckSlot,
    /// Storage, settlement or transport failure outside the game rules.
    Infrastructure,
}

impl GameError {
    pub fn settlement(msg: impl Into<String>) -> Self {
        Self::Settlement(msg.into())
    }

    pub fn oracle(msg: impl Into<String>) -> Self {
        Self::Oracle(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::WrongAmount { .. }
            | Self::RoundNotActive(_)
            | Self::NoDeposits(_)
            | Self::RoundNotFound(_)
            | Self::RoundNotFinalized(_)
            | Self::RoundAlreadyActive(_)
            | Self::SlotNotFound(_)
            | Self::NotRevealed(_)
            | Self::SlotNotCancellable(_)
            | Self::NothingToSweep(_)
            | Self::Config(_) => ErrorClass::Validation,
            Self::TimeoutElapsed(_) | Self::TimeoutNotReached { .. } => ErrorClass::Timing,
            Self::NotWinner { .. } | Self::AlreadyClaimed(_) | Self::Unauthorized(_) => {
                ErrorClass::Authorization
            }
            Self::RevealMismatch { .. } => ErrorClass::OracleIntegrity,
            Self::DuplicateRequest { .. } | Self::NothingToRedispatch(_) => ErrorClass::StuckSlot,
            Self::Settlement(_)
            | Self::Oracle(_)
            | Self::Storage(_)
            | Self::Serialization(_)
            | Self::Io(_)
            | Self::Internal(_) => ErrorClass::Infrastructure,
        }
    }

    /// Whether the same caller may retry the operation after re-reading state.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self.class(),
            ErrorClass::Authorization | ErrorClass::OracleIntegrity
        )
    }
}
