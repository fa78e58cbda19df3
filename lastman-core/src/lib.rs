//! Last Man Standing - round and bonus distribution engine
//!
//! Players pay an escalating deposit into a shared pot. Each deposit resets
//! the round timer, and whoever deposited last when the timer runs out takes
//! the pot. Every Nth deposit opens a bonus slot whose percentage is drawn
//! from an external randomness oracle and kept hidden behind a timelock
//! until it is revealed.

pub mod audit;
pub mod bonus;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod gateway;
pub mod pricing;
pub mod round;
pub mod settlement;
pub mod storage;
pub mod types;

pub use audit::{AdminAction, AuditEntry, OracleAnomaly};
pub use bonus::{BonusLedger, BonusSlot, BonusSlotView, SlotPhase};
pub use config::GameConfig;
pub use engine::{CallbackOutcome, DepositReceipt, FinalizedRound, RoundEngine};
pub use error::{ErrorClass, GameError, Result};
pub use events::GameEvent;
pub use gateway::{
    ManualOracle, ManualOracleState, OracleCallback, OracleTransport, RandomnessGateway,
    RandomnessRequest, RequestKind,
};
pub use pricing::PricingPolicy;
pub use round::{Round, RoundSnapshot, RoundStatus, RoundSummary};
pub use settlement::{InMemoryLedger, Settlement, SettlementReceipt};
pub use storage::{SettlementJournal, Storage};
pub use types::{Amount, Identity, RequestId, RoundId, SlotId, UNIT};

/// Open an engine persisted under `data_dir/lastman.db`.
pub async fn open_engine(
    data_dir: &std::path::Path,
    config: GameConfig,
    settlement: std::sync::Arc<dyn Settlement>,
    transport: std::sync::Arc<dyn OracleTransport>,
) -> Result<RoundEngine> {
    let storage = std::sync::Arc::new(Storage::new(&data_dir.join("lastman.db")).await?);
    RoundEngine::with_storage(config, settlement, transport, storage).await
}
