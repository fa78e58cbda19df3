use crate::types::{Amount, Identity, RoundId, SlotId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AdminAction {
    CancelSlot {
        slot: SlotId,
        released: Amount,
        reason: String,
    },
    SweepResidual {
        round_id: RoundId,
        to: Identity,
        amount: Amount,
    },
}

/// Administrative override, kept for later review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub operator: Identity,
    pub action: AdminAction,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(operator: &Identity, action: AdminAction, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            operator: operator.clone(),
            action,
            timestamp,
        }
    }
}

/// Oracle misbehaviour surfaced for operator review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleAnomaly {
    pub id: Uuid,
    pub slot: SlotId,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

impl OracleAnomaly {
    pub fn new(slot: SlotId, description: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            slot,
            description: description.into(),
            timestamp,
        }
    }
}
