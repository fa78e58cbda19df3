//! Correlation bookkeeping between bonus slots and the two external oracles.
//!
//! The gateway only remembers which request belongs to which slot. It hands
//! callbacks back to the engine and never touches round or slot state.

pub mod transport;

pub use transport::{ManualOracle, ManualOracleState, OracleTransport, QueuedRequest};

use crate::error::{GameError, Result};
use crate::types::{RequestId, SlotId};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestKind {
    RawRandom,
    TimelockEncrypted,
}

/// An outstanding oracle request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomnessRequest {
    pub request_id: RequestId,
    pub kind: RequestKind,
    pub correlates_to: SlotId,
    /// Only set for timelock requests.
    pub unlock_milestone: Option<DateTime<Utc>>,
    pub dispatched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub enum DispatchParams {
    RawRandom,
    TimelockEncrypted {
        value: u32,
        unlock_milestone: DateTime<Utc>,
    },
}

impl DispatchParams {
    pub fn kind(&self) -> RequestKind {
        match self {
            DispatchParams::RawRandom => RequestKind::RawRandom,
            DispatchParams::TimelockEncrypted { .. } => RequestKind::TimelockEncrypted,
        }
    }
}

/// Inbound oracle message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OracleCallback {
    RandomReady { request_id: RequestId, value: [u8; 32] },
    TimelockReady { request_id: RequestId, decrypted: u32 },
}

impl OracleCallback {
    pub fn request_id(&self) -> RequestId {
        match self {
            OracleCallback::RandomReady { request_id, .. }
            | OracleCallback::TimelockReady { request_id, .. } => *request_id,
        }
    }

    pub fn kind(&self) -> RequestKind {
        match self {
            OracleCallback::RandomReady { .. } => RequestKind::RawRandom,
            OracleCallback::TimelockReady { .. } => RequestKind::TimelockEncrypted,
        }
    }
}

pub struct RandomnessGateway {
    transport: Arc<dyn OracleTransport>,
    pending: Mutex<HashMap<RequestId, RandomnessRequest>>,
}

impl RandomnessGateway {
    pub fn new(transport: Arc<dyn OracleTransport>) -> Self {
        Self {
            transport,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn restore(transport: Arc<dyn OracleTransport>, requests: Vec<RandomnessRequest>) -> Self {
        let gateway = Self::new(transport);
        {
            let mut pending = gateway.pending.lock();
            for request in requests {
                pending.insert(request.request_id, request);
            }
        }
        gateway
    }

    /// Send a request to the oracle. Returns as soon as the transport accepted it.
    ///
    /// At most one request is outstanding per slot.
    pub async fn dispatch(&self, correlation: SlotId, params: DispatchParams) -> Result<RandomnessRequest> {
        if let Some(existing) = self.outstanding_for(correlation) {
            return Err(GameError::DuplicateRequest {
                slot: correlation,
                request_id: existing.request_id,
            });
        }

        let (request_id, unlock_milestone) = match params {
            DispatchParams::RawRandom => (self.transport.request_random(correlation).await?, None),
            DispatchParams::TimelockEncrypted {
                value,
                unlock_milestone,
            } => (
                self.transport
                    .request_timelock(value, unlock_milestone, correlation)
                    .await?,
                Some(unlock_milestone),
            ),
        };

        let request = RandomnessRequest {
            request_id,
            kind: params.kind(),
            correlates_to: correlation,
            unlock_milestone,
            dispatched_at: Utc::now(),
        };
        self.pending.lock().insert(request_id, request.clone());

        tracing::debug!(
            request_id = %request_id,
            slot = %correlation,
            kind = ?request.kind,
            "Dispatched oracle request"
        );
        Ok(request)
    }

    /// Resolve a callback to the request it answers, consuming the request.
    ///
    /// Unknown ids and callbacks of the wrong kind are dropped with a warning.
    pub fn on_callback(&self, callback: &OracleCallback) -> Option<RandomnessRequest> {
        let request_id = callback.request_id();
        let mut pending = self.pending.lock();

        let Some(expected) = pending.get(&request_id).map(|r| r.kind) else {
            tracing::warn!(request_id = %request_id, "Callback for unknown or expired request");
            return None;
        };

        if expected != callback.kind() {
            tracing::warn!(
                request_id = %request_id,
                expected = ?expected,
                got = ?callback.kind(),
                "Callback kind does not match request"
            );
            return None;
        }

        pending.remove(&request_id)
    }

    /// Forget a request, e.g. when its slot was cancelled.
    pub fn forget(&self, request_id: RequestId) -> Option<RandomnessRequest> {
        self.pending.lock().remove(&request_id)
    }

    pub fn outstanding(&self) -> Vec<RandomnessRequest> {
        let mut requests: Vec<_> = self.pending.lock().values().cloned().collect();
        requests.sort_by_key(|r| r.request_id);
        requests
    }

    pub fn outstanding_for(&self, correlation: SlotId) -> Option<RandomnessRequest> {
        self.pending
            .lock()
            .values()
            .find(|r| r.correlates_to == correlation)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RoundId;

    fn gateway() -> (Arc<ManualOracle>, RandomnessGateway) {
        let oracle = Arc::new(ManualOracle::new());
        let gateway = RandomnessGateway::new(oracle.clone());
        (oracle, gateway)
    }

    #[tokio::test]
    async fn test_dispatch_and_route() {
        let (oracle, gateway) = gateway();
        let slot = SlotId::new(RoundId::FIRST, 10);

        let request = gateway.dispatch(slot, DispatchParams::RawRandom).await.unwrap();
        assert_eq!(request.kind, RequestKind::RawRandom);
        assert_eq!(gateway.outstanding().len(), 1);

        let callback = oracle.fulfill_random(request.request_id, None).unwrap();
        let routed = gateway.on_callback(&callback).unwrap();
        assert_eq!(routed.correlates_to, slot);
        assert!(gateway.outstanding().is_empty());

        // second delivery of the same callback
        assert!(gateway.on_callback(&callback).is_none());
    }

    #[tokio::test]
    async fn test_one_outstanding_request_per_slot() {
        let (_oracle, gateway) = gateway();
        let slot = SlotId::new(RoundId::FIRST, 10);

        gateway.dispatch(slot, DispatchParams::RawRandom).await.unwrap();
        let err = gateway
            .dispatch(
                slot,
                DispatchParams::TimelockEncrypted {
                    value: 3,
                    unlock_milestone: Utc::now(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::DuplicateRequest { .. }));
    }

    #[tokio::test]
    async fn test_wrong_kind_callback_keeps_request() {
        let (_oracle, gateway) = gateway();
        let slot = SlotId::new(RoundId::FIRST, 10);
        let request = gateway.dispatch(slot, DispatchParams::RawRandom).await.unwrap();

        let bogus = OracleCallback::TimelockReady {
            request_id: request.request_id,
            decrypted: 2,
        };
        assert!(gateway.on_callback(&bogus).is_none());
        assert_eq!(gateway.outstanding().len(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_leaves_nothing_pending() {
        let (oracle, gateway) = gateway();
        oracle.fail_next("oracle offline");

        let slot = SlotId::new(RoundId::FIRST, 10);
        assert!(gateway.dispatch(slot, DispatchParams::RawRandom).await.is_err());
        assert!(gateway.outstanding_for(slot).is_none());
    }
}
