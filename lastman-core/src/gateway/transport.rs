use crate::error::{GameError, Result};
use crate::gateway::{OracleCallback, RequestKind};
use crate::types::{RequestId, SlotId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Outbound side of the randomness and timelock oracles.
///
/// Both calls are fire-and-forget: they return a request id as soon as the
/// request is accepted and the result comes back later as an [`OracleCallback`].
#[async_trait]
pub trait OracleTransport: Send + Sync {
    async fn request_random(&self, correlation: SlotId) -> Result<RequestId>;

    async fn request_timelock(
        &self,
        value: u32,
        unlock_at: DateTime<Utc>,
        correlation: SlotId,
    ) -> Result<RequestId>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedRequest {
    pub request_id: RequestId,
    pub kind: RequestKind,
    pub correlation: SlotId,
    /// Value handed over for timelock encryption.
    pub plaintext: Option<u32>,
    pub unlock_at: Option<DateTime<Utc>>,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualOracleState {
    pub next_id: u64,
    pub queue: Vec<QueuedRequest>,
}

impl Default for ManualOracleState {
    fn default() -> Self {
        Self {
            next_id: 1,
            queue: Vec::new(),
        }
    }
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    queue: BTreeMap<RequestId, QueuedRequest>,
    fail_next: Option<String>,
}

/// In-process oracle whose requests are fulfilled explicitly by an operator or a test.
pub struct ManualOracle {
    inner: Mutex<Inner>,
}

impl Default for ManualOracle {
    fn default() -> Self {
        Self::restore(ManualOracleState::default())
    }
}

impl ManualOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restore(state: ManualOracleState) -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: state.next_id.max(1),
                queue: state
                    .queue
                    .into_iter()
                    .map(|q| (q.request_id, q))
                    .collect(),
                fail_next: None,
            }),
        }
    }

    pub fn state(&self) -> ManualOracleState {
        let inner = self.inner.lock();
        ManualOracleState {
            next_id: inner.next_id,
            queue: inner.queue.values().cloned().collect(),
        }
    }

    pub fn queued(&self) -> Vec<QueuedRequest> {
        self.inner.lock().queue.values().cloned().collect()
    }

    /// Reject the next request with `reason`.
    pub fn fail_next(&self, reason: impl Into<String>) {
        self.inner.lock().fail_next = Some(reason.into());
    }

    /// Fulfill a queued randomness request, with a fresh random value if none is given.
    pub fn fulfill_random(&self, request_id: RequestId, value: Option<[u8; 32]>) -> Result<OracleCallback> {
        let queued = self.take(request_id, RequestKind::RawRandom)?;
        let value = value.unwrap_or_else(|| {
            let mut bytes = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut bytes);
            bytes
        });
        Ok(OracleCallback::RandomReady {
            request_id: queued.request_id,
            value,
        })
    }

    /// Fulfill a queued timelock request. Without an override the oracle
    /// honestly decrypts the value it was given.
    pub fn fulfill_timelock(&self, request_id: RequestId, override_value: Option<u32>) -> Result<OracleCallback> {
        let queued = self.take(request_id, RequestKind::TimelockEncrypted)?;
        let decrypted = override_value
            .or(queued.plaintext)
            .ok_or_else(|| GameError::oracle(format!("request {} has no plaintext", request_id)))?;
        Ok(OracleCallback::TimelockReady {
            request_id: queued.request_id,
            decrypted,
        })
    }

    fn take(&self, request_id: RequestId, kind: RequestKind) -> Result<QueuedRequest> {
        let mut inner = self.inner.lock();
        match inner.queue.get(&request_id) {
            Some(q) if q.kind == kind => {}
            Some(q) => {
                return Err(GameError::oracle(format!(
                    "request {} is a {:?} request",
                    request_id, q.kind
                )))
            }
            None => return Err(GameError::oracle(format!("unknown request {}", request_id))),
        }
        inner
            .queue
            .remove(&request_id)
            .ok_or_else(|| GameError::oracle(format!("unknown request {}", request_id)))
    }

    fn enqueue(
        &self,
        kind: RequestKind,
        correlation: SlotId,
        plaintext: Option<u32>,
        unlock_at: Option<DateTime<Utc>>,
    ) -> Result<RequestId> {
        let mut inner = self.inner.lock();
        if let Some(reason) = inner.fail_next.take() {
            return Err(GameError::oracle(reason));
        }

        let request_id = RequestId(inner.next_id);
        inner.next_id += 1;
        inner.queue.insert(
            request_id,
            QueuedRequest {
                request_id,
                kind,
                correlation,
                plaintext,
                unlock_at,
                requested_at: Utc::now(),
            },
        );
        Ok(request_id)
    }
}

#[async_trait]
impl OracleTransport for ManualOracle {
    async fn request_random(&self, correlation: SlotId) -> Result<RequestId> {
        self.enqueue(RequestKind::RawRandom, correlation, None, None)
    }

    async fn request_timelock(
        &self,
        value: u32,
        unlock_at: DateTime<Utc>,
        correlation: SlotId,
    ) -> Result<RequestId> {
        self.enqueue(
            RequestKind::TimelockEncrypted,
            correlation,
            Some(value),
            Some(unlock_at),
        )
    }
}
