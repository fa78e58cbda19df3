use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hash commitment to a bonus percentage, fixed before the timelock reveal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PercentageCommitment {
    /// Hex encoded `sha256(percentage_be || nonce)`
    pub hash: String,
    pub nonce: String,
    pub committed_at: DateTime<Utc>,
}

impl PercentageCommitment {
    pub fn create(percentage: u32, committed_at: DateTime<Utc>) -> Self {
        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);

        Self {
            hash: hex::encode(digest(percentage, &nonce)),
            nonce: hex::encode(nonce),
            committed_at,
        }
    }

    pub fn verify(&self, percentage: u32) -> bool {
        match hex::decode(&self.nonce) {
            Ok(nonce) => hex::encode(digest(percentage, &nonce)) == self.hash,
            Err(_) => false,
        }
    }
}

fn digest(percentage: u32, nonce: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(percentage.to_be_bytes());
    hasher.update(nonce);
    hasher.finalize().to_vec()
}

/// Map a raw 256-bit oracle value onto `min..min + span`.
///
/// The bytes are read as one big-endian integer and reduced modulo `span`.
pub fn percentage_from_randomness(raw: &[u8], min: u32, span: u32) -> u32 {
    let modulus = span.max(1) as u64;
    let rem = raw
        .iter()
        .fold(0u64, |acc, &byte| (acc * 256 + byte as u64) % modulus);
    min + rem as u32
}
