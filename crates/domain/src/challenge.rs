//! Proof-of-work challenge solver
//!
//! The upstream web layer may answer a request with a challenge instead of
//! data. Solving it means finding the smallest nonce `n` such that
//! `sha256(prefix ++ decimal(n))` equals the target digest.

use sha2::{Digest, Sha256};
use std::io::Write;
use thiserror::Error;

/// Largest nonce tried before giving up
pub const MAX_NONCE: u64 = 1_000_000;

/// A challenge as extracted from an upstream response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeDescriptor {
    /// Cookie the solution must be returned in
    pub cookie_name: String,
    pub prefix: Vec<u8>,
    /// Lowercase hex SHA-256 digest
    pub target_hash_hex: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChallengeUnsolved {
    #[error("no nonce in 0..={max} matches target {target}")]
    Exhausted { target: String, max: u64 },
    #[error("target is not a SHA-256 hex digest: {0}")]
    InvalidTarget(String),
}

impl ChallengeDescriptor {
    pub fn solve(&self) -> Result<u64, ChallengeUnsolved> {
        solve(&self.prefix, &self.target_hash_hex)
    }
}

/// Search nonces `0..=MAX_NONCE` in ascending order
pub fn solve(prefix: &[u8], target_hash_hex: &str) -> Result<u64, ChallengeUnsolved> {
    solve_within(prefix, target_hash_hex, MAX_NONCE)
}

pub fn solve_within(
    prefix: &[u8],
    target_hash_hex: &str,
    max_nonce: u64,
) -> Result<u64, ChallengeUnsolved> {
    let target = hex::decode(target_hash_hex.trim())
        .ok()
        .filter(|t| t.len() == 32)
        .ok_or_else(|| ChallengeUnsolved::InvalidTarget(target_hash_hex.to_string()))?;

    let seeded = Sha256::new().chain_update(prefix);
    let mut digits = Vec::with_capacity(20);

    for nonce in 0..=max_nonce {
        digits.clear();
        // Writing to a Vec cannot fail
        let _ = write!(digits, "{}", nonce);
        let digest = seeded.clone().chain_update(&digits).finalize();
        if digest.as_slice() == target.as_slice() {
            tracing::debug!(nonce, "Solved challenge");
            return Ok(nonce);
        }
    }

    Err(ChallengeUnsolved::Exhausted {
        target: target_hash_hex.to_string(),
        max: max_nonce,
    })
}
