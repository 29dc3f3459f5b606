use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::debug;
use num_bigint::BigUint;
use sha2::{Digest, Sha256};

use super::block::Block;
use crate::error::LedgerError;

/// How many nonces to try between cancellation checks.
const CANCEL_CHECK_INTERVAL: i64 = 1024;

/// Fixed-width big-endian encoding of an integer, the form in which the
/// nonce and the difficulty enter the puzzle input.
pub fn int_to_bytes(n: i64) -> [u8; 8] {
    n.to_be_bytes()
}

/// Cooperative cancellation signal for an in-flight solve.
///
/// Clones share the flag, so a caller can hand one to a ledger and trip it
/// from another thread; the solver gives up with `Interrupted` without
/// persisting anything.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// The hashcash-style puzzle over one block.
///
/// A digest wins when, read as an unsigned 256-bit big-endian integer, it is
/// strictly below `target = 2^(256 - difficulty)`, meaning its first
/// `difficulty` bits are zero. Solving searches the nonce space for a
/// winning digest; validating recomputes a single digest.
pub struct ProofOfWork<'a> {
    block: &'a Block,
    difficulty: u32,
    target: BigUint,
}

impl<'a> ProofOfWork<'a> {
    /// Derive the numeric target for `difficulty` leading zero bits.
    pub fn new(block: &'a Block, difficulty: u32) -> Self {
        let target = BigUint::from(1u8) << 256usize.saturating_sub(difficulty as usize);
        Self {
            block,
            difficulty,
            target,
        }
    }

    /// Puzzle input for one candidate nonce. The field order is load-bearing:
    /// previous hash, payload, nonce, difficulty, each integer as 8 bytes
    /// big-endian.
    fn puzzle_input(&self, nonce: i64) -> Vec<u8> {
        let mut data = Vec::with_capacity(
            self.block.previous_hash.len() + self.block.payload.len() + 16,
        );
        data.extend_from_slice(&self.block.previous_hash);
        data.extend_from_slice(&self.block.payload);
        data.extend_from_slice(&int_to_bytes(nonce));
        data.extend_from_slice(&int_to_bytes(self.difficulty as i64));
        data
    }

    /// Search the nonce space for a winning digest.
    ///
    /// Starts at nonce 0 and increments until the digest falls below the
    /// target. Checks `cancel` once per batch of nonces. Running out of the
    /// 64-bit nonce space means the difficulty is unreasonably high and is
    /// reported as `NonceExhausted`.
    pub fn run(&self, cancel: &CancelFlag) -> Result<(i64, Vec<u8>), LedgerError> {
        let mut nonce: i64 = 0;
        loop {
            if nonce % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                return Err(LedgerError::Interrupted);
            }

            let digest = Sha256::digest(self.puzzle_input(nonce));
            if BigUint::from_bytes_be(&digest) < self.target {
                debug!(
                    "solved puzzle at difficulty {} after {} attempts",
                    self.difficulty,
                    nonce as u64 + 1
                );
                return Ok((nonce, digest.to_vec()));
            }

            if nonce == i64::MAX {
                return Err(LedgerError::NonceExhausted {
                    difficulty: self.difficulty,
                });
            }
            nonce += 1;
        }
    }

    /// Check that the block was honestly sealed at this difficulty.
    ///
    /// Recomputes the digest from the stored nonce; the block passes iff
    /// that digest matches the stored hash and falls below the target.
    /// Pure: callable any number of times with the same answer.
    pub fn validate(&self) -> bool {
        let digest = Sha256::digest(self.puzzle_input(self.block.nonce));
        digest.as_slice() == self.block.hash.as_slice()
            && BigUint::from_bytes_be(&digest) < self.target
    }
}
