use serde::{Deserialize, Serialize};

use super::pow::{CancelFlag, ProofOfWork};
use crate::error::LedgerError;

/// A single sealed entry in the ledger.
///
/// The four fields are everything the chain knows about an entry: opaque
/// payload bytes, the hash of the predecessor, the nonce that won the
/// proof-of-work puzzle, and the resulting 32-byte digest. The digest is
/// both the block's identity and its key in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub payload: Vec<u8>,
    pub previous_hash: Vec<u8>,
    pub nonce: i64,
    pub hash: Vec<u8>,
}

impl Block {
    /// Build a block over `payload` linked to `previous_hash` and seal it.
    ///
    /// The returned block always carries a winning nonce and its digest;
    /// `ProofOfWork::validate` holds for it. Sealing is the only slow step
    /// and honors `cancel`.
    pub fn create(
        payload: Vec<u8>,
        previous_hash: Vec<u8>,
        difficulty: u32,
        cancel: &CancelFlag,
    ) -> Result<Self, LedgerError> {
        let mut block = Self {
            payload,
            previous_hash,
            nonce: 0,
            hash: Vec::new(),
        };

        let (nonce, hash) = ProofOfWork::new(&block, difficulty).run(cancel)?;
        block.nonce = nonce;
        block.hash = hash;
        Ok(block)
    }

    /// Create the genesis block: fixed payload, empty previous hash.
    pub fn genesis(difficulty: u32, cancel: &CancelFlag) -> Result<Self, LedgerError> {
        Self::create(super::GENESIS_PAYLOAD.to_vec(), Vec::new(), difficulty, cancel)
    }

    /// True only for the genesis block, whose empty previous hash is the
    /// terminal sentinel of every chain walk.
    pub fn is_genesis(&self) -> bool {
        self.previous_hash.is_empty()
    }

    /// Encode all four fields for storage.
    pub fn serialize(&self) -> Vec<u8> {
        bincode::serialize(self).expect("block encoding")
    }

    /// Decode stored bytes back into a block.
    ///
    /// Signals `CorruptBlock` on undecodable input or a digest of the wrong
    /// width; the caller fills in the store key the bytes were read under.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, LedgerError> {
        let block: Block = bincode::deserialize(bytes).map_err(|e| LedgerError::CorruptBlock {
            hash: String::new(),
            detail: e.to_string(),
        })?;

        if block.hash.len() != 32 {
            return Err(LedgerError::CorruptBlock {
                hash: String::new(),
                detail: format!("digest is {} bytes, expected 32", block.hash.len()),
            });
        }

        Ok(block)
    }
}
