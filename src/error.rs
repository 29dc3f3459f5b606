use thiserror::Error;

/// Every fallible ledger operation surfaces one of these kinds.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The underlying store could not be opened, read or written.
    #[error("block store unavailable: {0}")]
    StoreUnavailable(#[from] sled::Error),

    /// Stored bytes under `hash` failed to decode back into a block.
    #[error("corrupt block {hash}: {detail}")]
    CorruptBlock { hash: String, detail: String },

    /// A `previous_hash` link points at a block the store does not hold.
    #[error("broken chain: block {hash} is referenced but not stored")]
    BrokenChain { hash: String },

    /// The whole 64-bit nonce space was searched without a winning digest.
    /// Indicates a misconfigured difficulty, never a transient condition.
    #[error("nonce space exhausted at difficulty {difficulty}")]
    NonceExhausted { difficulty: u32 },

    /// Operation attempted after `close()`.
    #[error("ledger is closed")]
    Closed,

    /// An in-flight proof-of-work solve was cancelled by the caller.
    #[error("proof-of-work solve interrupted")]
    Interrupted,
}
