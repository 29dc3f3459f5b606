use std::path::Path;

use log::debug;

use crate::error::LedgerError;

/// Durable key→value store backing the ledger.
///
/// Thin wrapper over a `sled` tree. The ledger keeps two kinds of entries:
/// one reserved tip-pointer key, and one entry per block keyed by its hash.
/// Cloning is cheap (the handle is reference-counted) so a `Store` can be
/// shared between a ledger and its cursors.
#[derive(Clone)]
pub struct Store {
    db: sled::Db,
}

impl Store {
    /// Open (or create) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let db = sled::open(&path)?;
        debug!("opened block store at {}", path.as_ref().display());
        Ok(Self { db })
    }

    /// Look up a key. An absent key is `None`, not an error.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, LedgerError> {
        Ok(self.db.get(key)?.map(|v| v.to_vec()))
    }

    /// Apply all entries as a single atomic write batch: either every
    /// entry becomes visible or none does, including across a crash.
    pub fn put_many(&self, entries: Vec<(Vec<u8>, Vec<u8>)>) -> Result<(), LedgerError> {
        let mut batch = sled::Batch::default();
        for (key, value) in entries {
            batch.insert(key, value);
        }
        self.db.apply_batch(batch)?;
        Ok(())
    }

    /// Block until all previous writes are durable on disk.
    pub fn flush(&self) -> Result<(), LedgerError> {
        self.db.flush()?;
        Ok(())
    }

    /// In-memory-backed store for tests; the backing file is removed on drop.
    #[cfg(test)]
    pub fn temporary() -> Self {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .expect("temporary sled db");
        Self { db }
    }
}
