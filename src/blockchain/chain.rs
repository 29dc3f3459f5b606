use std::sync::{Mutex, RwLock};

use log::{debug, info};

use super::block::Block;
use super::pow::CancelFlag;
use crate::error::LedgerError;
use crate::store::Store;

/// Reserved store key holding the hash of the newest block.
pub const TIP_KEY: &[u8] = b"tip";

struct Inner {
    store: Store,
    tip: Vec<u8>,
}

/// The append-only chain of sealed blocks over a durable store.
///
/// The ledger owns the single mutable piece of chain state, the tip hash.
/// Appends are serialized so no two blocks can ever seal against the same
/// predecessor through one instance; walks run concurrently with appends.
/// Lifecycle is open then closed, one way: after `close` every operation
/// reports `Closed`.
pub struct Ledger {
    inner: RwLock<Option<Inner>>,
    append_lock: Mutex<()>,
    difficulty: u32,
    cancel: CancelFlag,
}

impl Ledger {
    /// Wrap an open store, seeding the chain on first use.
    ///
    /// A store without a tip pointer is a fresh ledger: the genesis block is
    /// sealed and persisted together with the initial tip in one batch. An
    /// existing tip is picked up untouched, so reopening is idempotent.
    pub fn open(store: Store, difficulty: u32) -> Result<Self, LedgerError> {
        let cancel = CancelFlag::new();

        let tip = match store.get(TIP_KEY)? {
            Some(tip) => tip,
            None => {
                let genesis = Block::genesis(difficulty, &cancel)?;
                store.put_many(vec![
                    (genesis.hash.clone(), genesis.serialize()),
                    (TIP_KEY.to_vec(), genesis.hash.clone()),
                ])?;
                info!("created genesis block {}", hex::encode(&genesis.hash));
                genesis.hash
            }
        };

        Ok(Self {
            inner: RwLock::new(Some(Inner { store, tip })),
            append_lock: Mutex::new(()),
            difficulty,
            cancel,
        })
    }

    /// Seal a new block over `payload` and make it the tip.
    ///
    /// The tip read, the solve and the tip advance happen under the append
    /// lock, so concurrent appends are serialized rather than forking the
    /// chain. The block body and the tip advance are written as one atomic
    /// batch: the tip never points at a block the store does not hold.
    pub fn append(&self, payload: Vec<u8>) -> Result<Block, LedgerError> {
        let _guard = self.append_lock.lock().expect("mutex poisoned");

        let (store, tip) = self.snapshot()?;
        let block = Block::create(payload, tip, self.difficulty, &self.cancel)?;

        store.put_many(vec![
            (block.hash.clone(), block.serialize()),
            (TIP_KEY.to_vec(), block.hash.clone()),
        ])?;

        {
            let mut inner = self.inner.write().expect("lock poisoned");
            if let Some(inner) = inner.as_mut() {
                inner.tip = block.hash.clone();
            }
        }

        info!(
            "sealed block (hash={}, nonce={})",
            hex::encode(&block.hash),
            block.nonce
        );
        Ok(block)
    }

    /// Cursor over the chain, positioned at the current tip.
    pub fn iterator(&self) -> Result<Cursor, LedgerError> {
        let (store, tip) = self.snapshot()?;
        Ok(Cursor {
            store,
            current: tip,
        })
    }

    /// Hash of the newest block.
    pub fn tip_hash(&self) -> Result<Vec<u8>, LedgerError> {
        Ok(self.snapshot()?.1)
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    /// Shared handle for aborting an in-flight solve from outside; nothing
    /// is persisted for an aborted block.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Flush and release the store handle. Irreversible; any later call on
    /// this ledger reports `Closed`.
    pub fn close(&self) -> Result<(), LedgerError> {
        let mut inner = self.inner.write().expect("lock poisoned");
        let state = inner.take().ok_or(LedgerError::Closed)?;
        state.store.flush()?;
        debug!("ledger closed");
        Ok(())
    }

    fn snapshot(&self) -> Result<(Store, Vec<u8>), LedgerError> {
        let inner = self.inner.read().expect("lock poisoned");
        match inner.as_ref() {
            Some(state) => Ok((state.store.clone(), state.tip.clone())),
            None => Err(LedgerError::Closed),
        }
    }
}

/// Backward walk over the chain, newest block first.
///
/// Each `next()` is one store read; the cursor then moves to the block's
/// `previous_hash`. The genesis block's empty previous hash is the terminal
/// sentinel, never a lookup key. A cursor is not restartable; take a fresh
/// one from `Ledger::iterator` to walk again.
pub struct Cursor {
    store: Store,
    current: Vec<u8>,
}

impl Iterator for Cursor {
    type Item = Result<Block, LedgerError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current.is_empty() {
            return None;
        }

        // taking the key ends the walk here if anything below fails
        let key = std::mem::take(&mut self.current);

        let bytes = match self.store.get(&key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                return Some(Err(LedgerError::BrokenChain {
                    hash: hex::encode(&key),
                }));
            }
            Err(e) => return Some(Err(e)),
        };

        match Block::deserialize(&bytes) {
            Ok(block) => {
                self.current = block.previous_hash.clone();
                Some(Ok(block))
            }
            Err(LedgerError::CorruptBlock { detail, .. }) => {
                Some(Err(LedgerError::CorruptBlock {
                    hash: hex::encode(&key),
                    detail,
                }))
            }
            Err(other) => Some(Err(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::{Ledger, TIP_KEY};
    use crate::blockchain::{Block, CancelFlag, GENESIS_PAYLOAD, ProofOfWork};
    use crate::error::LedgerError;
    use crate::store::Store;

    const TEST_DIFFICULTY: u32 = 8;

    fn walk(ledger: &Ledger) -> Vec<Block> {
        ledger
            .iterator()
            .unwrap()
            .map(|item| item.unwrap())
            .collect()
    }

    #[test]
    fn open_on_empty_store_creates_genesis() {
        let ledger = Ledger::open(Store::temporary(), TEST_DIFFICULTY).unwrap();

        let blocks = walk(&ledger);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].payload, GENESIS_PAYLOAD);
        assert!(blocks[0].previous_hash.is_empty());
        assert!(ProofOfWork::new(&blocks[0], TEST_DIFFICULTY).validate());
    }

    #[test]
    fn walk_returns_newest_first_and_ends_at_genesis() {
        let ledger = Ledger::open(Store::temporary(), TEST_DIFFICULTY).unwrap();
        ledger.append(b"Lorem".to_vec()).unwrap();
        ledger.append(b"Ipsum".to_vec()).unwrap();

        let blocks = walk(&ledger);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].payload, b"Ipsum");
        assert_eq!(blocks[1].payload, b"Lorem");
        assert_eq!(blocks[2].payload, GENESIS_PAYLOAD);

        // linkage and puzzle validity along the whole walk
        assert_eq!(blocks[0].previous_hash, blocks[1].hash);
        assert_eq!(blocks[1].previous_hash, blocks[2].hash);
        for b in &blocks {
            assert!(ProofOfWork::new(b, TEST_DIFFICULTY).validate());
        }

        // a second walk needs a fresh cursor and sees the same chain
        assert_eq!(walk(&ledger).len(), 3);
    }

    #[test]
    fn walk_length_tracks_append_count() {
        let ledger = Ledger::open(Store::temporary(), TEST_DIFFICULTY).unwrap();
        for i in 0..5 {
            ledger.append(format!("entry-{i}").into_bytes()).unwrap();
        }
        assert_eq!(walk(&ledger).len(), 6);
    }

    #[test]
    fn tip_follows_last_append() {
        let ledger = Ledger::open(Store::temporary(), TEST_DIFFICULTY).unwrap();
        let block = ledger.append(b"Lorem".to_vec()).unwrap();
        assert_eq!(ledger.tip_hash().unwrap(), block.hash);
    }

    #[test]
    fn reopen_is_idempotent_and_keeps_the_chain() {
        let store = Store::temporary();
        let first = Ledger::open(store.clone(), TEST_DIFFICULTY).unwrap();
        first.append(b"Lorem".to_vec()).unwrap();
        let tip = first.tip_hash().unwrap();
        first.close().unwrap();

        let second = Ledger::open(store, TEST_DIFFICULTY).unwrap();
        assert_eq!(second.tip_hash().unwrap(), tip);
        assert_eq!(walk(&second).len(), 2);
    }

    #[test]
    fn chain_survives_reopen_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger");

        let tip = {
            let ledger =
                Ledger::open(Store::open(&path).unwrap(), TEST_DIFFICULTY).unwrap();
            ledger.append(b"Lorem".to_vec()).unwrap();
            let tip = ledger.tip_hash().unwrap();
            ledger.close().unwrap();
            tip
        };

        let ledger = Ledger::open(Store::open(&path).unwrap(), TEST_DIFFICULTY).unwrap();
        assert_eq!(ledger.tip_hash().unwrap(), tip);
        assert_eq!(walk(&ledger).len(), 2);
    }

    #[test]
    fn closed_ledger_rejects_every_operation() {
        let ledger = Ledger::open(Store::temporary(), TEST_DIFFICULTY).unwrap();
        ledger.close().unwrap();

        assert!(matches!(
            ledger.append(b"late".to_vec()),
            Err(LedgerError::Closed)
        ));
        assert!(matches!(ledger.iterator().err(), Some(LedgerError::Closed)));
        assert!(matches!(ledger.tip_hash().err(), Some(LedgerError::Closed)));
        assert!(matches!(ledger.close().err(), Some(LedgerError::Closed)));
    }

    #[test]
    fn concurrent_appends_serialize_instead_of_forking() {
        let ledger = Ledger::open(Store::temporary(), TEST_DIFFICULTY).unwrap();

        thread::scope(|s| {
            s.spawn(|| ledger.append(b"first writer".to_vec()).unwrap());
            s.spawn(|| ledger.append(b"second writer".to_vec()).unwrap());
        });

        let blocks = walk(&ledger);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].previous_hash, blocks[1].hash);
        assert_eq!(blocks[1].previous_hash, blocks[2].hash);

        let mut payloads: Vec<&[u8]> =
            blocks.iter().take(2).map(|b| b.payload.as_slice()).collect();
        payloads.sort();
        assert_eq!(payloads, vec![&b"first writer"[..], &b"second writer"[..]]);
    }

    #[test]
    fn dangling_tip_reports_broken_chain() {
        let store = Store::temporary();
        store
            .put_many(vec![(TIP_KEY.to_vec(), vec![0xab; 32])])
            .unwrap();

        let ledger = Ledger::open(store, TEST_DIFFICULTY).unwrap();
        let mut cursor = ledger.iterator().unwrap();

        let err = cursor.next().unwrap().unwrap_err();
        assert!(matches!(err, LedgerError::BrokenChain { .. }));
        // the walk ends after a fatal read
        assert!(cursor.next().is_none());
    }

    #[test]
    fn corrupted_bytes_report_the_offending_hash() {
        let store = Store::temporary();
        let ledger = Ledger::open(store.clone(), TEST_DIFFICULTY).unwrap();
        let tip = ledger.tip_hash().unwrap();

        store
            .put_many(vec![(tip.clone(), b"garbage".to_vec())])
            .unwrap();

        let err = ledger.iterator().unwrap().next().unwrap().unwrap_err();
        match err {
            LedgerError::CorruptBlock { hash, .. } => assert_eq!(hash, hex::encode(&tip)),
            other => panic!("expected CorruptBlock, got {other:?}"),
        }
    }

    #[test]
    fn orphan_block_never_enters_the_walk() {
        let store = Store::temporary();
        let ledger = Ledger::open(store.clone(), TEST_DIFFICULTY).unwrap();
        ledger.append(b"Lorem".to_vec()).unwrap();

        // a block stored without a tip advance, as a crash between two
        // non-atomic writes would leave it
        let orphan = Block::create(
            b"orphan".to_vec(),
            vec![0xcd; 32],
            TEST_DIFFICULTY,
            &CancelFlag::default(),
        )
        .unwrap();
        store
            .put_many(vec![(orphan.hash.clone(), orphan.serialize())])
            .unwrap();

        let blocks = walk(&ledger);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].payload, b"Lorem");
    }

    #[test]
    fn cancelled_append_leaves_the_store_untouched() {
        let ledger = Ledger::open(Store::temporary(), TEST_DIFFICULTY).unwrap();
        let tip = ledger.tip_hash().unwrap();

        ledger.cancel_flag().cancel();
        let err = ledger.append(b"never lands".to_vec()).unwrap_err();
        assert!(matches!(err, LedgerError::Interrupted));

        assert_eq!(ledger.tip_hash().unwrap(), tip);
        assert_eq!(walk(&ledger).len(), 1);
    }
}
