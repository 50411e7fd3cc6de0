//! In-memory stand-ins for the persistence seams.

use std::{
    collections::{BTreeSet, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use async_trait::async_trait;

use crate::{
    error::{IndexerError, IndexerResult},
    models::Transfer,
    store::{CursorBackend, CursorCache, RecordStore},
};

fn injected_failure(message: &str) -> IndexerError {
    IndexerError::DurableWrite(Arc::new(sqlx::Error::Protocol(message.to_owned())))
}

/// [`RecordStore`] over a `Vec`, enforcing the `(tx_hash, log_index)`
/// uniqueness the durable schema provides.
#[derive(Default)]
pub struct MemoryRecordStore {
    inner: Mutex<MemoryRecords>,
    failing: AtomicBool,
}

#[derive(Default)]
struct MemoryRecords {
    records: Vec<Transfer>,
    keys: HashSet<(String, u64)>,
}

impl MemoryRecordStore {
    pub fn records(&self) -> Vec<Transfer> {
        self.inner.lock().unwrap().records.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Makes every subsequent write fail until called again with `false`.
    pub fn fail_writes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn bulk_insert(&self, transfers: &[Transfer]) -> IndexerResult<u64> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(injected_failure("injected write failure"));
        }

        let mut inner = self.inner.lock().unwrap();
        let mut inserted = 0u64;
        for transfer in transfers {
            let key = (transfer.tx_hash.clone(), transfer.log_index);
            if inner.keys.insert(key) {
                inner.records.push(transfer.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }
}

/// [`CursorBackend`] over an atomic, with failure injection.
pub struct MemoryCursorBackend {
    block: AtomicU64,
    failing: AtomicBool,
}

impl MemoryCursorBackend {
    #[must_use]
    pub fn new(block: u64) -> Self {
        Self { block: AtomicU64::new(block), failing: AtomicBool::new(false) }
    }

    pub fn fail_writes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl CursorBackend for MemoryCursorBackend {
    async fn last_processed_block(&self) -> IndexerResult<u64> {
        Ok(self.block.load(Ordering::SeqCst))
    }

    async fn set_last_processed_block(&self, block_number: u64) -> IndexerResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(injected_failure("injected cursor failure"));
        }
        self.block.store(block_number, Ordering::SeqCst);
        Ok(())
    }
}

/// [`CursorCache`] over a mutex, with an availability switch to simulate an
/// outage.
#[derive(Default)]
pub struct MemoryCursorCache {
    block: Mutex<Option<u64>>,
    seen: Mutex<BTreeSet<String>>,
    unavailable: AtomicBool,
}

impl MemoryCursorCache {
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn tx_seen(&self, tx_hash: &str) -> bool {
        self.seen.lock().unwrap().contains(tx_hash)
    }

    fn check_available(&self) -> IndexerResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(IndexerError::CacheUnavailable("injected outage".to_owned()));
        }
        Ok(())
    }
}

#[async_trait]
impl CursorCache for MemoryCursorCache {
    async fn last_processed_block(&self) -> IndexerResult<Option<u64>> {
        self.check_available()?;
        Ok(*self.block.lock().unwrap())
    }

    async fn set_last_processed_block(&self, block_number: u64) -> IndexerResult<()> {
        self.check_available()?;
        *self.block.lock().unwrap() = Some(block_number);
        Ok(())
    }

    async fn mark_tx_seen(&self, tx_hash: &str) -> IndexerResult<()> {
        self.check_available()?;
        self.seen.lock().unwrap().insert(tx_hash.to_owned());
        Ok(())
    }
}
