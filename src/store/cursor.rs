use std::{sync::Arc, time::Duration};

use tracing::{debug, warn};

use crate::{
    error::IndexerResult,
    store::{CursorBackend, CursorCache},
};

/// Deadline for the detached cache warm-up after a durable read.
const CACHE_WARM_TIMEOUT: Duration = Duration::from_secs(5);

/// Write-through cursor over a durable backend and an optional fast cache.
///
/// Reads are look-aside: the cache answers when it can, the durable store
/// stays the source of truth, and a durable read warms the cache in the
/// background. Writes land durably first; only then is the cache updated,
/// best-effort. A successful `write(n)` therefore guarantees any later
/// `read()` returns at least `n`, however the cache is feeling.
pub struct CursorStore {
    durable: Arc<dyn CursorBackend>,
    cache: Option<Arc<dyn CursorCache>>,
}

impl CursorStore {
    #[must_use]
    pub fn new(durable: Arc<dyn CursorBackend>, cache: Option<Arc<dyn CursorCache>>) -> Self {
        Self { durable, cache }
    }

    /// Last fully processed block, `0` when nothing was processed yet.
    pub async fn read(&self) -> IndexerResult<u64> {
        if let Some(cache) = &self.cache {
            match cache.last_processed_block().await {
                Ok(Some(block_number)) => return Ok(block_number),
                Ok(None) => {}
                Err(err) => {
                    debug!(error = %err, "cursor cache read failed, falling back to durable store");
                }
            }
        }

        let block_number = self.durable.last_processed_block().await?;

        if block_number > 0 && let Some(cache) = &self.cache {
            // Fire-and-forget warm-up. It deliberately outlives the caller:
            // cancelling the read that triggered it must not cancel this.
            let cache = Arc::clone(cache);
            tokio::spawn(async move {
                match tokio::time::timeout(
                    CACHE_WARM_TIMEOUT,
                    cache.set_last_processed_block(block_number),
                )
                .await
                {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => debug!(error = %err, "cursor cache warm-up failed"),
                    Err(_) => debug!("cursor cache warm-up timed out"),
                }
            });
        }

        Ok(block_number)
    }

    /// Advances the cursor: durable store first, then best-effort cache.
    pub async fn write(&self, block_number: u64) -> IndexerResult<()> {
        self.durable.set_last_processed_block(block_number).await?;

        if let Some(cache) = &self.cache
            && let Err(err) = cache.set_last_processed_block(block_number).await
        {
            warn!(block_number, error = %err, "cursor cache write failed, durable store is current");
        }

        Ok(())
    }

    /// Records ingested transaction hashes in the cache's reserved tx
    /// keyspace. Detached and best-effort; failures are only logged.
    pub fn mark_txs_seen(&self, tx_hashes: Vec<String>) {
        let Some(cache) = &self.cache else { return };
        if tx_hashes.is_empty() {
            return;
        }

        let cache = Arc::clone(cache);
        tokio::spawn(async move {
            for tx_hash in tx_hashes {
                if let Err(err) = cache.mark_tx_seen(&tx_hash).await {
                    debug!(error = %err, "tx bookkeeping write failed, skipping batch");
                    return;
                }
            }
        });
    }

    /// Whether a cache layer is attached.
    #[must_use]
    pub fn has_cache(&self) -> bool {
        self.cache.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::fakes::{MemoryCursorBackend, MemoryCursorCache};

    fn store_with(
        durable: Arc<MemoryCursorBackend>,
        cache: Arc<MemoryCursorCache>,
    ) -> CursorStore {
        CursorStore::new(durable, Some(cache))
    }

    #[tokio::test]
    async fn read_prefers_the_cache() {
        let durable = Arc::new(MemoryCursorBackend::new(100));
        let cache = Arc::new(MemoryCursorCache::default());
        cache.set_last_processed_block(250).await.unwrap();

        let store = store_with(durable, cache);
        assert_eq!(store.read().await.unwrap(), 250);
    }

    #[tokio::test]
    async fn durable_read_warms_the_cache() {
        let durable = Arc::new(MemoryCursorBackend::new(42));
        let cache = Arc::new(MemoryCursorCache::default());

        let store = store_with(durable, Arc::clone(&cache));
        assert_eq!(store.read().await.unwrap(), 42);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.last_processed_block().await.unwrap(), Some(42));
    }

    #[tokio::test]
    async fn write_survives_a_dead_cache() {
        let durable = Arc::new(MemoryCursorBackend::new(0));
        let cache = Arc::new(MemoryCursorCache::default());
        cache.set_available(false);

        let store = store_with(Arc::clone(&durable), Arc::clone(&cache));
        store.write(7).await.unwrap();

        // Read must see the write even though the cache is down.
        assert_eq!(store.read().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn cache_outage_degrades_to_durable_reads() {
        let durable = Arc::new(MemoryCursorBackend::new(33));
        let cache = Arc::new(MemoryCursorCache::default());
        cache.set_available(false);

        let store = store_with(durable, cache);
        assert_eq!(store.read().await.unwrap(), 33);
    }

    #[tokio::test]
    async fn works_without_any_cache() {
        let durable = Arc::new(MemoryCursorBackend::new(0));
        let store = CursorStore::new(durable, None);
        assert!(!store.has_cache());

        store.write(11).await.unwrap();
        assert_eq!(store.read().await.unwrap(), 11);
    }

    #[tokio::test]
    async fn marks_tx_hashes_in_the_background() {
        let durable = Arc::new(MemoryCursorBackend::new(0));
        let cache = Arc::new(MemoryCursorCache::default());

        let store = store_with(durable, Arc::clone(&cache));
        store.mark_txs_seen(vec!["0xabc".to_owned(), "0xdef".to_owned()]);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(cache.tx_seen("0xabc"));
        assert!(cache.tx_seen("0xdef"));
    }
}
