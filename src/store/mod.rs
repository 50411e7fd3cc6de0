//! Persistence seams and their production backends.
//!
//! The scanner only ever talks to the narrow capability traits below, so it
//! runs unchanged against the in-memory fakes used in tests. Production
//! wiring plugs in [`postgres::PgStore`] for durability and
//! [`redis_cache::RedisCursorCache`] for the fast cursor path.

mod cursor;
pub mod postgres;
pub mod redis_cache;

use async_trait::async_trait;

use crate::{error::IndexerResult, models::Transfer};

pub use cursor::CursorStore;

/// Durable, idempotent sink for transfer records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Writes a batch in one unordered operation. Duplicates on
    /// `(tx_hash, log_index)` are silently absorbed; the returned count is
    /// the number of records actually inserted.
    async fn bulk_insert(&self, transfers: &[Transfer]) -> IndexerResult<u64>;
}

/// Durable source of truth for the last processed block.
#[async_trait]
pub trait CursorBackend: Send + Sync {
    /// Last fully processed block, `0` when nothing was processed yet.
    async fn last_processed_block(&self) -> IndexerResult<u64>;

    async fn set_last_processed_block(&self, block_number: u64) -> IndexerResult<()>;
}

/// Optional fast cache in front of [`CursorBackend`]. Every operation may
/// fail with `CacheUnavailable`; callers degrade to the durable store.
#[async_trait]
pub trait CursorCache: Send + Sync {
    /// Cached cursor value; `None` is a miss, not an error.
    async fn last_processed_block(&self) -> IndexerResult<Option<u64>>;

    async fn set_last_processed_block(&self, block_number: u64) -> IndexerResult<()>;

    /// Best-effort bookkeeping of ingested transaction hashes. Reserved
    /// keyspace; nothing reads these as a gate.
    async fn mark_tx_seen(&self, tx_hash: &str) -> IndexerResult<()>;
}
