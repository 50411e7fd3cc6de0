//! Redis-backed cursor cache. Sub-millisecond reads of the last processed
//! block on the hot path; the durable store remains the source of truth.

use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};
use tracing::info;

use crate::{
    error::{IndexerError, IndexerResult},
    store::CursorCache,
};

/// Persistent key holding the last processed block as a decimal string.
const LAST_BLOCK_KEY: &str = "ethereum:last_block";
/// Prefix of the reserved per-transaction bookkeeping keyspace.
const TX_KEY_PREFIX: &str = "ethereum:tx:";
/// Lifetime of tx bookkeeping entries.
const TX_SEEN_TTL_SECS: u64 = 24 * 60 * 60;

fn cache_err(err: redis::RedisError) -> IndexerError {
    IndexerError::CacheUnavailable(err.to_string())
}

/// [`CursorCache`] over a Redis connection manager (auto-reconnecting).
pub struct RedisCursorCache {
    connection: ConnectionManager,
}

impl RedisCursorCache {
    /// Connects and pings the server so a dead cache is caught at boot,
    /// where the caller can decide to run without it.
    ///
    /// # Errors
    ///
    /// [`IndexerError::CacheUnavailable`] when the URI does not parse or the
    /// server does not answer.
    pub async fn connect(redis_url: &str) -> IndexerResult<Self> {
        let client = redis::Client::open(redis_url).map_err(cache_err)?;
        let connection = client.get_connection_manager().await.map_err(cache_err)?;

        let mut ping_connection = connection.clone();
        let _pong: String =
            redis::cmd("PING").query_async(&mut ping_connection).await.map_err(cache_err)?;

        info!("redis cursor cache connected");
        Ok(Self { connection })
    }
}

#[async_trait]
impl CursorCache for RedisCursorCache {
    async fn last_processed_block(&self) -> IndexerResult<Option<u64>> {
        let mut connection = self.connection.clone();
        let value: Option<String> = connection.get(LAST_BLOCK_KEY).await.map_err(cache_err)?;

        match value {
            None => Ok(None),
            Some(raw) => raw
                .parse::<u64>()
                .map(Some)
                .map_err(|err| IndexerError::CacheUnavailable(format!("corrupt cursor value: {err}"))),
        }
    }

    async fn set_last_processed_block(&self, block_number: u64) -> IndexerResult<()> {
        let mut connection = self.connection.clone();
        let () = connection
            .set(LAST_BLOCK_KEY, block_number.to_string())
            .await
            .map_err(cache_err)?;
        Ok(())
    }

    async fn mark_tx_seen(&self, tx_hash: &str) -> IndexerResult<()> {
        let mut connection = self.connection.clone();
        let () = connection
            .set_ex(format!("{TX_KEY_PREFIX}{tx_hash}"), "1", TX_SEEN_TTL_SECS)
            .await
            .map_err(cache_err)?;
        Ok(())
    }
}
