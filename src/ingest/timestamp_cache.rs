use std::{
    collections::HashMap,
    sync::RwLock,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};

/// Default entry lifetime. Long enough that every log in a burst sees cache
/// hits for its block header within one batch processing window.
pub const DEFAULT_TIMESTAMP_TTL: Duration = Duration::from_secs(5 * 60);

/// Thread-safe map from block number to block timestamp with TTL entries.
///
/// Expiration is lazy: a read past the entry's deadline is a miss, and the
/// stale entry is removed on that read.
pub struct BlockTimestampCache {
    entries: RwLock<HashMap<u64, CachedTimestamp>>,
    ttl: Duration,
}

struct CachedTimestamp {
    timestamp: DateTime<Utc>,
    expires_at: Instant,
}

impl BlockTimestampCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self { entries: RwLock::new(HashMap::new()), ttl }
    }

    /// Returns the cached timestamp, or `None` on absence or expiry.
    pub fn get(&self, block_number: u64) -> Option<DateTime<Utc>> {
        {
            let entries = self.entries.read().expect("timestamp cache lock poisoned");
            match entries.get(&block_number) {
                None => return None,
                Some(cached) if cached.expires_at > Instant::now() => {
                    return Some(cached.timestamp);
                }
                Some(_) => {}
            }
        }

        // Expired: evict under the write lock, re-checking in case of a
        // concurrent refresh.
        let mut entries = self.entries.write().expect("timestamp cache lock poisoned");
        if let Some(cached) = entries.get(&block_number) {
            if cached.expires_at > Instant::now() {
                return Some(cached.timestamp);
            }
            entries.remove(&block_number);
        }
        None
    }

    pub fn insert(&self, block_number: u64, timestamp: DateTime<Utc>) {
        let mut entries = self.entries.write().expect("timestamp cache lock poisoned");
        entries
            .insert(block_number, CachedTimestamp { timestamp, expires_at: Instant::now() + self.ttl });
    }

    /// Number of entries currently held, expired or not.
    pub fn len(&self) -> usize {
        self.entries.read().expect("timestamp cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for BlockTimestampCache {
    fn default() -> Self {
        Self::new(DEFAULT_TIMESTAMP_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::block_time;

    #[test]
    fn returns_inserted_timestamps() {
        let cache = BlockTimestampCache::default();
        assert_eq!(cache.get(5), None);

        cache.insert(5, block_time(1_700_000_000));
        assert_eq!(cache.get(5), Some(block_time(1_700_000_000)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn expired_entries_read_as_misses() {
        let cache = BlockTimestampCache::new(Duration::from_millis(20));
        cache.insert(9, block_time(1_700_000_000));
        assert!(cache.get(9).is_some());

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get(9), None);
        // The stale entry was evicted by the read.
        assert!(cache.is_empty());
    }
}
