use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// A cached value with the instant it was stored
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub data: T,
    pub timestamp: Instant,
}

impl<T> CacheEntry<T> {
    fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.timestamp) > ttl
    }
}

/// Key/value store whose entries expire a fixed time after being written.
///
/// Expiry is only checked on read: an expired entry is dropped by the
/// `get` that observes it. There is no background sweeper, so stale
/// entries sit in memory until they are read or overwritten.
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: Mutex<HashMap<K, CacheEntry<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Get a live value, removing it if it has expired
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.lock();

        match entries.get(key) {
            Some(entry) if entry.is_expired(self.ttl, now) => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.data.clone()),
            None => None,
        }
    }

    /// Store a value, replacing any previous one and resetting its age
    pub fn set(&self, key: K, value: V) {
        let entry = CacheEntry {
            data: value,
            timestamp: Instant::now(),
        };
        self.lock().insert(key, entry);
    }

    pub fn invalidate(&self, key: &K) {
        self.lock().remove(key);
    }

    pub fn invalidate_all(&self) {
        self.lock().clear();
    }

    /// Number of stored entries, expired or not
    pub fn size(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, CacheEntry<V>>> {
        // Entries are plain data; a panic mid-insert cannot leave them torn
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
