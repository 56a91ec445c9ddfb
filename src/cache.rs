//! TTL + LRU cache keyed by [`Fingerprint`].
//!
//! Eviction walks the entry map for the least-recently-used key rather than
//! maintaining a separate ordered list. Guarded by a `tokio::sync::Mutex`
//! with a bounded wait so a stuck lock degrades into a cache miss instead of
//! blocking the request path indefinitely.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::fingerprint::Fingerprint;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: serde_json::Value,
    inserted_at: Instant,
    last_used: Instant,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub lock_timeouts: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct Inner {
    entries: HashMap<Fingerprint, CacheEntry>,
    stats: CacheStats,
}

/// Bounded TTL+LRU cache of translation results.
pub struct TranslationCache {
    inner: Mutex<Inner>,
    max_size: usize,
    ttl: Duration,
    lock_timeout: Duration,
    lock_timeouts: AtomicU64,
}

impl TranslationCache {
    pub fn new(max_size: usize, ttl: Duration, lock_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                stats: CacheStats::default(),
            }),
            max_size,
            ttl,
            lock_timeout,
            lock_timeouts: AtomicU64::new(0),
        }
    }

    /// Look up a fingerprint. Returns `None` on a miss, an expired entry, or
    /// a lock acquisition that exceeded `lock_timeout` (recorded as a miss).
    pub async fn get(&self, key: &Fingerprint) -> Option<serde_json::Value> {
        let mut guard = match tokio::time::timeout(self.lock_timeout, self.inner.lock()).await {
            Ok(guard) => guard,
            Err(_) => {
                self.lock_timeouts.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        let now = Instant::now();
        let hit = match guard.entries.get(key) {
            Some(entry) if now.duration_since(entry.inserted_at) < self.ttl => {
                Some(entry.value.clone())
            }
            Some(_) => {
                guard.entries.remove(key);
                None
            }
            None => None,
        };

        if hit.is_some() {
            guard.stats.hits += 1;
            if let Some(entry) = guard.entries.get_mut(key) {
                entry.last_used = now;
            }
        } else {
            guard.stats.misses += 1;
        }

        hit
    }

    /// Insert or overwrite an entry, evicting the least-recently-used entry
    /// first if the cache is at capacity.
    pub async fn put(&self, key: Fingerprint, value: serde_json::Value) {
        let mut guard = match tokio::time::timeout(self.lock_timeout, self.inner.lock()).await {
            Ok(guard) => guard,
            Err(_) => {
                self.lock_timeouts.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let now = Instant::now();
        if !guard.entries.contains_key(&key) && guard.entries.len() >= self.max_size {
            if let Some(lru_key) = guard
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(k, _)| *k)
            {
                guard.entries.remove(&lru_key);
                guard.stats.evictions += 1;
            }
        }

        guard.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: now,
                last_used: now,
            },
        );
    }

    /// Drop every entry whose TTL has elapsed. Intended to be driven by a
    /// periodic background sweep on `CLEANUP_INTERVAL`, independent of the
    /// eager expiry check performed inline on `get`.
    pub async fn sweep_expired(&self) {
        let mut guard = self.inner.lock().await;
        let now = Instant::now();
        let ttl = self.ttl;
        guard
            .entries
            .retain(|_, entry| now.duration_since(entry.inserted_at) < ttl);
    }

    pub async fn stats(&self) -> CacheStats {
        let mut stats = self.inner.lock().await.stats;
        stats.lock_timeouts = self.lock_timeouts.load(Ordering::Relaxed);
        stats
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }
}
