//! Lock-guarded, lazily created LRU store
//!
//! One per group. The underlying [`LruStore`] is only allocated on the first
//! write, so groups that never cache anything cost nothing.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::byteview::ByteView;
use super::lru::{AddOutcome, EvictionCallback, LruStore};
use super::metrics::CacheMetrics;

/// Concurrency-safe wrapper around a single [`LruStore`]
pub struct GuardedCache {
    /// Byte budget, fixed at construction
    cache_bytes: i64,
    /// Created on first `add`
    lru: Mutex<Option<LruStore>>,
    metrics: Arc<CacheMetrics>,
}

impl GuardedCache {
    /// Create an empty cache with the given byte budget
    pub fn new(cache_bytes: i64, metrics: Arc<CacheMetrics>) -> Self {
        Self {
            cache_bytes,
            lru: Mutex::new(None),
            metrics,
        }
    }

    /// Insert a value, creating the store on first use
    pub fn add(&self, key: &str, value: ByteView) -> AddOutcome {
        let mut guard = self.lru.lock();

        if guard.is_none() {
            match LruStore::new(self.cache_bytes, Some(self.eviction_hook())) {
                Ok(store) => *guard = Some(store),
                Err(e) => warn!(key = %key, "Cannot create cache store: {}", e),
            }
        }

        // No store means a non-positive budget: nothing fits
        let outcome = match guard.as_mut() {
            Some(store) => store.add(key, value),
            None => AddOutcome::Rejected,
        };
        if outcome == AddOutcome::Rejected {
            self.metrics.record_oversize_rejection();
        }
        outcome
    }

    /// Look up a value, promoting it on a hit
    pub fn get(&self, key: &str) -> Option<ByteView> {
        self.lru.lock().as_mut()?.get(key)
    }

    /// Look up a value without touching recency
    pub fn peek(&self, key: &str) -> Option<ByteView> {
        self.lru.lock().as_ref()?.peek(key).cloned()
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.lru.lock().as_ref().map_or(0, |store| store.len())
    }

    /// Check if nothing is cached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes currently tracked against the budget
    pub fn bytes(&self) -> i64 {
        self.lru.lock().as_ref().map_or(0, |store| store.size_bytes())
    }

    /// Configured budget
    pub fn cache_bytes(&self) -> i64 {
        self.cache_bytes
    }

    /// Check if the underlying store has been created yet
    pub fn is_initialized(&self) -> bool {
        self.lru.lock().is_some()
    }

    fn eviction_hook(&self) -> EvictionCallback {
        let metrics = Arc::clone(&self.metrics);
        Box::new(move |key, value| {
            metrics.record_eviction();
            debug!(key = %key, size = value.len(), "Evicted cache entry");
        })
    }
}

impl std::fmt::Debug for GuardedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedCache")
            .field("cache_bytes", &self.cache_bytes)
            .finish()
    }
}
