//! Read-through TTL cache for similarity values.
//!
//! An entry older than the TTL is recomputed synchronously on the next
//! read. The compute closure runs outside the lock, so two threads missing
//! the same key may both compute; the last write wins.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

use crate::metrics::PipelineCounters;

/// Capacity-bounded cache whose entries expire after a fixed TTL.
#[derive(Debug)]
pub struct TtlCache<K: Hash + Eq, V> {
    entries: Mutex<LruCache<K, (V, Instant)>>,
    ttl: Duration,
    counters: Option<Arc<PipelineCounters>>,
}

impl<K: Hash + Eq + Clone, V: Clone> TtlCache<K, V> {
    /// Create a cache holding at most `capacity` entries (at least one).
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
            counters: None,
        }
    }

    /// Report hits and misses to `counters`.
    #[must_use]
    pub fn with_counters(mut self, counters: Arc<PipelineCounters>) -> Self {
        self.counters = Some(counters);
        self
    }

    /// The configured time-to-live.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// A fresh cached value, if any.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((value, inserted)) if inserted.elapsed() < self.ttl => Some(value.clone()),
            _ => None,
        }
    }

    /// Return the cached value for `key`, or compute, store and return it
    /// when it is missing or expired.
    ///
    /// # Errors
    /// Propagates the error of `compute`; nothing is cached in that case.
    pub fn get_or_compute<E>(
        &self,
        key: &K,
        compute: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, E> {
        if let Some(value) = self.get(key) {
            self.record(true);
            return Ok(value);
        }
        self.record(false);
        let value = compute()?;
        self.entries
            .lock()
            .put(key.clone(), (value.clone(), Instant::now()));
        Ok(value)
    }

    /// Drop a cached value.
    pub fn invalidate(&self, key: &K) {
        self.entries.lock().pop(key);
    }

    /// Number of cached entries, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn record(&self, hit: bool) {
        if let Some(counters) = &self.counters {
            let counter = if hit { &counters.cache_hits } else { &counters.cache_misses };
            PipelineCounters::add(counter, 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn computes_once_while_fresh() {
        let counters = Arc::new(PipelineCounters::new());
        let cache = TtlCache::new(4, Duration::from_secs(60)).with_counters(Arc::clone(&counters));
        let calls = Cell::new(0);
        for _ in 0..3 {
            let v: Result<u32, ()> = cache.get_or_compute(&"k", || {
                calls.set(calls.get() + 1);
                Ok(7)
            });
            assert_eq!(v, Ok(7));
        }
        assert_eq!(calls.get(), 1);
        let snap = counters.snapshot();
        assert_eq!((snap.cache_hits, snap.cache_misses), (2, 1));
    }

    #[test]
    fn expired_entries_are_recomputed() {
        let cache = TtlCache::new(4, Duration::ZERO);
        let calls = Cell::new(0);
        for _ in 0..2 {
            let _: Result<u32, ()> = cache.get_or_compute(&1, || {
                calls.set(calls.get() + 1);
                Ok(1)
            });
        }
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn errors_are_not_cached() {
        let cache: TtlCache<u8, u8> = TtlCache::new(2, Duration::from_secs(60));
        assert_eq!(cache.get_or_compute(&1, || Err("boom")), Err("boom"));
        assert!(cache.is_empty());
        let ok: Result<u8, ()> = cache.get_or_compute(&1, || Ok(3));
        assert_eq!(ok, Ok(3));
        cache.invalidate(&1);
        assert!(cache.get(&1).is_none());
    }

    #[test]
    fn capacity_evicts_least_recent() {
        let cache = TtlCache::new(2, Duration::from_secs(60));
        for k in 0..3u8 {
            let _: Result<u8, ()> = cache.get_or_compute(&k, || Ok(k));
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&0).is_none());
    }
}
