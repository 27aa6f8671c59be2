//! Result cache for the expensive pipeline stages.
//!
//! Entries are keyed by a [`Fingerprint`] of every input that affects the
//! stage's output and evicted least-recently-used once `capacity` is reached.
//! Lookup, compute and insert happen under one lock, so two callers racing on
//! the same fingerprint compute it once.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use log::debug;
use parking_lot::Mutex;

/// Identity of one stage invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(u64);

impl Fingerprint {
    pub fn builder(stage: &'static str) -> FingerprintBuilder {
        let mut hasher = DefaultHasher::new();
        stage.hash(&mut hasher);
        FingerprintBuilder { hasher }
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Incremental fingerprint. Floats are hashed by bit pattern.
pub struct FingerprintBuilder {
    hasher: DefaultHasher,
}

impl FingerprintBuilder {
    pub fn with<T: Hash>(mut self, value: T) -> Self {
        value.hash(&mut self.hasher);
        self
    }

    pub fn with_f64(mut self, value: f64) -> Self {
        value.to_bits().hash(&mut self.hasher);
        self
    }

    pub fn finish(self) -> Fingerprint {
        Fingerprint(self.hasher.finish())
    }
}

/// Hit/miss counters of one cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

struct Entry<V> {
    value: V,
    last_used: u64,
}

struct Inner<V> {
    entries: HashMap<Fingerprint, Entry<V>>,
    tick: u64,
    stats: CacheStats,
}

/// Bounded LRU map from fingerprint to a cloneable value.
pub struct ResultCache<V> {
    name: &'static str,
    capacity: usize,
    inner: Mutex<Inner<V>>,
}

impl<V: Clone> ResultCache<V> {
    /// `capacity` is clamped to at least one entry.
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity: capacity.max(1),
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                tick: 0,
                stats: CacheStats::default(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Cached value for `key`, or the result of `compute` (stored on success).
    ///
    /// Errors are returned as is and not cached.
    pub fn get_or_compute<E>(&self, key: Fingerprint, compute: impl FnOnce() -> Result<V, E>) -> Result<V, E> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.tick += 1;
        let tick = inner.tick;

        if let Some(entry) = inner.entries.get_mut(&key) {
            entry.last_used = tick;
            let value = entry.value.clone();
            inner.stats.hits += 1;
            debug!("{} cache hit ({key})", self.name);
            return Ok(value);
        }

        inner.stats.misses += 1;
        debug!("{} cache miss ({key})", self.name);
        let value = compute()?;

        if inner.entries.len() >= self.capacity {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| *k);
            if let Some(oldest) = oldest {
                inner.entries.remove(&oldest);
                inner.stats.evictions += 1;
            }
        }
        inner.entries.insert(
            key,
            Entry {
                value: value.clone(),
                last_used: tick,
            },
        );
        Ok(value)
    }

    pub fn contains(&self, key: Fingerprint) -> bool {
        self.inner.lock().entries.contains_key(&key)
    }

    pub fn invalidate(&self, key: Fingerprint) -> bool {
        self.inner.lock().entries.remove(&key).is_some()
    }

    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            entries: inner.entries.len(),
            ..inner.stats
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::convert::Infallible;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn key(n: u64) -> Fingerprint {
        Fingerprint::builder("test").with(n).finish()
    }

    #[test]
    fn identical_fingerprints_compute_once() {
        let cache = ResultCache::new("test", 4);
        let calls = Cell::new(0);
        for _ in 0..3 {
            let v = cache
                .get_or_compute(key(1), || {
                    calls.set(calls.get() + 1);
                    Ok::<_, Infallible>(42)
                })
                .unwrap();
            assert_eq!(v, 42);
        }
        assert_eq!(calls.get(), 1);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (2, 1, 1));
    }

    #[test]
    fn least_recently_used_is_evicted() {
        let cache = ResultCache::new("test", 2);
        let calls = Cell::new(0);
        let get = |n: u64| {
            cache
                .get_or_compute(key(n), || {
                    calls.set(calls.get() + 1);
                    Ok::<_, Infallible>(n)
                })
                .unwrap()
        };
        get(1);
        get(2);
        get(3); // evicts 1
        assert_eq!(calls.get(), 3);
        assert!(!cache.contains(key(1)));
        get(1);
        assert_eq!(calls.get(), 4);
        assert_eq!(cache.stats().evictions, 2);
    }

    #[test]
    fn hits_refresh_recency() {
        let cache = ResultCache::new("test", 2);
        let compute = |n: u64| move || Ok::<_, Infallible>(n);
        cache.get_or_compute(key(1), compute(1)).unwrap();
        cache.get_or_compute(key(2), compute(2)).unwrap();
        cache.get_or_compute(key(1), compute(1)).unwrap();
        cache.get_or_compute(key(3), compute(3)).unwrap(); // evicts 2, not 1
        assert!(cache.contains(key(1)));
        assert!(!cache.contains(key(2)));
    }

    #[test]
    fn errors_are_not_cached() {
        let cache: ResultCache<u32> = ResultCache::new("test", 2);
        assert_eq!(cache.get_or_compute(key(1), || Err("boom")), Err("boom"));
        assert!(cache.is_empty());
        assert_eq!(cache.get_or_compute(key(1), || Ok::<_, &str>(5)), Ok(5));
    }

    #[test]
    fn invalidate_forces_recompute() {
        let cache = ResultCache::new("test", 2);
        cache.get_or_compute(key(1), || Ok::<_, Infallible>(1)).unwrap();
        assert!(cache.invalidate(key(1)));
        assert!(!cache.invalidate(key(1)));
        let v = cache.get_or_compute(key(1), || Ok::<_, Infallible>(2)).unwrap();
        assert_eq!(v, 2);
    }

    #[test]
    fn concurrent_callers_compute_once() {
        let cache = Arc::new(ResultCache::new("test", 4));
        let calls = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                std::thread::spawn(move || {
                    cache
                        .get_or_compute(key(9), || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            Ok::<_, Infallible>(9u32)
                        })
                        .unwrap()
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), 9);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fingerprint_distinguishes_float_bits() {
        let a = Fingerprint::builder("s").with_f64(0.0).finish();
        let b = Fingerprint::builder("s").with_f64(-0.0).finish();
        let c = Fingerprint::builder("t").with_f64(0.0).finish();
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
