//! Outcome counters for memoized calls
//!
//! A call is either a hit (stored value returned) or a miss (wrapped
//! function invoked). Failures are the misses that returned `Err`.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for memoized call outcomes
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    failures: AtomicU64,
    inserts: AtomicU64,
    waits: AtomicU64,
}

impl CacheStats {
    /// All counters start at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a call answered from the cache
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an invocation of the wrapped function
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an invocation that returned an error
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a stored result
    pub fn record_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a caller parked behind another thread's computation
    pub fn record_wait(&self) {
        self.waits.fetch_add(1, Ordering::Relaxed);
    }

    /// Calls answered from the cache
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Invocations of the wrapped function, failed ones included
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Invocations that returned `Err`
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Results stored
    pub fn inserts(&self) -> u64 {
        self.inserts.load(Ordering::Relaxed)
    }

    /// Times a caller blocked on another thread's computation
    pub fn waits(&self) -> u64 {
        self.waits.load(Ordering::Relaxed)
    }

    /// Share of calls answered without invoking the wrapped function
    ///
    /// Returns 0.0 before the first call.
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Zero every counter; stored results are untouched
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
        self.inserts.store(0, Ordering::Relaxed);
        self.waits.store(0, Ordering::Relaxed);
    }
}
