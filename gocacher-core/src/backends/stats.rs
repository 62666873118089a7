//! Operation counters shared by the instrumented caches.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters, safe to bump from concurrent requests.
#[derive(Debug, Default)]
pub struct CacheStats {
    gets: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    get_errors: AtomicU64,
    puts: AtomicU64,
    put_errors: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.gets.fetch_add(1, Ordering::Relaxed);
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.gets.fetch_add(1, Ordering::Relaxed);
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_get_error(&self) {
        self.gets.fetch_add(1, Ordering::Relaxed);
        self.get_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_put(&self) {
        self.puts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_put_error(&self) {
        self.puts.fetch_add(1, Ordering::Relaxed);
        self.put_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            gets: self.gets.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            get_errors: self.get_errors.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            put_errors: self.put_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`CacheStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub gets: u64,
    pub hits: u64,
    pub misses: u64,
    pub get_errors: u64,
    pub puts: u64,
    pub put_errors: u64,
}

impl StatsSnapshot {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
