//! Cache Statistics Module
//!
//! Tracks cache activity: hits, misses, reclaimed entries and sweeps.

use serde::Serialize;

// == Cache Stats ==
/// Counters describing cache activity since the cache was opened.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Number of lookups that returned a fresh value
    pub hits: u64,
    /// Number of lookups that returned nothing (absent, expired or corrupt)
    pub misses: u64,
    /// Number of successful writes
    pub writes: u64,
    /// Expired entries removed while reading
    pub expired_on_read: u64,
    /// Unreadable entries removed
    pub corrupt_removed: u64,
    /// Completed sweeps
    pub sweeps: u64,
    /// Expired entries removed by sweeps
    pub swept: u64,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no lookups have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_write(&mut self) {
        self.writes += 1;
    }

    pub fn record_expired_on_read(&mut self) {
        self.expired_on_read += 1;
    }

    pub fn record_corrupt(&mut self) {
        self.corrupt_removed += 1;
    }

    // == Record Sweep ==
    /// Folds a finished sweep into the counters.
    pub fn record_sweep(&mut self, removed: usize, corrupt: usize) {
        self.sweeps += 1;
        self.swept += removed as u64;
        self.corrupt_removed += corrupt as u64;
    }
}
