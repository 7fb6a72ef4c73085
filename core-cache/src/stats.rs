//! Cache statistics

use serde::{Deserialize, Serialize};

/// Counters describing cache effectiveness.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Lookups served from a live entry
    pub hits: u64,

    /// Lookups that started a computation
    pub misses: u64,

    /// Lookups that joined a computation already in flight
    pub joins: u64,

    /// Entries removed by a sweep
    pub evictions: u64,

    /// Entries currently stored, expired or not
    pub entries: usize,

    /// Computations currently running
    pub in_flight: usize,
}

impl CacheStats {
    /// Fraction of lookups that avoided a new computation.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses + self.joins;
        if total == 0 {
            return 0.0;
        }
        (self.hits + self.joins) as f64 / total as f64
    }
}
