//! # Result Cache
//!
//! TTL cache for extraction results with single-flight collapsing of
//! concurrent identical requests and access counters for popularity ranking.
//!
//! ## Overview
//!
//! ```text
//! get_or_compute(key)
//!   ├── live entry        -> (value, was_cached = true)
//!   ├── computation runs  -> await it, (value, was_cached = true)
//!   └── otherwise         -> run compute, store, (value, was_cached = false)
//! ```
//!
//! Failures reach every waiter of the computation and are never stored.
//! Expiry is lazy; [`ResultCache::spawn_sweeper`] evicts expired entries
//! periodically. Counters are monotonic and survive refreshes.

pub mod result_cache;
pub mod stats;

pub use result_cache::{normalize_key, ResultCache};
pub use stats::CacheStats;
