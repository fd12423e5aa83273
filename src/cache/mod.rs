//! Cache module for KOI statistics
//!
//! This module provides a stale-while-revalidate cache that persists the
//! aggregate KOI statistics to a durable key-value store. Fresh entries are
//! served without a fetch, stale entries are refreshed, and when the archive
//! is unreachable any cached entry is returned instead of an error.

pub mod clock;
mod stats_cache;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use stats_cache::{
    CacheInfo, CachedStatistic, RefreshEvent, StatsCache, StatsError, DEFAULT_TTL_MINUTES,
    DETAILS_KEY, EXPIRY_KEY, STATS_KEY,
};
pub use store::{CacheError, FileStore, KeyValueStore, MemoryStore};
