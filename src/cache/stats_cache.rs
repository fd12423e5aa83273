//! Stale-while-revalidate cache for aggregate KOI statistics
//!
//! Entries live in a `KeyValueStore` under two keys: the serialized statistics
//! and a map from resource key to expiry in epoch milliseconds. Freshness is
//! evaluated lazily on every read; nothing is evicted in the background.

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

use super::clock::Clock;
use super::store::{CacheError, KeyValueStore};
use crate::data::{FetchError, KoiStats, StatsSource};

/// Default time-to-live for cached statistics in minutes
pub const DEFAULT_TTL_MINUTES: i64 = 30;

/// Store key holding the serialized statistics
pub const STATS_KEY: &str = "nasa_koi_stats";

/// Store key of the per-resource expiry map
pub const EXPIRY_KEY: &str = "nasa_koi_expiry";

/// Legacy store key for KOI details; never written, only cleared
pub const DETAILS_KEY: &str = "nasa_koi_details";

/// Resource key of the aggregate statistics in the expiry map
const STATS_RESOURCE: &str = "stats";

const EVENT_CAPACITY: usize = 16;

/// Errors surfaced to callers of the statistics cache
#[derive(Debug, Error)]
pub enum StatsError {
    /// The fetch failed and nothing was cached to fall back on
    #[error("Unable to retrieve NASA KOI data: {message}")]
    DataUnavailable {
        message: String,
        #[source]
        source: FetchError,
    },
}

/// What is persisted under `STATS_KEY`
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredStats {
    #[serde(flatten)]
    stats: KoiStats,
    cached_at: DateTime<Utc>,
}

/// Statistics returned by the cache, with freshness metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedStatistic {
    #[serde(flatten)]
    pub stats: KoiStats,
    /// When the payload was stored locally
    pub cached_at: DateTime<Utc>,
    /// `cached_at + TTL`; `None` when the expiry bookkeeping is missing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Whether the value was served from the local cache
    pub is_from_cache: bool,
}

impl CachedStatistic {
    /// Fresh iff `now < expires_at`; entries without an expiry are stale
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now < expires_at)
    }
}

/// Cache metadata, read without fetching
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheInfo {
    pub has_cache: bool,
    pub is_expired: bool,
    pub cached_at: Option<DateTime<Utc>>,
}

/// Outcome of a background refresh, for observers
#[derive(Debug, Clone)]
pub enum RefreshEvent {
    /// The refresh finished; `is_from_cache` is set when the fetch failed
    /// and the existing entry was kept
    Completed(CachedStatistic),
    /// The refresh failed with nothing cached
    Failed(String),
}

struct Inner {
    store: Arc<dyn KeyValueStore>,
    source: Arc<dyn StatsSource>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    refresh_in_flight: AtomicBool,
    events: broadcast::Sender<RefreshEvent>,
}

/// Time-boxed cache for the aggregate KOI statistics resource
///
/// Cloning is cheap and clones share the same state, so a handle can be moved
/// into a background task.
#[derive(Clone)]
pub struct StatsCache {
    inner: Arc<Inner>,
}

impl fmt::Debug for StatsCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatsCache")
            .field("ttl", &self.inner.ttl)
            .field("store_available", &self.inner.store.is_available())
            .field(
                "refresh_in_flight",
                &self.inner.refresh_in_flight.load(Ordering::Acquire),
            )
            .finish()
    }
}

impl StatsCache {
    /// Creates a cache over `store`, fetching from `source` when stale
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        source: Arc<dyn StatsSource>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                store,
                source,
                clock,
                ttl,
                refresh_in_flight: AtomicBool::new(false),
                events,
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Whether `entry` is fresh according to this cache's clock
    pub fn is_fresh(&self, entry: &CachedStatistic) -> bool {
        entry.is_fresh_at(self.inner.clock.now())
    }

    /// Returns the freshest statistics available
    ///
    /// # Behavior
    /// - Without `force_refresh`, a fresh entry is returned with no fetch
    /// - Otherwise fetches from the source and stores the result
    /// - On fetch failure, returns any cached entry, fresh or stale
    /// - Fails with `DataUnavailable` only when nothing is cached
    pub async fn get(&self, force_refresh: bool) -> Result<CachedStatistic, StatsError> {
        if !force_refresh {
            if let Some(entry) = self.read_entry() {
                if entry.is_fresh_at(self.inner.clock.now()) {
                    tracing::debug!(cached_at = %entry.cached_at, "using cached KOI statistics");
                    return Ok(entry);
                }
            }
        }

        tracing::info!(force_refresh, "retrieving KOI statistics from archive");

        match self.inner.source.fetch_stats(force_refresh).await {
            Ok(stats) => Ok(self.store_fresh(stats)),
            Err(err) => match self.read_entry() {
                Some(entry) => {
                    tracing::warn!(error = %err, "fetch failed, falling back to cached statistics");
                    Ok(entry)
                }
                None => Err(StatsError::DataUnavailable {
                    message: err.to_string(),
                    source: err,
                }),
            },
        }
    }

    /// Returns the cached entry immediately, refreshing it in the background
    /// if stale
    ///
    /// Background failures are logged, never returned. With nothing cached
    /// this behaves like `get(false)`.
    pub async fn get_with_background_refresh(&self) -> Result<CachedStatistic, StatsError> {
        match self.read_entry() {
            Some(entry) => {
                if !entry.is_fresh_at(self.inner.clock.now()) {
                    self.spawn_background_refresh();
                }
                Ok(entry)
            }
            None => self.get(false).await,
        }
    }

    /// Deletes the cached statistics and their expiry bookkeeping
    pub fn clear(&self) {
        if !self.inner.store.is_available() {
            return;
        }

        for key in [STATS_KEY, DETAILS_KEY, EXPIRY_KEY] {
            if let Err(e) = self.inner.store.remove(key) {
                tracing::warn!(error = %e, "failed to clear cache entry");
            }
        }
        tracing::info!("KOI statistics cache cleared");
    }

    /// Reports cache metadata without fetching
    pub fn cache_info(&self) -> CacheInfo {
        let now = self.inner.clock.now();
        let entry = self.read_entry();

        CacheInfo {
            has_cache: entry.is_some(),
            is_expired: !entry.as_ref().is_some_and(|e| e.is_fresh_at(now)),
            cached_at: entry.map(|e| e.cached_at),
        }
    }

    /// Subscribes to background refresh outcomes
    pub fn subscribe(&self) -> broadcast::Receiver<RefreshEvent> {
        self.inner.events.subscribe()
    }

    fn spawn_background_refresh(&self) {
        if self.inner.refresh_in_flight.swap(true, Ordering::AcqRel) {
            tracing::debug!("background refresh already in flight");
            return;
        }

        tracing::info!("starting background refresh of KOI statistics");
        let cache = self.clone();
        tokio::spawn(async move {
            let result = cache.get(true).await;
            cache.inner.refresh_in_flight.store(false, Ordering::Release);

            let event = match result {
                Ok(entry) => RefreshEvent::Completed(entry),
                Err(e) => {
                    tracing::warn!(error = %e, "background refresh failed");
                    RefreshEvent::Failed(e.to_string())
                }
            };
            // No subscribers is fine
            let _ = cache.inner.events.send(event);
        });
    }

    fn store_fresh(&self, stats: KoiStats) -> CachedStatistic {
        let cached_at = self.inner.clock.now();
        // Saturate instead of overflowing for TTLs that reach past the calendar
        let expires_at = cached_at
            .checked_add_signed(self.inner.ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        if self.inner.store.is_available() {
            let stored = StoredStats {
                stats: stats.clone(),
                cached_at,
            };
            match self.write_entry(&stored, expires_at) {
                Ok(()) => {
                    tracing::info!(total = stats.total, %expires_at, "cached KOI statistics")
                }
                Err(e) => tracing::warn!(error = %e, "failed to persist KOI statistics"),
            }
        }

        CachedStatistic {
            stats,
            cached_at,
            expires_at: Some(expires_at),
            is_from_cache: false,
        }
    }

    fn write_entry(
        &self,
        stored: &StoredStats,
        expires_at: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        self.inner.store.set(STATS_KEY, &encode(STATS_KEY, stored)?)?;

        let mut expiry = self.read_expiry_map();
        expiry.insert(STATS_RESOURCE.to_string(), expires_at.timestamp_millis());
        self.inner.store.set(EXPIRY_KEY, &encode(EXPIRY_KEY, &expiry)?)
    }

    /// Reads the stored entry tagged as from-cache; unreadable entries are a miss
    fn read_entry(&self) -> Option<CachedStatistic> {
        let stored: StoredStats = self.load(STATS_KEY)?;
        let expires_at = self
            .read_expiry_map()
            .get(STATS_RESOURCE)
            .copied()
            .and_then(DateTime::from_timestamp_millis);

        Some(CachedStatistic {
            stats: stored.stats,
            cached_at: stored.cached_at,
            expires_at,
            is_from_cache: true,
        })
    }

    fn read_expiry_map(&self) -> HashMap<String, i64> {
        self.load(EXPIRY_KEY).unwrap_or_default()
    }

    fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if !self.inner.store.is_available() {
            return None;
        }

        match self.try_load(key) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unreadable cache entry");
                None
            }
        }
    }

    fn try_load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let Some(raw) = self.inner.store.get(key)? else {
            return Ok(None);
        };

        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| CacheError::Corrupt {
                key: key.to_string(),
                source,
            })
    }
}

fn encode<T: Serialize>(key: &str, value: &T) -> Result<String, CacheError> {
    serde_json::to_string(value).map_err(|source| CacheError::Encode {
        key: key.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;
    use crate::cache::store::{FileStore, MemoryStore};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration as StdDuration;
    use tempfile::TempDir;

    /// Scripted stats source that records every call
    #[derive(Default)]
    struct FakeSource {
        responses: Mutex<VecDeque<Result<KoiStats, String>>>,
        forced: Mutex<Vec<bool>>,
        calls: AtomicUsize,
        delay: Mutex<Option<StdDuration>>,
    }

    impl FakeSource {
        fn push_ok(&self, stats: KoiStats) {
            self.responses.lock().push_back(Ok(stats));
        }

        fn push_err(&self, message: &str) {
            self.responses.lock().push_back(Err(message.to_string()));
        }

        fn set_delay(&self, delay: StdDuration) {
            *self.delay.lock() = Some(delay);
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StatsSource for FakeSource {
        async fn fetch_stats(&self, force_refresh: bool) -> Result<KoiStats, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.forced.lock().push(force_refresh);

            let delay = *self.delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let next = self.responses.lock().pop_front();
            match next {
                Some(Ok(stats)) => Ok(stats),
                Some(Err(message)) => Err(FetchError::Status {
                    status: 503,
                    message,
                }),
                None => Err(FetchError::Status {
                    status: 500,
                    message: "no scripted response".to_string(),
                }),
            }
        }
    }

    /// A store for environments without durable storage
    struct UnavailableStore;

    impl KeyValueStore for UnavailableStore {
        fn is_available(&self) -> bool {
            false
        }

        fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Unavailable)
        }

        fn set(&self, _key: &str, _value: &str) -> Result<(), CacheError> {
            Err(CacheError::Unavailable)
        }

        fn remove(&self, _key: &str) -> Result<(), CacheError> {
            Err(CacheError::Unavailable)
        }
    }

    /// An available store whose writes always fail
    struct ReadOnlyStore;

    impl KeyValueStore for ReadOnlyStore {
        fn is_available(&self) -> bool {
            true
        }

        fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Ok(None)
        }

        fn set(&self, key: &str, _value: &str) -> Result<(), CacheError> {
            Err(CacheError::Io {
                key: key.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            })
        }

        fn remove(&self, _key: &str) -> Result<(), CacheError> {
            Ok(())
        }
    }

    struct Harness {
        cache: StatsCache,
        clock: Arc<ManualClock>,
        store: Arc<MemoryStore>,
        source: Arc<FakeSource>,
    }

    fn start_time() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).expect("Valid timestamp")
    }

    fn stats(total: u64) -> KoiStats {
        KoiStats {
            total,
            confirmed: 40,
            candidates: total - 50,
            false_positives: 10,
            last_updated: start_time(),
        }
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::new(start_time()));
        let store = Arc::new(MemoryStore::new());
        let source = Arc::new(FakeSource::default());
        let cache = StatsCache::new(
            store.clone(),
            source.clone(),
            clock.clone(),
            Duration::minutes(DEFAULT_TTL_MINUTES),
        );
        Harness {
            cache,
            clock,
            store,
            source,
        }
    }

    async fn next_event(rx: &mut broadcast::Receiver<RefreshEvent>) -> RefreshEvent {
        tokio::time::timeout(StdDuration::from_secs(5), rx.recv())
            .await
            .expect("Background refresh should finish")
            .expect("Event channel should stay open")
    }

    #[tokio::test]
    async fn test_first_get_fetches_and_stores() {
        let h = harness();
        h.source.push_ok(stats(100));

        let result = h.cache.get(false).await.expect("Fetch should succeed");

        assert!(!result.is_from_cache);
        assert_eq!(result.stats, stats(100));
        assert_eq!(result.cached_at, start_time());
        assert_eq!(result.expires_at, Some(start_time() + Duration::minutes(30)));
        assert_eq!(h.source.calls(), 1);
        assert!(h.cache.cache_info().has_cache);
    }

    #[tokio::test]
    async fn test_fresh_entry_is_served_without_fetch() {
        let h = harness();
        h.source.push_ok(stats(100));
        h.cache.get(false).await.expect("Seed fetch should succeed");

        h.clock.advance(Duration::minutes(29));
        let result = h.cache.get(false).await.expect("Cache hit should succeed");

        assert!(result.is_from_cache);
        assert_eq!(result.stats, stats(100));
        assert_eq!(h.source.calls(), 1, "Fresh hit must not fetch");
    }

    #[tokio::test]
    async fn test_expired_entry_triggers_fetch() {
        let h = harness();
        h.source.push_ok(stats(100));
        h.cache.get(false).await.expect("Seed fetch should succeed");

        h.clock.advance(Duration::minutes(35));
        h.source.push_ok(stats(101));
        let result = h.cache.get(false).await.expect("Refetch should succeed");

        assert!(!result.is_from_cache);
        assert_eq!(result.stats.total, 101);
        assert_eq!(result.cached_at, start_time() + Duration::minutes(35));
        assert_eq!(h.source.calls(), 2);
    }

    #[tokio::test]
    async fn test_expiry_boundary_is_stale() {
        let h = harness();
        h.source.push_ok(stats(100));
        h.cache.get(false).await.expect("Seed fetch should succeed");

        h.clock.advance(Duration::minutes(30));

        assert!(h.cache.cache_info().is_expired, "now == expires_at is stale");
    }

    #[tokio::test]
    async fn test_forced_refresh_bypasses_fresh_entry() {
        let h = harness();
        h.source.push_ok(stats(100));
        h.cache.get(false).await.expect("Seed fetch should succeed");

        h.source.push_ok(stats(120));
        let result = h.cache.get(true).await.expect("Forced fetch should succeed");

        assert!(!result.is_from_cache);
        assert_eq!(result.stats.total, 120);
        assert_eq!(*h.source.forced.lock(), vec![false, true]);
    }

    #[tokio::test]
    async fn test_failed_fetch_degrades_to_stale_entry() {
        let h = harness();
        h.source.push_ok(stats(100));
        h.cache.get(false).await.expect("Seed fetch should succeed");

        h.clock.advance(Duration::minutes(35));
        h.source.push_err("archive down");
        let result = h.cache.get(false).await.expect("Should degrade, not fail");

        assert!(result.is_from_cache);
        assert_eq!(result.stats, stats(100));
        assert_eq!(result.cached_at, start_time());
    }

    #[tokio::test]
    async fn test_failed_forced_fetch_degrades_to_fresh_entry() {
        let h = harness();
        h.source.push_ok(stats(100));
        h.cache.get(false).await.expect("Seed fetch should succeed");

        h.source.push_err("archive down");
        let result = h.cache.get(true).await.expect("Should degrade, not fail");

        assert!(result.is_from_cache);
        assert_eq!(result.stats, stats(100));
    }

    #[tokio::test]
    async fn test_failed_fetch_without_cache_is_data_unavailable() {
        let h = harness();
        h.source.push_err("archive down");
        h.source.push_err("archive still down");

        let err = h.cache.get(false).await.expect_err("Nothing to fall back on");
        assert!(matches!(err, StatsError::DataUnavailable { .. }));
        assert!(err.to_string().contains("archive down"));

        let err = h.cache.get(true).await.expect_err("Nothing to fall back on");
        let StatsError::DataUnavailable { message, source } = err;
        assert!(message.contains("503"));
        assert!(matches!(source, FetchError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_background_refresh_returns_immediately() {
        let h = harness();
        h.source.push_ok(stats(100));
        h.cache.get(false).await.expect("Seed fetch should succeed");

        h.clock.advance(Duration::minutes(35));
        h.source.set_delay(StdDuration::from_secs(3600));
        h.source.push_ok(stats(101));

        let result = tokio::time::timeout(
            StdDuration::from_millis(100),
            h.cache.get_with_background_refresh(),
        )
        .await
        .expect("Must not wait for the refresh")
        .expect("Cached entry should be returned");

        assert!(result.is_from_cache);
        assert_eq!(result.stats, stats(100));
    }

    #[tokio::test]
    async fn test_background_refresh_updates_store() {
        let h = harness();
        h.source.push_ok(stats(100));
        h.cache.get(false).await.expect("Seed fetch should succeed");
        let mut events = h.cache.subscribe();

        h.clock.advance(Duration::minutes(35));
        h.source.push_ok(stats(101));
        let result = h
            .cache
            .get_with_background_refresh()
            .await
            .expect("Cached entry should be returned");
        assert_eq!(result.stats.total, 100, "Stale value is served first");

        match next_event(&mut events).await {
            RefreshEvent::Completed(entry) => {
                assert!(!entry.is_from_cache);
                assert_eq!(entry.stats.total, 101);
            }
            RefreshEvent::Failed(e) => panic!("Refresh should succeed: {}", e),
        }

        let result = h.cache.get(false).await.expect("Cache hit should succeed");
        assert!(result.is_from_cache);
        assert_eq!(result.stats.total, 101);
        assert_eq!(h.source.calls(), 2);
        assert_eq!(*h.source.forced.lock(), vec![false, true]);
    }

    #[tokio::test]
    async fn test_background_refresh_skipped_when_fresh() {
        let h = harness();
        h.source.push_ok(stats(100));
        h.cache.get(false).await.expect("Seed fetch should succeed");

        h.clock.advance(Duration::minutes(5));
        let result = h
            .cache
            .get_with_background_refresh()
            .await
            .expect("Cached entry should be returned");
        tokio::task::yield_now().await;

        assert!(result.is_from_cache);
        assert_eq!(h.source.calls(), 1);
    }

    #[tokio::test]
    async fn test_background_refresh_without_cache_blocks_on_fetch() {
        let h = harness();
        h.source.push_ok(stats(100));

        let result = h
            .cache
            .get_with_background_refresh()
            .await
            .expect("Blocking fetch should succeed");

        assert!(!result.is_from_cache);
        assert_eq!(h.source.calls(), 1);
    }

    #[tokio::test]
    async fn test_background_refresh_without_cache_surfaces_failure() {
        let h = harness();
        h.source.push_err("archive down");

        let err = h
            .cache
            .get_with_background_refresh()
            .await
            .expect_err("Nothing cached and fetch failed");

        assert!(matches!(err, StatsError::DataUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_background_refresh_failure_is_swallowed() {
        let h = harness();
        h.source.push_ok(stats(100));
        h.cache.get(false).await.expect("Seed fetch should succeed");
        let mut events = h.cache.subscribe();

        h.clock.advance(Duration::minutes(35));
        h.source.push_err("archive down");
        let result = h
            .cache
            .get_with_background_refresh()
            .await
            .expect("Cached entry should be returned");
        assert!(result.is_from_cache);

        match next_event(&mut events).await {
            RefreshEvent::Completed(entry) => {
                assert!(entry.is_from_cache, "Failed refresh keeps the old entry");
                assert_eq!(entry.stats.total, 100);
            }
            RefreshEvent::Failed(e) => panic!("Cache existed, should not fail: {}", e),
        }
        assert!(h.cache.cache_info().is_expired);
    }

    #[tokio::test]
    async fn test_concurrent_background_refreshes_are_coalesced() {
        let h = harness();
        h.source.push_ok(stats(100));
        h.cache.get(false).await.expect("Seed fetch should succeed");
        let mut events = h.cache.subscribe();

        h.clock.advance(Duration::minutes(35));
        h.source.set_delay(StdDuration::from_millis(50));
        h.source.push_ok(stats(101));
        h.source.push_ok(stats(102));

        h.cache
            .get_with_background_refresh()
            .await
            .expect("Cached entry should be returned");
        h.cache
            .get_with_background_refresh()
            .await
            .expect("Cached entry should be returned");

        next_event(&mut events).await;
        assert_eq!(h.source.calls(), 2, "Second call must not start another refresh");
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let h = harness();
        h.cache.clear();

        h.source.push_ok(stats(100));
        h.cache.get(false).await.expect("Seed fetch should succeed");
        h.store.set(DETAILS_KEY, "[]").expect("Set should succeed");

        h.cache.clear();
        h.cache.clear();

        let info = h.cache.cache_info();
        assert!(!info.has_cache);
        assert!(info.is_expired);
        assert!(info.cached_at.is_none());
        for key in [STATS_KEY, EXPIRY_KEY, DETAILS_KEY] {
            assert!(h.store.get(key).expect("Get should succeed").is_none());
        }
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_a_cache_miss() {
        let h = harness();
        h.store.set(STATS_KEY, "{not json").expect("Set should succeed");

        let info = h.cache.cache_info();
        assert!(!info.has_cache);

        h.source.push_ok(stats(100));
        let result = h.cache.get(false).await.expect("Fetch should succeed");
        assert!(!result.is_from_cache);
        assert!(h.cache.cache_info().has_cache, "Corrupt entry is overwritten");
    }

    #[tokio::test]
    async fn test_corrupt_expiry_map_marks_entry_stale() {
        let h = harness();
        h.source.push_ok(stats(100));
        h.cache.get(false).await.expect("Seed fetch should succeed");
        h.store.set(EXPIRY_KEY, "oops").expect("Set should succeed");

        let info = h.cache.cache_info();
        assert!(info.has_cache);
        assert!(info.is_expired);

        h.source.push_ok(stats(101));
        let result = h.cache.get(false).await.expect("Refetch should succeed");
        assert!(!result.is_from_cache);
        assert_eq!(result.stats.total, 101);
    }

    #[tokio::test]
    async fn test_persisted_layout() {
        let h = harness();
        h.source.push_ok(stats(100));
        h.cache.get(false).await.expect("Seed fetch should succeed");

        let raw_expiry = h
            .store
            .get(EXPIRY_KEY)
            .expect("Get should succeed")
            .expect("Expiry map should be written");
        let expiry: HashMap<String, i64> =
            serde_json::from_str(&raw_expiry).expect("Expiry map should be JSON");
        assert_eq!(
            expiry.get("stats").copied(),
            Some((start_time() + Duration::minutes(30)).timestamp_millis())
        );

        let raw_stats = h
            .store
            .get(STATS_KEY)
            .expect("Get should succeed")
            .expect("Stats should be written");
        let value: serde_json::Value =
            serde_json::from_str(&raw_stats).expect("Stats should be JSON");
        assert_eq!(value["total"], 100);
        assert_eq!(value["falsePositives"], 10);
        assert!(value.get("cachedAt").is_some());
    }

    #[tokio::test]
    async fn test_entry_survives_new_cache_instance() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let clock = Arc::new(ManualClock::new(start_time()));
        let ttl = Duration::minutes(DEFAULT_TTL_MINUTES);

        let first_source = Arc::new(FakeSource::default());
        first_source.push_ok(stats(100));
        let first = StatsCache::new(
            Arc::new(FileStore::with_dir(temp_dir.path().to_path_buf())),
            first_source,
            clock.clone(),
            ttl,
        );
        first.get(false).await.expect("Seed fetch should succeed");

        let second_source = Arc::new(FakeSource::default());
        let second = StatsCache::new(
            Arc::new(FileStore::with_dir(temp_dir.path().to_path_buf())),
            second_source.clone(),
            clock,
            ttl,
        );
        let result = second.get(false).await.expect("Should read persisted entry");

        assert!(result.is_from_cache);
        assert_eq!(result.stats, stats(100));
        assert_eq!(second_source.calls(), 0);
    }

    #[tokio::test]
    async fn test_ttl_past_calendar_end_saturates_expiry() {
        let clock = Arc::new(ManualClock::new(start_time()));
        let source = Arc::new(FakeSource::default());
        source.push_ok(stats(100));
        let cache = StatsCache::new(
            Arc::new(MemoryStore::new()),
            source.clone(),
            clock.clone(),
            Duration::MAX,
        );

        let first = cache.get(false).await.expect("Fetch should succeed");
        assert_eq!(first.expires_at, Some(DateTime::<Utc>::MAX_UTC));

        clock.advance(Duration::days(365 * 1000));
        let second = cache.get(false).await.expect("Cache hit should succeed");
        assert!(second.is_from_cache);
        assert!(cache.is_fresh(&second));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_write_still_returns_fetched_value() {
        let clock = Arc::new(ManualClock::new(start_time()));
        let source = Arc::new(FakeSource::default());
        source.push_ok(stats(100));
        let cache = StatsCache::new(
            Arc::new(ReadOnlyStore),
            source.clone(),
            clock,
            Duration::minutes(DEFAULT_TTL_MINUTES),
        );

        let result = cache.get(false).await.expect("Write failure must not fail the call");

        assert!(!result.is_from_cache);
        assert_eq!(result.stats, stats(100));
        assert!(!cache.cache_info().has_cache);
    }

    #[tokio::test]
    async fn test_is_fresh_follows_cache_clock() {
        let h = harness();
        h.source.push_ok(stats(100));
        let entry = h.cache.get(false).await.expect("Fetch should succeed");
        assert!(h.cache.is_fresh(&entry));

        h.clock.advance(Duration::minutes(30));
        assert!(!h.cache.is_fresh(&entry));
    }

    #[tokio::test]
    async fn test_unavailable_store_always_fetches() {
        let clock = Arc::new(ManualClock::new(start_time()));
        let source = Arc::new(FakeSource::default());
        source.push_ok(stats(100));
        source.push_ok(stats(101));
        let cache = StatsCache::new(
            Arc::new(UnavailableStore),
            source.clone(),
            clock,
            Duration::minutes(DEFAULT_TTL_MINUTES),
        );

        assert!(!cache.get(false).await.expect("Fetch should succeed").is_from_cache);
        assert!(!cache.get(false).await.expect("Fetch should succeed").is_from_cache);
        assert_eq!(source.calls(), 2);

        cache.clear();
        assert!(!cache.cache_info().has_cache);
    }

    #[tokio::test]
    async fn test_thirty_minute_scenario() {
        let h = harness();

        // t=0: empty cache fetches
        h.source.push_ok(stats(100));
        let t0 = h.cache.get(false).await.expect("Fetch should succeed");
        assert!(!t0.is_from_cache);
        assert_eq!(t0.stats.total, 100);

        // t=10min: served from cache
        h.clock.advance(Duration::minutes(10));
        let t10 = h.cache.get(false).await.expect("Cache hit should succeed");
        assert!(t10.is_from_cache);
        assert_eq!(h.source.calls(), 1);

        // t=35min: refetch replaces the value
        h.clock.advance(Duration::minutes(25));
        h.source.push_ok(stats(101));
        let t35 = h.cache.get(false).await.expect("Refetch should succeed");
        assert!(!t35.is_from_cache);
        assert_eq!(t35.stats.total, 101);

        // t=70min: refetch fails, t=35 value is kept
        h.clock.advance(Duration::minutes(35));
        h.source.push_err("archive down");
        let t70 = h.cache.get(false).await.expect("Should degrade");
        assert!(t70.is_from_cache);
        assert_eq!(t70.stats.total, 101);
    }

    #[test]
    fn test_cached_statistic_serializes_caller_shape() {
        let entry = CachedStatistic {
            stats: stats(100),
            cached_at: start_time(),
            expires_at: None,
            is_from_cache: true,
        };

        let value = serde_json::to_value(&entry).expect("Should serialize");

        for field in [
            "total",
            "confirmed",
            "candidates",
            "falsePositives",
            "lastUpdated",
            "cachedAt",
            "isFromCache",
        ] {
            assert!(value.get(field).is_some(), "missing {}", field);
        }
        assert!(value.get("expiresAt").is_none());
    }
}
