//! Typed object cache with degraded mode.
//!
//! # Responsibilities
//! - Encode and decode values through the versioned codec
//! - Apply the TTL of each value's class
//! - Absorb every store failure: reads turn into misses, writes are dropped
//!
//! # Design Decisions
//! - Store health is tracked by a circuit breaker; while it is open reads
//!   and writes skip the store entirely (degraded mode, always compute)
//! - Evictions always reach the store, even in degraded mode
//! - An unreadable value is a miss, never an error
//! - A store that does not answer a ping at startup is replaced by the
//!   no-op store instead of failing the gateway

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::codec::{self, Cacheable};
use super::error::CacheError;
use super::key::{CacheKey, KeyPattern};
use super::memory::MemoryStore;
use super::redis::RedisStore;
use super::store::{CacheStore, NoOpStore};
use crate::config::{CacheBackendKind, CacheConfig};
use crate::observability::metrics;
use crate::resilience::{CircuitBreaker, CircuitState};

/// Freshness class of a cached value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtlClass {
    /// Real-time data (disruptions, live departures).
    Realtime,
    Default,
    /// Reference data that only changes with a data reload.
    Static,
}

/// TTL per [`TtlClass`]. `None` means never expire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlPolicy {
    pub realtime: Option<Duration>,
    pub default: Option<Duration>,
    pub static_data: Option<Duration>,
}

impl TtlPolicy {
    pub fn from_config(config: &CacheConfig) -> Self {
        let secs = |s: u64| (s > 0).then(|| Duration::from_secs(s));
        Self {
            realtime: secs(config.realtime_ttl_secs),
            default: secs(config.default_ttl_secs),
            static_data: secs(config.static_ttl_secs),
        }
    }

    pub fn ttl_for(&self, class: TtlClass) -> Option<Duration> {
        match class {
            TtlClass::Realtime => self.realtime,
            TtlClass::Default => self.default,
            TtlClass::Static => self.static_data,
        }
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

/// Shared cache of computed values.
#[derive(Debug)]
pub struct ObjectCache {
    store: Arc<dyn CacheStore>,
    prefix: String,
    ttls: TtlPolicy,
    health: CircuitBreaker,
}

impl ObjectCache {
    pub fn new(store: Arc<dyn CacheStore>, config: &CacheConfig) -> Self {
        Self {
            store,
            prefix: config.key_prefix.clone(),
            ttls: TtlPolicy::from_config(config),
            health: CircuitBreaker::new(
                "object-cache",
                config.failure_threshold,
                Duration::from_secs(config.bypass_secs),
            ),
        }
    }

    /// Build the configured store. A Redis store that cannot be reached at
    /// startup is replaced by a no-op store; the gateway still serves.
    pub async fn from_config(config: &CacheConfig) -> Self {
        let store: Arc<dyn CacheStore> = match config.backend {
            CacheBackendKind::Memory => Arc::new(MemoryStore::new()),
            CacheBackendKind::Disabled => Arc::new(NoOpStore),
            CacheBackendKind::Redis => {
                let timeout = Duration::from_millis(config.operation_timeout_ms);
                match RedisStore::connect(&config.redis_url, timeout).await {
                    Ok(store) => Arc::new(store),
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            "Redis cache unavailable at startup, caching disabled"
                        );
                        Arc::new(NoOpStore)
                    }
                }
            }
        };
        let store = checked_store(store).await;
        tracing::info!(provider = store.provider_name(), prefix = %config.key_prefix, "Object cache ready");
        Self::new(store, config)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn provider_name(&self) -> &'static str {
        self.store.provider_name()
    }

    /// Reads and writes are currently bypassing the store.
    pub fn is_degraded(&self) -> bool {
        self.health.state() != CircuitState::Closed
    }

    pub fn ttl_for(&self, class: TtlClass) -> Option<Duration> {
        self.ttls.ttl_for(class)
    }

    /// Key under this cache's namespace.
    pub fn key<'a, I>(&self, instance_ids: I, digest: &str) -> CacheKey
    where
        I: IntoIterator<Item = &'a str>,
    {
        CacheKey::new(&self.prefix, instance_ids, digest)
    }

    /// Stored value for `key`, if present, fresh and readable.
    pub async fn get<T: Cacheable>(&self, key: &CacheKey) -> Option<T> {
        let Some(permit) = self.health.acquire() else {
            metrics::record_cache_lookup("bypass");
            return None;
        };

        let bytes = match self.store.get(key.as_str()).await {
            Ok(found) => {
                permit.settle(true);
                found
            }
            Err(e) => {
                permit.settle(false);
                self.degraded("get", &e);
                metrics::record_cache_lookup("bypass");
                return None;
            }
        };

        let Some(bytes) = bytes else {
            metrics::record_cache_lookup("miss");
            return None;
        };

        match codec::decode(&bytes) {
            Ok(value) => {
                metrics::record_cache_lookup("hit");
                Some(value)
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Unreadable cache entry, treating as miss");
                metrics::record_cache_lookup("miss");
                None
            }
        }
    }

    /// Store `value` with the TTL of `class`.
    pub async fn set<T: Cacheable>(&self, key: &CacheKey, value: &T, class: TtlClass) {
        self.set_with_ttl(key, value, self.ttls.ttl_for(class)).await;
    }

    /// Store `value`; `ttl = None` keeps it until evicted.
    pub async fn set_with_ttl<T: Cacheable>(&self, key: &CacheKey, value: &T, ttl: Option<Duration>) {
        let bytes = match codec::encode(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Failed to encode cache value");
                return;
            }
        };

        let Some(permit) = self.health.acquire() else {
            return;
        };
        match self.store.set(key.as_str(), bytes, ttl).await {
            Ok(()) => {
                permit.settle(true);
                tracing::trace!(key = %key, ?ttl, "Cached value");
            }
            Err(e) => {
                permit.settle(false);
                self.degraded("set", &e);
            }
        }
    }

    pub async fn evict(&self, key: &CacheKey) {
        metrics::record_cache_eviction("key");
        if let Err(e) = self.store.delete(key.as_str()).await {
            self.degraded("evict", &e);
        }
    }

    /// Drop every entry depending on `instance_id`. Returns the number of
    /// entries removed, `0` when the store could not be reached.
    pub async fn evict_instance(&self, instance_id: &str) -> u64 {
        metrics::record_cache_eviction("instance");
        self.evict_matching(&KeyPattern::instance(self.prefix.clone(), instance_id)).await
    }

    /// Drop every entry under this cache's prefix.
    pub async fn clear(&self) -> u64 {
        metrics::record_cache_eviction("all");
        self.evict_matching(&KeyPattern::all(self.prefix.clone())).await
    }

    async fn evict_matching(&self, pattern: &KeyPattern) -> u64 {
        match self.store.delete_matching(pattern).await {
            Ok(removed) => {
                tracing::debug!(?pattern, removed, "Evicted cache entries");
                removed
            }
            Err(e) => {
                self.degraded("evict", &e);
                0
            }
        }
    }

    /// Drop expired entries the store does not expire on its own.
    pub async fn sweep_expired(&self) -> u64 {
        match self.store.sweep_expired().await {
            Ok(removed) => {
                if removed > 0 {
                    tracing::debug!(removed, "Swept expired cache entries");
                }
                removed
            }
            Err(e) => {
                self.degraded("sweep", &e);
                0
            }
        }
    }

    /// Sweep every `interval` until shutdown is signalled.
    pub async fn run_sweeper(self: Arc<Self>, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(interval = ?interval, provider = self.provider_name(), "Cache sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_expired().await;
                }
                _ = shutdown.recv() => break,
            }
        }
        tracing::info!("Cache sweeper stopped");
    }

    fn degraded(&self, operation: &'static str, error: &CacheError) {
        metrics::record_cache_degraded(operation);
        tracing::warn!(
            operation,
            error = %error,
            degraded = self.is_degraded(),
            "Cache store failure, computing without cache"
        );
    }
}

/// `store` if it answers a ping, the no-op store otherwise.
async fn checked_store(store: Arc<dyn CacheStore>) -> Arc<dyn CacheStore> {
    match store.ping().await {
        Ok(()) => store,
        Err(e) => {
            tracing::warn!(
                provider = store.provider_name(),
                error = %e,
                "Cache store does not answer, caching disabled"
            );
            Arc::new(NoOpStore)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::error::CacheResult;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Departures(Vec<String>);

    impl Cacheable for Departures {
        const SCHEMA: &'static str = "departures";
        const VERSION: u32 = 1;
    }

    /// Memory store that can be switched off.
    #[derive(Debug, Default)]
    struct FlakyStore {
        inner: MemoryStore,
        down: AtomicBool,
        calls: AtomicUsize,
    }

    impl FlakyStore {
        fn check(&self) -> CacheResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.down.load(Ordering::SeqCst) {
                Err(CacheError::Unavailable("connection refused".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl CacheStore for FlakyStore {
        async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
            self.check()?;
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CacheResult<()> {
            self.check()?;
            self.inner.set(key, value, ttl).await
        }
        async fn delete(&self, key: &str) -> CacheResult<()> {
            self.check()?;
            self.inner.delete(key).await
        }
        async fn delete_matching(&self, pattern: &KeyPattern) -> CacheResult<u64> {
            self.check()?;
            self.inner.delete_matching(pattern).await
        }
        async fn ping(&self) -> CacheResult<()> {
            self.check()
        }
        fn provider_name(&self) -> &'static str {
            "flaky"
        }
    }

    fn config() -> CacheConfig {
        CacheConfig {
            key_prefix: "t:".into(),
            failure_threshold: 2,
            bypass_secs: 30,
            ..CacheConfig::default()
        }
    }

    fn departures() -> Departures {
        Departures(vec!["08:02".into(), "08:17".into()])
    }

    #[tokio::test]
    async fn test_set_get_and_evict_instance() {
        let cache = ObjectCache::new(Arc::new(MemoryStore::new()), &config());
        let shared = cache.key(["fr-idf", "fr-ne"], "d1");
        let other = cache.key(["fr-ne"], "d2");

        cache.set(&shared, &departures(), TtlClass::Default).await;
        cache.set(&other, &departures(), TtlClass::Default).await;
        assert_eq!(cache.get::<Departures>(&shared).await, Some(departures()));

        assert_eq!(cache.evict_instance("fr-idf").await, 1);
        assert_eq!(cache.get::<Departures>(&shared).await, None);
        assert!(cache.get::<Departures>(&other).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_classes() {
        let cache = ObjectCache::new(Arc::new(MemoryStore::new()), &config());
        let live = cache.key(["a"], "live");
        let reference = cache.key(["a"], "ref");

        cache.set(&live, &departures(), TtlClass::Realtime).await;
        cache.set_with_ttl(&reference, &departures(), None).await;

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(cache.get::<Departures>(&live).await, None);
        assert!(cache.get::<Departures>(&reference).await.is_some());
    }

    #[tokio::test]
    async fn test_unreadable_entry_is_a_miss() {
        let store = Arc::new(MemoryStore::new());
        let cache = ObjectCache::new(store.clone(), &config());
        let key = cache.key(["a"], "x");
        store.set(key.as_str(), b"{not json".to_vec(), None).await.unwrap();

        assert_eq!(cache.get::<Departures>(&key).await, None);
        assert!(!cache.is_degraded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_degraded_mode_bypasses_then_recovers() {
        let store = Arc::new(FlakyStore::default());
        let cache = ObjectCache::new(store.clone(), &config());
        let key = cache.key(["a"], "x");

        store.down.store(true, Ordering::SeqCst);
        assert_eq!(cache.get::<Departures>(&key).await, None);
        cache.set(&key, &departures(), TtlClass::Default).await;
        assert!(cache.is_degraded());

        // Bypassed: the store is not contacted at all
        let calls = store.calls.load(Ordering::SeqCst);
        assert_eq!(cache.get::<Departures>(&key).await, None);
        assert_eq!(store.calls.load(Ordering::SeqCst), calls);

        store.down.store(false, Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(31)).await;
        cache.set(&key, &departures(), TtlClass::Default).await;
        assert!(!cache.is_degraded());
        assert_eq!(cache.get::<Departures>(&key).await, Some(departures()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_drops_entries_never_read_again() {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(ObjectCache::new(store.clone(), &config()));
        for n in 0..100 {
            let key = cache.key(["a"], &format!("d{n}"));
            cache.set(&key, &departures(), TtlClass::Realtime).await;
        }
        let kept = cache.key(["a"], "static");
        cache.set_with_ttl(&kept, &departures(), None).await;

        let shutdown = crate::lifecycle::Shutdown::new();
        let sweeper = tokio::spawn(cache.clone().run_sweeper(Duration::from_secs(60), shutdown.subscribe()));

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(store.len(), 1);
        assert!(cache.get::<Departures>(&kept).await.is_some());

        shutdown.trigger();
        sweeper.await.unwrap();
    }

    #[tokio::test]
    async fn test_silent_store_replaced_at_startup() {
        let store = Arc::new(FlakyStore::default());
        store.down.store(true, Ordering::SeqCst);
        assert_eq!(checked_store(store).await.provider_name(), "noop");

        let healthy: Arc<dyn CacheStore> = Arc::new(MemoryStore::new());
        assert_eq!(checked_store(healthy).await.provider_name(), "memory");
    }

    #[test]
    fn test_zero_ttl_means_never_expire() {
        let policy = TtlPolicy::from_config(&CacheConfig {
            static_ttl_secs: 0,
            ..CacheConfig::default()
        });
        assert_eq!(policy.ttl_for(TtlClass::Static), None);
        assert_eq!(policy.ttl_for(TtlClass::Realtime), Some(Duration::from_secs(30)));
    }
}
