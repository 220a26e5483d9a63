//! Cache store boundary.

use std::time::Duration;

use async_trait::async_trait;

use super::error::CacheResult;
use super::key::KeyPattern;

/// Byte-oriented key/value store with optional per-entry TTL.
///
/// Implementations must tolerate concurrent use; `set` is last-writer-wins.
#[async_trait]
pub trait CacheStore: Send + Sync + std::fmt::Debug {
    /// Present, non-expired value for `key`.
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Store `value`. `ttl = None` means no automatic expiry.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CacheResult<()>;

    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Delete every key matching `pattern`, returning how many were removed.
    async fn delete_matching(&self, pattern: &KeyPattern) -> CacheResult<u64>;

    /// Cheap liveness probe.
    async fn ping(&self) -> CacheResult<()>;

    /// Drop entries whose TTL has passed, returning how many were removed.
    /// Stores that expire entries on their own keep the default.
    async fn sweep_expired(&self) -> CacheResult<u64> {
        Ok(0)
    }

    fn provider_name(&self) -> &'static str;
}

/// Store used when caching is disabled: always miss, always succeed.
#[derive(Debug, Clone, Default)]
pub struct NoOpStore;

#[async_trait]
impl CacheStore for NoOpStore {
    async fn get(&self, _key: &str) -> CacheResult<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Option<Duration>) -> CacheResult<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> CacheResult<()> {
        Ok(())
    }

    async fn delete_matching(&self, _pattern: &KeyPattern) -> CacheResult<u64> {
        Ok(0)
    }

    async fn ping(&self) -> CacheResult<()> {
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "noop"
    }
}
