//! In-process cache store.
//!
//! Backed by a `DashMap`; expiry is checked on read and expired entries are
//! removed on the spot. Keys that are never read again are dropped by
//! [`MemoryStore::purge_expired`], which the cache sweeper calls
//! periodically.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use super::error::CacheResult;
use super::key::KeyPattern;
use super::store::CacheStore;

#[derive(Debug)]
struct Entry {
    value: Arc<[u8]>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Concurrent in-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries currently held, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.to_vec())),
            Some(_) => {}
            None => return Ok(None),
        }
        // Re-checked under the shard lock: a concurrent `set` may have
        // refreshed the entry in between.
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CacheResult<()> {
        let entry = Entry {
            value: value.into(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn delete_matching(&self, pattern: &KeyPattern) -> CacheResult<u64> {
        let mut removed = 0u64;
        self.entries.retain(|key, _| {
            let hit = pattern.matches(key);
            if hit {
                removed += 1;
            }
            !hit
        });
        Ok(removed)
    }

    async fn ping(&self) -> CacheResult<()> {
        Ok(())
    }

    async fn sweep_expired(&self) -> CacheResult<u64> {
        Ok(self.purge_expired() as u64)
    }

    fn provider_name(&self) -> &'static str {
        "memory"
    }
}
