//! Redis cache store.
//!
//! Uses `redis::aio::ConnectionManager` for a multiplexed connection with
//! automatic reconnection. Every command is bounded by the configured
//! operation timeout; a slow store reads as an unavailable one.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::RedisResult;

use super::error::{CacheError, CacheResult};
use super::key::KeyPattern;
use super::store::CacheStore;

/// Keys requested per `SCAN` round-trip.
const SCAN_BATCH: usize = 200;

#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    operation_timeout: Duration,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("connection", &"ConnectionManager")
            .field("operation_timeout", &self.operation_timeout)
            .finish()
    }
}

impl RedisStore {
    pub async fn connect(url: &str, operation_timeout: Duration) -> CacheResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| CacheError::Unavailable(format!("invalid Redis URL: {e}")))?;

        let connection = tokio::time::timeout(operation_timeout * 4, ConnectionManager::new(client))
            .await
            .map_err(|_| CacheError::Unavailable("timed out connecting to Redis".into()))?
            .map_err(|e| CacheError::Unavailable(format!("failed to connect to Redis: {e}")))?;

        tracing::debug!(url = %redact_url(url), "Redis cache store connected");
        Ok(Self {
            connection,
            operation_timeout,
        })
    }

    async fn bounded<T, F>(&self, command: &'static str, fut: F) -> CacheResult<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.operation_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) if e.is_io_error() || e.is_connection_dropped() || e.is_timeout() => {
                Err(CacheError::Unavailable(format!("Redis {command} failed: {e}")))
            }
            Ok(Err(e)) => Err(CacheError::Backend(format!("Redis {command} failed: {e}"))),
            Err(_) => Err(CacheError::Unavailable(format!(
                "Redis {command} timed out after {:?}",
                self.operation_timeout
            ))),
        }
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut conn = self.connection.clone();
        let cmd = redis::cmd("GET").arg(key).clone();
        let value: Option<Vec<u8>> = self.bounded("GET", cmd.query_async(&mut conn)).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CacheResult<()> {
        let mut conn = self.connection.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
            cmd.arg("PX").arg(millis);
        }
        let _: () = self.bounded("SET", cmd.query_async(&mut conn)).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.connection.clone();
        let cmd = redis::cmd("DEL").arg(key).clone();
        let _: () = self.bounded("DEL", cmd.query_async(&mut conn)).await?;
        Ok(())
    }

    async fn delete_matching(&self, pattern: &KeyPattern) -> CacheResult<u64> {
        let glob = pattern.to_glob();
        let mut conn = self.connection.clone();
        let mut deleted = 0u64;
        let mut cursor = 0u64;

        loop {
            let scan = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&glob)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .clone();
            let (next, scanned): (u64, Vec<String>) =
                self.bounded("SCAN", scan.query_async(&mut conn)).await?;
            let keys: Vec<String> = scanned.into_iter().filter(|k| pattern.matches(k)).collect();

            if !keys.is_empty() {
                let del = redis::cmd("DEL").arg(&keys).clone();
                let count: u64 = self.bounded("DEL", del.query_async(&mut conn)).await?;
                deleted += count;
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        tracing::debug!(pattern = %glob, deleted, "Redis pattern DEL");
        Ok(deleted)
    }

    async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.connection.clone();
        let cmd = redis::cmd("PING");
        let pong: String = self.bounded("PING", cmd.query_async(&mut conn)).await?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(CacheError::Backend(format!("unexpected PING reply '{pong}'")))
        }
    }

    fn provider_name(&self) -> &'static str {
        "redis"
    }
}

/// Hide the password of a Redis URL for logging.
pub(crate) fn redact_url(url: &str) -> String {
    if let Some(at) = url.find('@') {
        if let Some(colon) = url[..at].rfind(':') {
            // `redis://host` has its only colon in the scheme
            if colon > url.find("://").map(|i| i + 2).unwrap_or(0) {
                return format!("{}***{}", &url[..=colon], &url[at..]);
            }
        }
    }
    url.to_string()
}
