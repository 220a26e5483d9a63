//! Shared object cache.
//!
//! # Data Flow
//! ```text
//! orchestrator
//!     → ObjectCache::get::<T>(key)     (breaker open → bypass)
//!     → CacheStore::get (memory | redis | noop)
//!     → codec::decode (schema/version checked, mismatch → miss)
//!
//! invalidation listener
//!     → ObjectCache::evict_instance(id)
//!     → CacheStore::delete_matching("{prefix}|*{id}|*")
//!
//! sweeper (every `sweep_interval_secs`)
//!     → CacheStore::sweep_expired   (memory only, Redis expires natively)
//! ```
//!
//! # Design Decisions
//! - Values are opaque bytes in the store; typing lives in the codec
//! - Cache trouble is never a request failure
//! - Keys carry the ids of every instance a value depends on

pub mod codec;
pub mod error;
pub mod key;
pub mod memory;
pub mod object_cache;
pub mod redis;
pub mod store;

pub use codec::Cacheable;
pub use error::{CacheError, CacheResult};
pub use key::{CacheKey, KeyPattern};
pub use memory::MemoryStore;
pub use object_cache::{ObjectCache, TtlClass, TtlPolicy};
pub use self::redis::RedisStore;
pub use store::{CacheStore, NoOpStore};
