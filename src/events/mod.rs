//! Instance lifecycle events and cache invalidation.
//!
//! # Data Flow
//! ```text
//! Redis pub/sub channel ─┐
//! instances.d watcher ───┼─→ mpsc<InstanceEvent> ─→ InvalidationListener
//! MetadataPoller ────────┘                             → registry.replace / remove
//!                                                      → cache.evict_instance
//! ```
//!
//! # Design Decisions
//! - Every source feeds one channel consumed by a single listener task, so
//!   events for the same instance are applied in arrival order
//! - The listener shares only the registry and the cache with request tasks

pub mod listener;
pub mod poller;
pub mod redis_source;
pub mod types;

pub use listener::{Applied, InvalidationListener};
pub use poller::MetadataPoller;
pub use redis_source::RedisEventSource;
pub use types::InstanceEvent;
