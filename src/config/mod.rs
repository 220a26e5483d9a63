//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! gateway.toml
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!
//! instances.d/*.toml (one per coverage area)
//!     → loader.rs → validation.rs → InstanceConfig
//!     → registry (initial load)
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads the instance document
//!     → InstanceEvent::Reloaded / Removed on the event channel
//!     → invalidation listener swaps the registry entry
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - A rejected reload keeps the previous instance live

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, load_instance_file, load_instances_dir, ConfigError};
pub use schema::{
    BoundingBox, CacheBackendKind, CacheConfig, CircuitBreakerConfig, EventsConfig,
    FeatureFlags, GatewayConfig, InstanceBackendConfig, InstanceConfig, LogFormat,
    ObservabilityConfig, OrchestratorConfig, RegistryConfig, RetryConfig, RoutingParams,
};
pub use watcher::InstanceDirWatcher;
