//! Configuration schema definitions.
//!
//! This module defines the gateway's own configuration and the per-instance
//! configuration documents injected into the registry. All types derive
//! Serde traits for deserialization from TOML files.

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Shared object cache settings.
    pub cache: CacheConfig,

    /// Instance registry settings.
    pub registry: RegistryConfig,

    /// Fan-out deadlines and pool sizing.
    pub orchestrator: OrchestratorConfig,

    /// Retry configuration for timed-out sub-queries.
    pub retries: RetryConfig,

    /// Per-instance circuit breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Invalidation event sources.
    pub events: EventsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Which store backs the object cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    /// In-process store, useful for a single gateway or tests.
    Memory,
    /// Shared Redis store.
    Redis,
    /// No caching at all; every request is computed.
    Disabled,
}

/// Object cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackendKind,

    /// Redis connection URL (used when `backend = "redis"`).
    pub redis_url: String,

    /// Namespace prepended to every key.
    pub key_prefix: String,

    /// TTL for ordinary aggregates, in seconds.
    pub default_ttl_secs: u64,

    /// TTL for real-time aggregates, in seconds.
    pub realtime_ttl_secs: u64,

    /// TTL for static reference data, in seconds. `0` means never expire.
    pub static_ttl_secs: u64,

    /// Deadline for a single cache round-trip in milliseconds.
    pub operation_timeout_ms: u64,

    /// Cache errors in a row before reads and writes are bypassed.
    pub failure_threshold: u32,

    /// How long the cache stays bypassed before it is probed again.
    pub bypass_secs: u64,

    /// Interval between sweeps of expired in-memory entries, in seconds.
    /// `0` disables the sweeper.
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "journey-gateway:".to_string(),
            default_ttl_secs: 300,
            realtime_ttl_secs: 30,
            static_ttl_secs: 600,
            operation_timeout_ms: 250,
            failure_threshold: 3,
            bypass_secs: 30,
            sweep_interval_secs: 60,
        }
    }
}

/// Instance registry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Directory holding one configuration file per instance.
    pub instances_dir: String,

    /// Extension of instance files inside `instances_dir`.
    pub instance_file_extension: String,

    /// Turn file changes in `instances_dir` into reload events.
    pub watch: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            instances_dir: "/etc/journey-gateway/instances.d".to_string(),
            instance_file_extension: "toml".to_string(),
            watch: true,
        }
    }
}

/// Fan-out configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Default deadline for one sub-query, in milliseconds.
    pub subquery_timeout_ms: u64,

    /// Upper bound on joining all sub-queries of a request, in milliseconds.
    pub join_timeout_ms: u64,

    /// Sub-queries of one request allowed to run at the same time.
    pub max_concurrent_subqueries: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            subquery_timeout_ms: 10_000,
            join_timeout_ms: 25_000,
            max_concurrent_subqueries: 3,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable retries of timed-out sub-queries.
    pub enabled: bool,

    /// Re-dispatches allowed per sub-query (clamped to 1).
    pub max_timeout_retries: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_timeout_retries: 1,
            base_delay_ms: 50,
            max_delay_ms: 500,
        }
    }
}

/// Circuit breaker configuration, applied to every instance backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,

    /// Seconds before an open circuit lets a probe through.
    pub reset_timeout_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 4,
            reset_timeout_secs: 60,
        }
    }
}

/// Invalidation event sources.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Redis pub/sub channel carrying instance lifecycle events.
    /// Empty disables the subscriber.
    pub redis_channel: String,

    /// Redis URL for the subscriber; falls back to `cache.redis_url`.
    pub redis_url: Option<String>,

    /// Metadata polling interval in seconds. `0` disables the poller.
    pub metadata_poll_interval_secs: u64,

    /// Deadline for one metadata call, in milliseconds.
    pub metadata_timeout_ms: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            redis_channel: "journey-gateway:instances".to_string(),
            redis_url: None,
            metadata_poll_interval_secs: 10,
            metadata_timeout_ms: 1_000,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Instance documents
// ---------------------------------------------------------------------------

/// Configuration of one coverage area, as supplied by the configuration layer.
///
/// An instance is never patched field by field: every change produces a new
/// document which replaces the old one wholesale.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct InstanceConfig {
    /// Unique coverage identifier (e.g. "fr-idf").
    pub id: String,

    /// Journey-planning scenario used by the backend.
    #[serde(default = "default_scenario")]
    pub scenario: String,

    /// Free (open data) instances lose ties against non-free ones.
    #[serde(default)]
    pub is_free: bool,

    /// Higher priority wins when several instances cover a point.
    #[serde(default)]
    pub priority: u32,

    pub backend: InstanceBackendConfig,

    #[serde(default)]
    pub routing: RoutingParams,

    #[serde(default)]
    pub features: FeatureFlags,

    /// Geographic coverage, if known.
    #[serde(default)]
    pub coverage: Option<BoundingBox>,
}

fn default_scenario() -> String {
    "distributed".to_string()
}

/// Where the instance's routing engine lives.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct InstanceBackendConfig {
    /// Base URL of the capability endpoint.
    pub address: String,

    /// Per-instance override of the sub-query deadline, in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Tunable routing parameters sent along with every routing call.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RoutingParams {
    /// Speeds in metres per second.
    pub walking_speed: f64,
    pub bike_speed: f64,
    pub bss_speed: f64,
    pub car_speed: f64,

    /// Fallback duration caps, in seconds.
    pub max_walking_duration_to_pt: u32,
    pub max_bike_duration_to_pt: u32,
    pub max_bss_duration_to_pt: u32,
    pub max_car_duration_to_pt: u32,

    pub max_nb_transfers: u32,
    pub max_additional_connections: u32,

    /// Minimum time spent in a fallback mode before boarding, in seconds.
    pub min_bike: u32,
    pub min_bss: u32,
    pub min_car: u32,

    pub factor_too_long_journey: f64,
    pub min_duration_too_long_journey: u32,
    pub walking_transfer_penalty: u32,
}

impl Default for RoutingParams {
    fn default() -> Self {
        Self {
            walking_speed: 1.12,
            bike_speed: 4.1,
            bss_speed: 4.1,
            car_speed: 11.11,
            max_walking_duration_to_pt: 30 * 60,
            max_bike_duration_to_pt: 30 * 60,
            max_bss_duration_to_pt: 30 * 60,
            max_car_duration_to_pt: 30 * 60,
            max_nb_transfers: 10,
            max_additional_connections: 2,
            min_bike: 4 * 60,
            min_bss: 8 * 60,
            min_car: 5 * 60,
            factor_too_long_journey: 4.0,
            min_duration_too_long_journey: 15 * 60,
            walking_transfer_penalty: 120,
        }
    }
}

/// Optional mobility services enabled for the instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct FeatureFlags {
    pub ridesharing: bool,
    pub bike_share: bool,
    pub taxi: bool,
}

/// Axis-aligned coverage box in WGS84 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Borders are inclusive.
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon && lat >= self.min_lat && lat <= self.max_lat
    }
}
