//! Request fan-out and aggregation.
//!
//! # Data Flow
//! ```text
//! FanOutRequest (kind + sub-queries)
//!     → StatsLayer (request_id span, request metrics)
//!     → Orchestrator::execute
//!         → registry snapshot: resolve ids and coordinates
//!         → object ids: cached location, or a lookup on every instance
//!         → Fingerprint (kind + instance revisions + canonical payloads)
//!         → ObjectCache::get  ── hit ──→ Aggregate
//!         → TaskScope: one CapabilityProxy call per sub-query
//!         → join under the kind's JoinPolicy
//!         → ObjectCache::set (TTL class of the kind)
//!     → Aggregate | GatewayError
//! ```
//!
//! # Design Decisions
//! - Join semantics belong to the request kind, not to the caller
//! - The cache key depends on instance revisions, so a reloaded instance
//!   can never be served an aggregate computed against its predecessor

pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod join;
pub mod locate;
pub mod middleware;
pub mod request;

pub use engine::Orchestrator;
pub use error::{GatewayError, GatewayResult};
pub use fingerprint::Fingerprint;
pub use join::{Aggregate, SubOutcome, SubResult};
pub use locate::ObjectLocation;
pub use middleware::{OrchestratorService, StatsLayer, StatsService};
pub use request::{FanOutRequest, JoinPolicy, RequestKind, SubQuery, Target};
