//! Journey planning gateway library.
//!
//! Fans a logical journey-planning request out to the regional routing
//! instances it needs, joins their answers and keeps the aggregates in a
//! shared cache that is invalidated when an instance changes.

// Request path
pub mod capability;
pub mod orchestrator;
pub mod task;

// Shared state
pub mod cache;
pub mod instance;

// Lifecycle events
pub mod config;
pub mod events;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::schema::GatewayConfig;
pub use lifecycle::{Gateway, Shutdown};
pub use orchestrator::{Aggregate, FanOutRequest, GatewayError, Orchestrator, RequestKind, SubQuery};
