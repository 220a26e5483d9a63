//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Sub-query to a capability backend:
//!     → circuit_breaker.rs (fail fast if the instance is known dead)
//!     → deadline enforced by the capability proxy
//!     → On timeout: retries.rs (may re-dispatch once, with backoff.rs delay)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Retries only for deadline expiries, at most once
//! - Circuit breaker prevents cascading failures onto a dead instance

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;

pub use circuit_breaker::{BreakerPermit, CircuitBreaker, CircuitState};
pub use retries::RetryPolicy;
