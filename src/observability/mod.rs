//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via `tracing`)
//!     → metrics.rs (counters, gauges, histograms via `metrics`)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Every fan-out request carries a request id span
//! - Metric updates are no-ops until a recorder is installed, so library
//!   code and tests record unconditionally

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::init_metrics;
