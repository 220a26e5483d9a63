//! Asynchronous work primitives.
//!
//! # Data Flow
//! ```text
//! orchestrator
//!     → TaskScope::spawn(work)        (one scope per request, bounded)
//!     → TaskHandle<T, E>              (pending → fulfilled | failed)
//!     → wait_and_get() from any number of waiters
//!
//! scope dropped → pending handles resolve to TaskError::Cancelled
//! ```

pub mod handle;
pub mod scope;

pub use handle::{TaskError, TaskHandle, TaskOutcome};
pub use scope::TaskScope;
