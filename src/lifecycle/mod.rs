//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Load instances dir → Build registry + cache
//!     → Orchestrator → Spawn listener, event sources, poller
//!
//! Shutdown (shutdown.rs):
//!     Ctrl-C received → broadcast → background loops exit → process exits
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then registry, then event consumers
//! - Background tasks own a broadcast receiver; request tasks do not

pub mod shutdown;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{Background, Gateway};
