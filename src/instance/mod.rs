//! Coverage instances and their registry.
//!
//! # Data Flow
//! ```text
//! InstanceConfig (file, event)
//!     → InstanceFactory::build (validate, connect backend, fresh breaker)
//!     → Instance (immutable, revisioned)
//!     → InstanceRegistry::replace / remove (atomic swap)
//!
//! request → registry.snapshot() → lookup ids / coordinates
//! ```

pub mod factory;
pub mod model;
pub mod registry;

pub use factory::{InstanceBuildError, InstanceFactory};
pub use model::Instance;
pub use registry::{choose_best, InstanceRegistry, RegistrySnapshot};
