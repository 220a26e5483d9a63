//! Capability contracts towards instance engines.
//!
//! # Data Flow
//! ```text
//! orchestrator
//!     → CapabilityProxy (bound to one Arc<Instance>)
//!     → circuit breaker check → deadline
//!     → CapabilityBackend::call(BackendCall)
//!     → HttpBackend: POST {address}/{capability}
//!     → CapabilityResponse | BackendError
//! ```

pub mod backend;
pub mod http;
pub mod proxy;
pub mod types;

pub use backend::{BackendConnector, BackendError, CapabilityBackend};
pub use http::{HttpBackend, HttpConnector};
pub use proxy::CapabilityProxy;
pub use types::{
    BackendCall, Capability, CapabilityRequest, CapabilityResponse, Coord, InstanceMetadata,
    Journey, Mode, ObjectQuery, Place, PlaceQuery, RouteQuery, StopPoint, StopQuery,
};
