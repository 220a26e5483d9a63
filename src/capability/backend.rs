//! Capability backend boundary.
//!
//! # Responsibilities
//! - Define the transport-agnostic call contract of an instance engine
//! - Classify transport failures into [`BackendError`]
//! - Build backends from instance configuration ([`BackendConnector`])
//!
//! # Design Decisions
//! - The trait is object safe; instances hold `Arc<dyn CapabilityBackend>`
//! - Implementations keep no per-call mutable state so one backend can be
//!   driven by many sub-queries at once
//! - Deadlines are enforced by the caller, not by the backend

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::capability::types::{BackendCall, Capability, CapabilityResponse, Mode};
use crate::config::InstanceBackendConfig;

/// Failures of a single capability call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The call exceeded its deadline.
    #[error("deadline of {0:?} exceeded")]
    Timeout(Duration),

    /// The request never got a usable answer (connection refused, reset...).
    #[error("transport error: {0}")]
    Transport(String),

    /// The engine answered with an error status.
    #[error("remote error {status}: {message}")]
    Remote { status: u16, message: String },

    /// The answer could not be decoded.
    #[error("undecodable response: {0}")]
    Decode(String),

    /// The instance's circuit breaker is open.
    #[error("instance {0} is unavailable (circuit open)")]
    CircuitOpen(String),

    /// The engine answered with a payload for another capability.
    #[error("expected a {expected} response, got {got}")]
    UnexpectedResponse { expected: Capability, got: Capability },

    /// The request needs a mobility service the instance does not offer.
    #[error("mode {mode:?} is not enabled on instance {instance_id}")]
    FeatureDisabled { instance_id: String, mode: Mode },

    /// The backend address could not be used.
    #[error("invalid backend address '{address}': {message}")]
    InvalidAddress { address: String, message: String },
}

impl BackendError {
    /// Whether this failure says something about the health of the engine.
    ///
    /// Client-side errors (4xx) and mismatched payloads do not count.
    pub fn trips_breaker(&self) -> bool {
        match self {
            BackendError::Timeout(_) | BackendError::Transport(_) | BackendError::Decode(_) => true,
            BackendError::Remote { status, .. } => *status >= 500,
            BackendError::CircuitOpen(_)
            | BackendError::FeatureDisabled { .. }
            | BackendError::UnexpectedResponse { .. }
            | BackendError::InvalidAddress { .. } => false,
        }
    }
}

/// An instance's routing engine, reached over some transport.
#[async_trait]
pub trait CapabilityBackend: Send + Sync + std::fmt::Debug {
    /// Perform one capability call.
    async fn call(&self, call: BackendCall) -> Result<CapabilityResponse, BackendError>;

    /// Publication date of the data the engine reported with its latest
    /// answer, for transports that carry one.
    fn observed_publication_date(&self) -> Option<i64> {
        None
    }
}

/// Builds backends for instance configurations.
pub trait BackendConnector: Send + Sync {
    fn connect(
        &self,
        config: &InstanceBackendConfig,
    ) -> Result<Arc<dyn CapabilityBackend>, BackendError>;
}
