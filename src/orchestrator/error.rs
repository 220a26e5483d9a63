//! Errors visible to callers of the orchestrator.

use std::time::Duration;

use thiserror::Error;

use crate::capability::{BackendError, Capability};

/// Why a fan-out request failed.
///
/// Cache and registry trouble never shows up here; only routing errors and
/// required sub-queries that could not be served do.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    /// The request names a coverage area the registry does not know.
    #[error("unknown instance '{0}'")]
    InstanceNotFound(String),

    /// No registered instance covers the requested coordinate.
    #[error("no instance covers ({lon}, {lat})")]
    NoCoverage { lon: f64, lat: f64 },

    /// A sub-query exceeded its deadline (after the allowed retry).
    #[error("{capability} on '{instance_id}' timed out after {after:?}")]
    Timeout {
        instance_id: String,
        capability: Capability,
        after: Duration,
    },

    /// The join as a whole exceeded its deadline.
    #[error("sub-queries did not complete within {0:?}")]
    JoinTimeout(Duration),

    /// A sub-query failed with a transport or remote error.
    #[error("{capability} on '{instance_id}' failed: {source}")]
    BackendFailure {
        instance_id: String,
        capability: Capability,
        source: BackendError,
    },

    /// The request was cancelled before its sub-queries completed.
    #[error("request cancelled")]
    Cancelled,

    /// A sub-query task panicked.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, GatewayError::Timeout { .. } | GatewayError::JoinTimeout(_))
    }

    /// Client errors are not worth retrying at any level.
    pub fn is_routing_error(&self) -> bool {
        matches!(
            self,
            GatewayError::InstanceNotFound(_) | GatewayError::NoCoverage { .. }
        )
    }

    /// Bounded label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            GatewayError::InstanceNotFound(_) => "instance_not_found",
            GatewayError::NoCoverage { .. } => "no_coverage",
            GatewayError::Timeout { .. } | GatewayError::JoinTimeout(_) => "timeout",
            GatewayError::BackendFailure { .. } => "backend_failure",
            GatewayError::Cancelled => "cancelled",
            GatewayError::Internal(_) => "internal",
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
