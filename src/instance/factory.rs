//! Building instances from configuration documents.

use std::sync::Arc;

use thiserror::Error;

use super::model::Instance;
use crate::capability::{BackendConnector, BackendError};
use crate::config::validation::{validate_instance, ValidationError};
use crate::config::{CircuitBreakerConfig, InstanceConfig};
use crate::resilience::CircuitBreaker;

#[derive(Debug, Error)]
pub enum InstanceBuildError {
    #[error("invalid instance '{id}': {}", join_errors(.errors))]
    Invalid {
        id: String,
        errors: Vec<ValidationError>,
    },

    #[error("cannot reach instance '{id}': {source}")]
    Backend {
        id: String,
        #[source]
        source: BackendError,
    },
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Turns [`InstanceConfig`]s into live [`Instance`]s.
#[derive(Clone)]
pub struct InstanceFactory {
    connector: Arc<dyn BackendConnector>,
    breaker: CircuitBreakerConfig,
}

impl InstanceFactory {
    pub fn new(connector: Arc<dyn BackendConnector>, breaker: CircuitBreakerConfig) -> Self {
        Self { connector, breaker }
    }

    /// Validate `config` and connect its backend. Each built instance gets a
    /// fresh circuit breaker.
    pub fn build(&self, config: InstanceConfig) -> Result<Instance, InstanceBuildError> {
        validate_instance(&config).map_err(|errors| InstanceBuildError::Invalid {
            id: config.id.clone(),
            errors,
        })?;

        let backend = self
            .connector
            .connect(&config.backend)
            .map_err(|source| InstanceBuildError::Backend {
                id: config.id.clone(),
                source,
            })?;
        let breaker = Arc::new(CircuitBreaker::from_config(config.id.clone(), &self.breaker));

        Ok(Instance::new(config, backend, breaker))
    }
}

impl std::fmt::Debug for InstanceFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceFactory")
            .field("breaker", &self.breaker)
            .finish_non_exhaustive()
    }
}
