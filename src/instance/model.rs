//! Instance model.
//!
//! An [`Instance`] is an immutable snapshot of one coverage area: its
//! configuration, the data revision its engine is serving and the handles
//! used to reach it. Updates never mutate an instance; they build a new
//! one that replaces it in the registry.

use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::capability::{BackendCall, CapabilityBackend, CapabilityRequest};
use crate::config::InstanceConfig;
use crate::resilience::CircuitBreaker;

/// Hex characters kept from the revision digest.
const REVISION_LEN: usize = 16;

/// One resolved coverage area.
#[derive(Debug)]
pub struct Instance {
    config: InstanceConfig,
    revision: String,
    publication_date: Option<i64>,
    backend: Arc<dyn CapabilityBackend>,
    breaker: Arc<CircuitBreaker>,
}

impl Instance {
    pub fn new(
        config: InstanceConfig,
        backend: Arc<dyn CapabilityBackend>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        let revision = compute_revision(&config, None);
        Self {
            config,
            revision,
            publication_date: None,
            backend,
            breaker,
        }
    }

    /// Same configuration and backend, serving data published at
    /// `publication_date`. The breaker is shared: the engine did not change.
    pub fn with_publication_date(&self, publication_date: i64) -> Self {
        Self {
            config: self.config.clone(),
            revision: compute_revision(&self.config, Some(publication_date)),
            publication_date: Some(publication_date),
            backend: self.backend.clone(),
            breaker: self.breaker.clone(),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &InstanceConfig {
        &self.config
    }

    /// Stable digest of configuration and data publication date. Two
    /// gateways holding the same instance agree on it.
    pub fn revision(&self) -> &str {
        &self.revision
    }

    pub fn publication_date(&self) -> Option<i64> {
        self.publication_date
    }

    pub fn backend(&self) -> &Arc<dyn CapabilityBackend> {
        &self.backend
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn is_free(&self) -> bool {
        self.config.is_free
    }

    pub fn priority(&self) -> u32 {
        self.config.priority
    }

    /// Instances without a declared coverage cover nothing.
    pub fn covers(&self, lon: f64, lat: f64) -> bool {
        self.config
            .coverage
            .map(|bbox| bbox.contains(lon, lat))
            .unwrap_or(false)
    }

    pub fn subquery_timeout(&self) -> Option<Duration> {
        self.config.backend.timeout_ms.map(Duration::from_millis)
    }

    /// Bind `request` to this instance's parameters.
    pub fn backend_call(&self, request: CapabilityRequest) -> BackendCall {
        BackendCall {
            instance_id: self.config.id.clone(),
            scenario: self.config.scenario.clone(),
            routing: self.config.routing.clone(),
            features: self.config.features.clone(),
            request,
        }
    }
}

fn compute_revision(config: &InstanceConfig, publication_date: Option<i64>) -> String {
    let mut hasher = Sha256::new();
    // Serializing plain config structs cannot fail
    hasher.update(serde_json::to_vec(config).unwrap_or_default());
    if let Some(date) = publication_date {
        hasher.update(date.to_be_bytes());
    }
    let mut revision = hex::encode(hasher.finalize());
    revision.truncate(REVISION_LEN);
    revision
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::capability::{BackendError, CapabilityResponse};
    use crate::config::{BoundingBox, InstanceBackendConfig};
    use async_trait::async_trait;

    #[derive(Debug)]
    pub(crate) struct NullBackend;

    #[async_trait]
    impl CapabilityBackend for NullBackend {
        async fn call(&self, _call: BackendCall) -> Result<CapabilityResponse, BackendError> {
            Err(BackendError::Transport("null backend".into()))
        }
    }

    pub(crate) fn config(id: &str) -> InstanceConfig {
        InstanceConfig {
            id: id.into(),
            scenario: "distributed".into(),
            is_free: false,
            priority: 0,
            backend: InstanceBackendConfig {
                address: format!("http://{id}.engine"),
                timeout_ms: None,
            },
            routing: Default::default(),
            features: Default::default(),
            coverage: None,
        }
    }

    pub(crate) fn instance(config: InstanceConfig) -> Instance {
        let breaker = Arc::new(CircuitBreaker::new(config.id.clone(), 4, Duration::from_secs(60)));
        Instance::new(config, Arc::new(NullBackend), breaker)
    }

    #[test]
    fn test_revision_is_deterministic() {
        let a = instance(config("fr-idf"));
        let b = instance(config("fr-idf"));
        assert_eq!(a.revision(), b.revision());
        assert_eq!(a.revision().len(), REVISION_LEN);
    }

    #[test]
    fn test_revision_tracks_config_and_data() {
        let base = instance(config("fr-idf"));

        let mut changed = config("fr-idf");
        changed.routing.walking_speed = 1.5;
        assert_ne!(base.revision(), instance(changed).revision());

        let republished = base.with_publication_date(1_700_000_000);
        assert_ne!(base.revision(), republished.revision());
        assert_eq!(republished.publication_date(), Some(1_700_000_000));
        assert_eq!(
            republished.revision(),
            base.with_publication_date(1_700_000_000).revision()
        );
    }

    #[test]
    fn test_covers_requires_bbox() {
        let mut cfg = config("fr-idf");
        assert!(!instance(cfg.clone()).covers(2.35, 48.85));
        cfg.coverage = Some(BoundingBox { min_lon: 1.4, min_lat: 48.1, max_lon: 3.6, max_lat: 49.3 });
        assert!(instance(cfg).covers(2.35, 48.85));
    }

    #[test]
    fn test_backend_call_carries_params() {
        let mut cfg = config("fr-idf");
        cfg.routing.bike_speed = 5.0;
        let call = instance(cfg).backend_call(CapabilityRequest::Metadata);
        assert_eq!(call.instance_id, "fr-idf");
        assert_eq!(call.routing.bike_speed, 5.0);
    }
}
