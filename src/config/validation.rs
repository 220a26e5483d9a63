//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (deadlines > 0, speeds > 0, sane TTL ordering)
//! - Check instance documents before they reach the registry
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is a pure function of the document
//! - Runs before a config is accepted; a rejected instance reload keeps the
//!   previous instance live

use thiserror::Error;
use url::Url;

use crate::config::schema::{CacheBackendKind, GatewayConfig, InstanceConfig};

/// One semantic problem found in a configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate the gateway configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let cache = &config.cache;
    if cache.backend == CacheBackendKind::Redis && Url::parse(&cache.redis_url).is_err() {
        errors.push(ValidationError::new("cache.redis_url", "not a valid URL"));
    }
    if cache.operation_timeout_ms == 0 {
        errors.push(ValidationError::new("cache.operation_timeout_ms", "must be > 0"));
    }
    if cache.realtime_ttl_secs == 0 {
        errors.push(ValidationError::new(
            "cache.realtime_ttl_secs",
            "real-time data must expire (must be > 0)",
        ));
    }
    if cache.default_ttl_secs != 0 && cache.realtime_ttl_secs > cache.default_ttl_secs {
        errors.push(ValidationError::new(
            "cache.realtime_ttl_secs",
            "must not exceed cache.default_ttl_secs",
        ));
    }

    let orch = &config.orchestrator;
    if orch.subquery_timeout_ms == 0 {
        errors.push(ValidationError::new("orchestrator.subquery_timeout_ms", "must be > 0"));
    }
    if orch.join_timeout_ms == 0 {
        errors.push(ValidationError::new("orchestrator.join_timeout_ms", "must be > 0"));
    }
    if orch.max_concurrent_subqueries == 0 {
        errors.push(ValidationError::new(
            "orchestrator.max_concurrent_subqueries",
            "must be > 0",
        ));
    }

    if config.retries.max_delay_ms < config.retries.base_delay_ms {
        errors.push(ValidationError::new(
            "retries.max_delay_ms",
            "must be >= retries.base_delay_ms",
        ));
    }

    if config.circuit_breaker.failure_threshold == 0 {
        errors.push(ValidationError::new("circuit_breaker.failure_threshold", "must be > 0"));
    }

    if config.registry.instance_file_extension.is_empty() {
        errors.push(ValidationError::new("registry.instance_file_extension", "must not be empty"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate one instance document.
pub fn validate_instance(config: &InstanceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.id.trim().is_empty() {
        errors.push(ValidationError::new("id", "must not be empty"));
    }
    // '|' delimits instance ids inside cache keys.
    if config.id.contains('|') {
        errors.push(ValidationError::new("id", "must not contain '|'"));
    }
    if config.scenario.trim().is_empty() {
        errors.push(ValidationError::new("scenario", "must not be empty"));
    }

    match Url::parse(&config.backend.address) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
        Ok(url) => errors.push(ValidationError::new(
            "backend.address",
            format!("unsupported scheme '{}'", url.scheme()),
        )),
        Err(e) => errors.push(ValidationError::new("backend.address", e.to_string())),
    }
    if config.backend.timeout_ms == Some(0) {
        errors.push(ValidationError::new("backend.timeout_ms", "must be > 0"));
    }

    let routing = &config.routing;
    for (field, speed) in [
        ("routing.walking_speed", routing.walking_speed),
        ("routing.bike_speed", routing.bike_speed),
        ("routing.bss_speed", routing.bss_speed),
        ("routing.car_speed", routing.car_speed),
    ] {
        if !(speed.is_finite() && speed > 0.0) {
            errors.push(ValidationError::new(field, "must be a positive speed"));
        }
    }
    if !(routing.factor_too_long_journey.is_finite() && routing.factor_too_long_journey >= 1.0) {
        errors.push(ValidationError::new("routing.factor_too_long_journey", "must be >= 1"));
    }

    if let Some(bbox) = &config.coverage {
        if bbox.min_lon > bbox.max_lon || bbox.min_lat > bbox.max_lat {
            errors.push(ValidationError::new("coverage", "min corner must be below max corner"));
        }
        if bbox.min_lon < -180.0 || bbox.max_lon > 180.0 || bbox.min_lat < -90.0 || bbox.max_lat > 90.0 {
            errors.push(ValidationError::new("coverage", "outside WGS84 bounds"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{BoundingBox, InstanceBackendConfig, RoutingParams, FeatureFlags};

    fn instance() -> InstanceConfig {
        InstanceConfig {
            id: "fr-idf".into(),
            scenario: "distributed".into(),
            is_free: false,
            priority: 0,
            backend: InstanceBackendConfig {
                address: "http://127.0.0.1:9000".into(),
                timeout_ms: None,
            },
            routing: RoutingParams::default(),
            features: FeatureFlags::default(),
            coverage: None,
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&GatewayConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = GatewayConfig::default();
        config.orchestrator.subquery_timeout_ms = 0;
        config.orchestrator.max_concurrent_subqueries = 0;
        config.retries.base_delay_ms = 1000;
        config.retries.max_delay_ms = 10;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.field == "retries.max_delay_ms"));
    }

    #[test]
    fn test_instance_checks() {
        assert!(validate_instance(&instance()).is_ok());

        let mut bad = instance();
        bad.id = "a|b".into();
        bad.backend.address = "zmq://kraken".into();
        bad.routing.walking_speed = 0.0;
        bad.coverage = Some(BoundingBox { min_lon: 3.0, min_lat: 48.0, max_lon: 2.0, max_lat: 49.0 });

        let errors = validate_instance(&bad).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["id", "backend.address", "routing.walking_speed", "coverage"]);
    }
}
