//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (requests, latency, cache, sub-queries, registry)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by kind, outcome
//! - `gateway_request_duration_seconds` (histogram): end-to-end latency by kind
//! - `gateway_cache_lookups_total` (counter): hit / miss / bypass
//! - `gateway_cache_degraded_total` (counter): store errors absorbed
//! - `gateway_cache_evictions_total` (counter): eviction calls
//! - `gateway_subqueries_total` (counter): sub-queries by capability, outcome
//! - `gateway_registry_instances` (gauge): live instances
//! - `gateway_registry_events_total` (counter): lifecycle events applied
//!
//! # Design Decisions
//! - Labels are bounded enums (kind, capability, outcome), never instance
//!   ids or fingerprints

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(kind: &str, outcome: &'static str, start: Instant) {
    counter!(
        "gateway_requests_total",
        "kind" => kind.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!("gateway_request_duration_seconds", "kind" => kind.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_cache_lookup(result: &'static str) {
    counter!("gateway_cache_lookups_total", "result" => result).increment(1);
}

pub fn record_cache_degraded(operation: &'static str) {
    counter!("gateway_cache_degraded_total", "operation" => operation).increment(1);
}

pub fn record_cache_eviction(scope: &'static str) {
    counter!("gateway_cache_evictions_total", "scope" => scope).increment(1);
}

pub fn record_subquery(capability: &'static str, outcome: &'static str) {
    counter!(
        "gateway_subqueries_total",
        "capability" => capability,
        "outcome" => outcome
    )
    .increment(1);
}

pub fn set_registry_instances(count: usize) {
    gauge!("gateway_registry_instances").set(count as f64);
}

pub fn record_registry_event(event: &'static str) {
    counter!("gateway_registry_events_total", "event" => event).increment(1);
}
