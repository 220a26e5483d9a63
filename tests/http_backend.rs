//! Gateway assembled from files, talking to engines over HTTP.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tower::ServiceExt;

use journey_gateway::capability::{
    BackendCall, BackendError, Capability, CapabilityRequest, CapabilityResponse, Coord, HttpConnector,
    StopPoint, StopQuery,
};
use journey_gateway::config::{CacheBackendKind, GatewayConfig};
use journey_gateway::{FanOutRequest, Gateway, GatewayError, RequestKind, SubQuery};

mod common;

fn gateway_config(dir: &Path) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.registry.instances_dir = dir.display().to_string();
    config.registry.watch = false;
    config.cache.backend = CacheBackendKind::Memory;
    config.events.redis_channel = String::new();
    config.events.metadata_poll_interval_secs = 0;
    config
}

async fn build(dir: &Path) -> Gateway {
    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    Gateway::build_with(gateway_config(dir), Arc::new(HttpConnector::new(client)))
        .await
        .unwrap()
}

fn write_instance(dir: &Path, id: &str, address: &str) {
    let doc = format!("id = \"{id}\"\n[backend]\naddress = \"{address}\"\n");
    fs::write(dir.join(format!("{id}.toml")), doc).unwrap();
}

fn stops_request(id: &str) -> FanOutRequest {
    FanOutRequest::new(RequestKind::stops_nearby()).with(SubQuery::on(
        id,
        CapabilityRequest::LookupStop(StopQuery {
            around: Coord { lon: 2.35, lat: 48.86 },
            distance_m: 300,
            max_results: 3,
        }),
    ))
}

#[tokio::test]
async fn test_capability_call_over_http() {
    let hits = Arc::new(AtomicU32::new(0));
    let counter = hits.clone();
    let addr = common::start_programmable_backend(move |path, body| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            let call: BackendCall = serde_json::from_str(&body).unwrap();
            assert_eq!(path, "/engine/stop_points");
            let stops = CapabilityResponse::Stops(vec![StopPoint {
                id: format!("{}:sp1", call.instance_id),
                name: "Châtelet".into(),
                coord: Coord { lon: 2.347, lat: 48.858 },
                distance_m: 120,
                lines: vec!["M1".into()],
            }]);
            (200, serde_json::to_string(&stops).unwrap())
        }
    })
    .await;

    let dir = tempfile::tempdir().unwrap();
    write_instance(dir.path(), "fr-idf", &format!("http://{addr}/engine"));
    let gateway = build(dir.path()).await;

    let aggregate = gateway.service().oneshot(stops_request("fr-idf")).await.unwrap();
    match aggregate.get("fr-idf", Capability::StopLookup).and_then(|r| r.response()) {
        Some(CapabilityResponse::Stops(stops)) => {
            assert_eq!(stops[0].id, "fr-idf:sp1");
            assert_eq!(stops[0].lines, vec!["M1".to_string()]);
        }
        other => panic!("unexpected response {other:?}"),
    }

    gateway.service().oneshot(stops_request("fr-idf")).await.unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_remote_error_becomes_backend_failure() {
    let addr = common::start_programmable_backend(|_, _| async { (503, "overloaded".to_string()) }).await;

    let dir = tempfile::tempdir().unwrap();
    write_instance(dir.path(), "fr-idf", &format!("http://{addr}"));
    let gateway = build(dir.path()).await;

    let err = gateway.service().oneshot(stops_request("fr-idf")).await.unwrap_err();
    match err {
        GatewayError::BackendFailure { instance_id, source, .. } => {
            assert_eq!(instance_id, "fr-idf");
            assert_eq!(
                source,
                BackendError::Remote {
                    status: 503,
                    message: "overloaded".into()
                }
            );
        }
        other => panic!("expected backend failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_garbage_answer_is_decode_error() {
    let addr = common::start_programmable_backend(|_, _| async { (200, "{\"kind\":".to_string()) }).await;

    let dir = tempfile::tempdir().unwrap();
    write_instance(dir.path(), "fr-idf", &format!("http://{addr}"));
    let gateway = build(dir.path()).await;

    let err = gateway.orchestrator().execute(stops_request("fr-idf")).await.unwrap_err();
    assert!(matches!(
        err,
        GatewayError::BackendFailure { source: BackendError::Decode(_), .. }
    ));
}
