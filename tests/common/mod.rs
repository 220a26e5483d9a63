//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use journey_gateway::cache::{CacheResult, CacheStore, KeyPattern, MemoryStore, ObjectCache};
use journey_gateway::capability::{
    BackendCall, BackendConnector, BackendError, CapabilityBackend, CapabilityRequest,
    CapabilityResponse, InstanceMetadata, Journey, Mode, Place, StopPoint,
};
use journey_gateway::config::{
    CacheConfig, CircuitBreakerConfig, InstanceBackendConfig, InstanceConfig, OrchestratorConfig,
};
use journey_gateway::events::{InstanceEvent, InvalidationListener};
use journey_gateway::instance::{InstanceFactory, InstanceRegistry};
use journey_gateway::resilience::RetryPolicy;
use journey_gateway::Orchestrator;

/// Programmable in-process routing engine.
///
/// Answers are derived from the parameters of the call, so a test can tell
/// which configuration produced a result.
#[derive(Debug, Default)]
pub struct MockEngine {
    calls: AtomicUsize,
    completed: AtomicUsize,
    delay_ms: AtomicU64,
    failing: AtomicBool,
    publication_date: AtomicI64,
    objects: DashSet<String>,
}

impl MockEngine {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Calls that ran to the end, answer or failure.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Every later call sleeps for `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Every later call fails with a 503.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_publication_date(&self, date: i64) {
        self.publication_date.store(date, Ordering::SeqCst);
    }

    /// The engine now answers object lookups for `id`.
    pub fn add_object(&self, id: &str) {
        self.objects.insert(id.to_string());
    }
}

#[async_trait]
impl CapabilityBackend for MockEngine {
    async fn call(&self, call: BackendCall) -> Result<CapabilityResponse, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.completed.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(BackendError::Remote {
                status: 503,
                message: "engine unavailable".into(),
            });
        }

        Ok(self.answer(&call))
    }
}

impl MockEngine {
    fn answer(&self, call: &BackendCall) -> CapabilityResponse {
        answer(call, self.publication_date.load(Ordering::SeqCst), &self.objects)
    }
}

fn answer(call: &BackendCall, publication_date: i64, objects: &DashSet<String>) -> CapabilityResponse {
    match &call.request {
        CapabilityRequest::ResolvePlace(query) => CapabilityResponse::Places(vec![Place {
            id: format!("{}:{}", call.instance_id, query.text),
            name: query.text.clone(),
            kind: "stop_area".into(),
            coord: None,
        }]),
        CapabilityRequest::ComputeRoute(query) => {
            // 1 km walked at the configured speed.
            let duration_secs = (1000.0 / call.routing.walking_speed).round() as u32;
            CapabilityResponse::Journeys(vec![Journey {
                departure: query.datetime,
                arrival: query.datetime + i64::from(duration_secs),
                duration_secs,
                nb_transfers: 0,
                modes: vec![Mode::Walking],
            }])
        }
        CapabilityRequest::LookupStop(query) => CapabilityResponse::Stops(vec![StopPoint {
            id: format!("{}:sp", call.instance_id),
            name: "Stop".into(),
            coord: query.around,
            distance_m: 0,
            lines: vec![],
        }]),
        CapabilityRequest::Metadata => CapabilityResponse::Metadata(InstanceMetadata {
            publication_date,
            timezone: "Europe/Paris".into(),
            status: "running".into(),
        }),
        CapabilityRequest::LookupObject(query) => {
            let held = objects.contains(&query.id).then(|| Place {
                id: query.id.clone(),
                name: query.id.clone(),
                kind: "stop_area".into(),
                coord: None,
            });
            CapabilityResponse::Objects(held.into_iter().collect())
        }
    }
}

/// Hands out one [`MockEngine`] per backend address.
#[derive(Debug, Default)]
pub struct MockConnector {
    engines: DashMap<String, Arc<MockEngine>>,
}

impl MockConnector {
    pub fn engine(&self, address: &str) -> Arc<MockEngine> {
        self.engines.entry(address.to_string()).or_default().clone()
    }
}

impl BackendConnector for MockConnector {
    fn connect(&self, config: &InstanceBackendConfig) -> Result<Arc<dyn CapabilityBackend>, BackendError> {
        Ok(self.engine(&config.address))
    }
}

/// Minimal instance document; its engine address is unique per id.
pub fn instance_config(id: &str) -> InstanceConfig {
    toml::from_str(&format!(
        "id = \"{id}\"\n[backend]\naddress = \"http://{id}.mock\"\n"
    ))
    .unwrap()
}

/// Memory store counting reads and writes.
#[derive(Debug, Default)]
pub struct CountingStore {
    inner: MemoryStore,
    pub gets: AtomicUsize,
    pub sets: AtomicUsize,
}

impl CountingStore {
    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

#[async_trait]
impl CacheStore for CountingStore {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CacheResult<()> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.inner.delete(key).await
    }

    async fn delete_matching(&self, pattern: &KeyPattern) -> CacheResult<u64> {
        self.inner.delete_matching(pattern).await
    }

    async fn ping(&self) -> CacheResult<()> {
        Ok(())
    }

    async fn sweep_expired(&self) -> CacheResult<u64> {
        self.inner.sweep_expired().await
    }

    fn provider_name(&self) -> &'static str {
        "counting"
    }
}

/// Registry, cache, orchestrator and listener wired over mock engines.
pub struct Harness {
    pub store: Arc<CountingStore>,
    pub connector: Arc<MockConnector>,
    pub registry: Arc<InstanceRegistry>,
    pub cache: Arc<ObjectCache>,
    pub orchestrator: Orchestrator,
    pub listener: InvalidationListener,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_orchestrator(OrchestratorConfig {
            subquery_timeout_ms: 200,
            join_timeout_ms: 2_000,
            max_concurrent_subqueries: 4,
        })
    }

    pub fn with_orchestrator(config: OrchestratorConfig) -> Self {
        let connector = Arc::new(MockConnector::default());
        let registry = Arc::new(InstanceRegistry::new());
        let store = Arc::new(CountingStore::default());
        let cache = Arc::new(ObjectCache::new(store.clone(), &CacheConfig::default()));
        let factory = InstanceFactory::new(connector.clone(), CircuitBreakerConfig::default());
        let orchestrator = Orchestrator::new(registry.clone(), cache.clone(), &config, RetryPolicy::default());
        let listener = InvalidationListener::new(registry.clone(), cache.clone(), factory);
        Self {
            store,
            connector,
            registry,
            cache,
            orchestrator,
            listener,
        }
    }

    /// Register `config` through the listener and return its engine.
    pub async fn load(&self, config: InstanceConfig) -> Arc<MockEngine> {
        let engine = self.connector.engine(&config.backend.address);
        self.listener
            .handle(InstanceEvent::Reloaded {
                instance_id: config.id.clone(),
                config,
            })
            .await;
        engine
    }
}

/// Start a programmable HTTP engine on an ephemeral port.
///
/// `f` receives the request path and body and returns the status and body
/// of the answer.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(String, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = f.clone();
            tokio::spawn(async move {
                let Some((path, body)) = read_request(&mut socket).await else {
                    return;
                };
                let (status, body) = f(path, body).await;
                let status_text = match status {
                    200 => "200 OK",
                    400 => "400 Bad Request",
                    500 => "500 Internal Server Error",
                    503 => "503 Service Unavailable",
                    _ => "200 OK",
                };
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status_text,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// Read one HTTP/1.1 request with a `Content-Length` body.
async fn read_request(socket: &mut tokio::net::TcpStream) -> Option<(String, String)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);

        let text = String::from_utf8_lossy(&buf).to_string();
        let Some(header_end) = text.find("\r\n\r\n") else {
            continue;
        };
        let head = &text[..header_end];
        let length = head
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        let body_start = header_end + 4;
        if buf.len() < body_start + length {
            continue;
        }

        let path = head.split_whitespace().nth(1)?.to_string();
        let body = String::from_utf8_lossy(&buf[body_start..body_start + length]).to_string();
        return Some((path, body));
    }
}
