//! Fan-out orchestrator.
//!
//! # Responsibilities
//! - Resolve every sub-query's instance from one registry snapshot
//! - Serve repeated requests from the object cache
//! - Dispatch sub-queries concurrently and join them under the kind's policy
//! - Populate the cache after a successful join
//!
//! # Design Decisions
//! - Resolution happens before any cache access: an unknown instance fails
//!   the request without touching the cache or spawning work, and the
//!   fingerprint can include the resolved instance revisions
//! - Instance ids and coordinates are resolved before object ids, so a bad
//!   target fails the request before any object lookup is issued
//! - A publication date reported by an engine that differs from the one
//!   the instance carries is forwarded as a data reload event
//! - Timed-out sub-queries are retried inside their own task, so a retry
//!   never holds up the join of unrelated sub-queries
//! - The per-request [`TaskScope`] is dropped on every exit path, which
//!   cancels whatever is still pending

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::error::{GatewayError, GatewayResult};
use super::fingerprint::{canonical_entry, Fingerprint};
use super::join::{join, Aggregate, Pending};
use super::locate::{object_coord, ObjectLocator};
use super::request::{FanOutRequest, JoinPolicy, RequestKind, SubQuery, Target};
use crate::cache::ObjectCache;
use crate::capability::{BackendError, CapabilityProxy, CapabilityRequest, CapabilityResponse, Coord};
use crate::config::OrchestratorConfig;
use crate::events::InstanceEvent;
use crate::instance::{choose_best, Instance, InstanceRegistry, RegistrySnapshot};
use crate::observability::metrics;
use crate::resilience::RetryPolicy;
use crate::task::{TaskHandle, TaskScope};

/// Sub-query bound to a resolved instance.
struct Resolved {
    instance: Arc<Instance>,
    request: CapabilityRequest,
    canonical: String,
}

/// Executes [`FanOutRequest`]s.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    registry: Arc<InstanceRegistry>,
    cache: Arc<ObjectCache>,
    subquery_timeout: Duration,
    join_timeout: Duration,
    max_concurrent: usize,
    retry: RetryPolicy,
    events_tx: Option<mpsc::UnboundedSender<InstanceEvent>>,
}

/// Target resolved from the snapshot alone, or an object id still to look up.
enum Direct {
    Resolved(Arc<Instance>),
    Object(String),
}

impl Orchestrator {
    pub fn new(
        registry: Arc<InstanceRegistry>,
        cache: Arc<ObjectCache>,
        config: &OrchestratorConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            registry,
            cache,
            subquery_timeout: Duration::from_millis(config.subquery_timeout_ms),
            join_timeout: Duration::from_millis(config.join_timeout_ms),
            max_concurrent: config.max_concurrent_subqueries,
            retry,
            events_tx: None,
        }
    }

    /// Forward publication dates reported by engines as
    /// [`InstanceEvent::DataReloaded`] on `events_tx`.
    pub fn with_events(mut self, events_tx: mpsc::UnboundedSender<InstanceEvent>) -> Self {
        self.events_tx = Some(events_tx);
        self
    }

    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<ObjectCache> {
        &self.cache
    }

    /// Run `request` to completion.
    pub async fn execute(&self, request: FanOutRequest) -> GatewayResult<Aggregate> {
        let FanOutRequest { kind, subqueries } = request;

        let snapshot = self.registry.snapshot();
        let mut resolved = self.resolve(&snapshot, subqueries).await?;
        drop(snapshot);

        if resolved.is_empty() {
            return Ok(Aggregate::empty());
        }
        resolved.sort_by(|a, b| a.canonical.cmp(&b.canonical));

        let key = match Fingerprint::compute(
            &kind,
            resolved.iter().map(|r| (r.instance.as_ref(), &r.request)),
        ) {
            Ok(fp) => Some(self.cache.key(fp.instance_ids(), fp.digest())),
            Err(e) => {
                tracing::warn!(kind = %kind.name, error = %e, "Request cannot be fingerprinted, skipping cache");
                None
            }
        };

        if let Some(key) = &key {
            if let Some(aggregate) = self.cache.get::<Aggregate>(key).await {
                tracing::debug!(kind = %kind.name, key = %key, "Served from cache");
                return Ok(aggregate);
            }
        }

        let aggregate = self.fan_out(&kind, resolved).await?;

        if let Some(key) = &key {
            let cacheable = match kind.join {
                JoinPolicy::AllRequired => true,
                JoinPolicy::BestEffort { cache_partial } => !aggregate.partial || cache_partial,
            };
            if cacheable {
                self.cache.set(key, &aggregate, kind.ttl).await;
            } else {
                tracing::debug!(kind = %kind.name, absent = aggregate.absent_count(), "Partial aggregate not cached");
            }
        }

        Ok(aggregate)
    }

    async fn fan_out(&self, kind: &RequestKind, resolved: Vec<Resolved>) -> GatewayResult<Aggregate> {
        let scope = TaskScope::new(self.max_concurrent);
        let pending: Vec<Pending> = resolved
            .into_iter()
            .map(|r| {
                let proxy = CapabilityProxy::new(r.instance.clone(), self.subquery_timeout);
                Pending {
                    instance_id: r.instance.id().to_string(),
                    capability: r.request.capability(),
                    handle: self.spawn_subquery(&scope, proxy, r.request, kind.retry_on_timeout),
                }
            })
            .collect();

        tracing::debug!(kind = %kind.name, subqueries = pending.len(), "Dispatched sub-queries");
        join(pending, kind.join, self.join_timeout).await
    }

    async fn resolve(&self, snapshot: &RegistrySnapshot, subqueries: Vec<SubQuery>) -> GatewayResult<Vec<Resolved>> {
        let direct = subqueries
            .iter()
            .map(|sub| resolve_direct(snapshot, &sub.target))
            .collect::<GatewayResult<Vec<_>>>()?;

        let mut resolved = Vec::with_capacity(subqueries.len());
        for (sub, direct) in subqueries.into_iter().zip(direct) {
            let instance = match direct {
                Direct::Resolved(instance) => instance,
                Direct::Object(object_id) => self.locate(snapshot, object_id).await?,
            };
            let canonical = canonical_entry(&instance, &sub.request)
                .map_err(|e| GatewayError::Internal(format!("unserializable sub-query: {e}")))?;
            resolved.push(Resolved {
                instance,
                request: sub.request,
                canonical,
            });
        }
        Ok(resolved)
    }

    async fn locate(&self, snapshot: &RegistrySnapshot, object_id: String) -> GatewayResult<Arc<Instance>> {
        let locator = ObjectLocator {
            cache: &self.cache,
            lookup_timeout: self.subquery_timeout,
            wait_timeout: self.join_timeout,
            max_concurrent: self.max_concurrent,
        };
        let holders = locator.holders(snapshot, &object_id).await;
        match choose_best(holders) {
            Some(instance) => {
                tracing::debug!(object_id = %object_id, instance_id = %instance.id(), "Object located");
                Ok(instance)
            }
            None => Err(GatewayError::InstanceNotFound(object_id)),
        }
    }

    fn spawn_subquery(
        &self,
        scope: &TaskScope,
        proxy: CapabilityProxy,
        request: CapabilityRequest,
        retry_allowed: bool,
    ) -> TaskHandle<CapabilityResponse, BackendError> {
        let retry = self.retry.clone();
        let events_tx = self.events_tx.clone();
        scope.spawn(async move {
            let capability = request.capability();
            let mut retries = 0;
            loop {
                let result = proxy.call(request.clone()).await;
                match result {
                    Err(e) if retry.should_retry(&e, retries, retry_allowed) => {
                        retries += 1;
                        let delay = retry.delay(retries);
                        tracing::warn!(
                            instance_id = %proxy.instance().id(),
                            %capability,
                            ?delay,
                            "Sub-query timed out, retrying"
                        );
                        metrics::record_subquery(capability.as_str(), "retried");
                        tokio::time::sleep(delay).await;
                    }
                    other => {
                        metrics::record_subquery(capability.as_str(), subquery_outcome(&other));
                        if let (Ok(_), Some(tx)) = (&other, &events_tx) {
                            report_publication(proxy.instance(), tx);
                        }
                        return other;
                    }
                }
            }
        })
    }
}

fn resolve_direct(snapshot: &RegistrySnapshot, target: &Target) -> GatewayResult<Direct> {
    match target {
        Target::Instance(id) => snapshot
            .get(id)
            .cloned()
            .map(Direct::Resolved)
            .ok_or_else(|| GatewayError::InstanceNotFound(id.clone())),
        Target::Coord(coord) => covering(snapshot, *coord).map(Direct::Resolved),
        Target::Object(object_id) => match object_coord(object_id) {
            Some(coord) => covering(snapshot, coord).map(Direct::Resolved),
            None => Ok(Direct::Object(object_id.clone())),
        },
    }
}

fn covering(snapshot: &RegistrySnapshot, coord: Coord) -> GatewayResult<Arc<Instance>> {
    snapshot
        .best_covering(coord.lon, coord.lat)
        .ok_or(GatewayError::NoCoverage {
            lon: coord.lon,
            lat: coord.lat,
        })
}

/// Emit a data reload when the engine answered from data other than the
/// data the instance was stamped with.
fn report_publication(instance: &Instance, events_tx: &mpsc::UnboundedSender<InstanceEvent>) {
    let Some(observed) = instance.backend().observed_publication_date() else {
        return;
    };
    if instance.publication_date() == Some(observed) {
        return;
    }
    tracing::info!(
        instance_id = %instance.id(),
        previous = ?instance.publication_date(),
        current = observed,
        "Engine answered from new data"
    );
    let event = InstanceEvent::DataReloaded {
        instance_id: instance.id().to_string(),
        publication_date: observed,
    };
    if events_tx.send(event).is_err() {
        tracing::debug!("Invalidation listener is gone, dropping data reload event");
    }
}

fn subquery_outcome(result: &Result<CapabilityResponse, BackendError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(BackendError::Timeout(_)) => "timeout",
        Err(BackendError::CircuitOpen(_)) => "circuit_open",
        Err(BackendError::FeatureDisabled { .. }) => "feature_disabled",
        Err(_) => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::capability::{BackendCall, CapabilityBackend, InstanceMetadata};
    use crate::config::{BoundingBox, CacheConfig, InstanceConfig};
    use crate::instance::model::tests::config;
    use crate::resilience::CircuitBreaker;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers metadata after `delay`; times out when the delay is longer
    /// than the sub-query deadline.
    #[derive(Debug)]
    struct Engine {
        delay: Duration,
        calls: AtomicUsize,
        published: Option<i64>,
    }

    #[async_trait]
    impl CapabilityBackend for Engine {
        async fn call(&self, call: BackendCall) -> Result<CapabilityResponse, BackendError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(CapabilityResponse::Metadata(InstanceMetadata {
                publication_date: n as i64,
                timezone: call.instance_id,
                status: "running".into(),
            }))
        }

        fn observed_publication_date(&self) -> Option<i64> {
            self.published
        }
    }

    fn add(registry: &InstanceRegistry, cfg: InstanceConfig, delay: Duration) -> Arc<Engine> {
        add_engine(registry, cfg, Engine { delay, calls: AtomicUsize::new(0), published: None })
    }

    fn add_engine(registry: &InstanceRegistry, cfg: InstanceConfig, engine: Engine) -> Arc<Engine> {
        let engine = Arc::new(engine);
        let breaker = Arc::new(CircuitBreaker::new(cfg.id.clone(), 100, Duration::from_secs(60)));
        let id = cfg.id.clone();
        registry.replace(&id, Arc::new(Instance::new(cfg, engine.clone(), breaker)));
        engine
    }

    fn orchestrator(registry: Arc<InstanceRegistry>, retry: RetryPolicy) -> Orchestrator {
        let cache = Arc::new(ObjectCache::new(Arc::new(MemoryStore::new()), &CacheConfig::default()));
        let config = OrchestratorConfig {
            subquery_timeout_ms: 100,
            join_timeout_ms: 1_000,
            max_concurrent_subqueries: 4,
        };
        Orchestrator::new(registry, cache, &config, retry)
    }

    fn metadata_on(id: &str) -> SubQuery {
        SubQuery::on(id, CapabilityRequest::Metadata)
    }

    #[tokio::test(start_paused = true)]
    async fn test_coordinate_targets_use_best_instance() {
        let registry = Arc::new(InstanceRegistry::new());
        let bbox = BoundingBox { min_lon: 2.0, min_lat: 48.0, max_lon: 3.0, max_lat: 49.0 };
        let mut free = config("open");
        free.is_free = true;
        free.coverage = Some(bbox);
        let mut paid = config("paid");
        paid.coverage = Some(bbox);
        let open_engine = add(&registry, free, Duration::from_millis(1));
        let paid_engine = add(&registry, paid, Duration::from_millis(1));

        let orch = orchestrator(registry, RetryPolicy::disabled());
        let request = FanOutRequest::new(RequestKind::coverage_status())
            .with(SubQuery::at(2.5, 48.5, CapabilityRequest::Metadata));
        let aggregate = orch.execute(request).await.unwrap();

        assert_eq!(aggregate.results[0].instance_id, "paid");
        assert_eq!(paid_engine.calls.load(Ordering::SeqCst), 1);
        assert_eq!(open_engine.calls.load(Ordering::SeqCst), 0);

        let uncovered = FanOutRequest::new(RequestKind::coverage_status())
            .with(SubQuery::at(-70.0, 10.0, CapabilityRequest::Metadata));
        assert!(matches!(
            orch.execute(uncovered).await,
            Err(GatewayError::NoCoverage { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_retried_once_when_kind_allows() {
        let registry = Arc::new(InstanceRegistry::new());
        let engine = add(&registry, config("slow"), Duration::from_secs(5));
        let orch = orchestrator(registry, RetryPolicy::default());

        let retrying = FanOutRequest::new(RequestKind::journeys()).with(metadata_on("slow"));
        let err = orch.execute(retrying).await.unwrap_err();
        assert!(matches!(err, GatewayError::Timeout { .. }));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 2);

        let realtime = FanOutRequest::new(RequestKind::stops_nearby()).with(metadata_on("slow"));
        assert!(orch.execute(realtime).await.unwrap_err().is_timeout());
        assert_eq!(engine.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_aggregate_cached_only_when_marked() {
        let registry = Arc::new(InstanceRegistry::new());
        let fast = add(&registry, config("fast"), Duration::from_millis(1));
        add(&registry, config("slow"), Duration::from_secs(5));
        let orch = orchestrator(registry, RetryPolicy::disabled());

        let request = |kind: RequestKind| {
            FanOutRequest::new(kind)
                .with(metadata_on("fast"))
                .with(metadata_on("slow"))
        };

        for _ in 0..2 {
            let aggregate = orch.execute(request(RequestKind::places())).await.unwrap();
            assert!(aggregate.partial);
        }
        assert_eq!(fast.calls.load(Ordering::SeqCst), 2);

        for _ in 0..2 {
            orch.execute(request(RequestKind::coverage_status())).await.unwrap();
        }
        assert_eq!(fast.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_publication_date_in_answer_is_reported() {
        let registry = Arc::new(InstanceRegistry::new());
        let engine = Engine {
            delay: Duration::from_millis(1),
            calls: AtomicUsize::new(0),
            published: Some(42),
        };
        add_engine(&registry, config("fr-idf"), engine);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let orch = orchestrator(registry.clone(), RetryPolicy::disabled()).with_events(tx);

        let request = FanOutRequest::new(RequestKind::coverage_status()).with(metadata_on("fr-idf"));
        orch.execute(request.clone()).await.unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            InstanceEvent::DataReloaded { instance_id: "fr-idf".into(), publication_date: 42 }
        );

        // Once stamped, the same date is not news
        let stamped = registry.lookup("fr-idf").unwrap().with_publication_date(42);
        registry.replace("fr-idf", Arc::new(stamped));
        orch.execute(request).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_request_touches_nothing() {
        let orch = orchestrator(Arc::new(InstanceRegistry::new()), RetryPolicy::disabled());
        let aggregate = orch.execute(FanOutRequest::new(RequestKind::journeys())).await.unwrap();
        assert_eq!(aggregate, Aggregate::empty());
    }
}
