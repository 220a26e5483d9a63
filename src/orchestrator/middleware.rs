//! Tower integration for the orchestrator.
//!
//! # Responsibilities
//! - Expose [`Orchestrator`] as a `tower::Service<FanOutRequest>`
//! - Tag every request with a request ID span
//! - Record request count and latency per kind and outcome
//!
//! # Design Decisions
//! - The orchestrator has no backpressure of its own; `poll_ready` is
//!   always ready and concurrency is bounded per request by its scope
//! - Request ID added as early as possible so sub-query logs carry it

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use tower::{Layer, Service};
use tracing::Instrument;
use uuid::Uuid;

use super::engine::Orchestrator;
use super::error::GatewayError;
use super::join::Aggregate;
use super::request::FanOutRequest;
use crate::observability::metrics;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// [`Orchestrator`] behind the `Service` trait.
#[derive(Debug, Clone)]
pub struct OrchestratorService {
    inner: Arc<Orchestrator>,
}

impl OrchestratorService {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { inner: orchestrator }
    }
}

impl Service<FanOutRequest> for OrchestratorService {
    type Response = Aggregate;
    type Error = GatewayError;
    type Future = BoxFuture<Result<Aggregate, GatewayError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: FanOutRequest) -> Self::Future {
        let orchestrator = self.inner.clone();
        Box::pin(async move { orchestrator.execute(request).await })
    }
}

/// Layer adding a request span and request metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsLayer;

impl<S> Layer<S> for StatsLayer {
    type Service = StatsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        StatsService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct StatsService<S> {
    inner: S,
}

impl<S> Service<FanOutRequest> for StatsService<S>
where
    S: Service<FanOutRequest, Response = Aggregate, Error = GatewayError>,
    S::Future: Send + 'static,
{
    type Response = Aggregate;
    type Error = GatewayError;
    type Future = BoxFuture<Result<Aggregate, GatewayError>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: FanOutRequest) -> Self::Future {
        let kind = request.kind.name.clone();
        let span = tracing::info_span!(
            "fanout",
            request_id = %Uuid::new_v4(),
            kind = %kind,
            subqueries = request.subqueries.len()
        );
        let start = Instant::now();
        let future = span.in_scope(|| self.inner.call(request));

        Box::pin(
            async move {
                let result = future.await;
                let outcome = match &result {
                    Ok(aggregate) if aggregate.partial => "partial",
                    Ok(_) => "ok",
                    Err(e) => e.label(),
                };
                metrics::record_request(&kind, outcome, start);
                if let Err(e) = &result {
                    tracing::warn!(error = %e, "Fan-out request failed");
                }
                result
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryStore, ObjectCache};
    use crate::capability::CapabilityRequest;
    use crate::config::{CacheConfig, OrchestratorConfig};
    use crate::instance::model::tests::{config, instance};
    use crate::instance::InstanceRegistry;
    use crate::orchestrator::request::{RequestKind, SubQuery};
    use crate::resilience::RetryPolicy;
    use tower::{ServiceBuilder, ServiceExt};

    fn service() -> StatsService<OrchestratorService> {
        let registry = Arc::new(InstanceRegistry::new());
        registry.replace("fr-idf", Arc::new(instance(config("fr-idf"))));
        let cache = Arc::new(ObjectCache::new(Arc::new(MemoryStore::new()), &CacheConfig::default()));
        let orchestrator = Orchestrator::new(
            registry,
            cache,
            &OrchestratorConfig::default(),
            RetryPolicy::disabled(),
        );
        ServiceBuilder::new()
            .layer(StatsLayer)
            .service(OrchestratorService::new(Arc::new(orchestrator)))
    }

    #[tokio::test]
    async fn test_unknown_instance_through_stack() {
        let request = FanOutRequest::new(RequestKind::journeys())
            .with(SubQuery::on("de-bw", CapabilityRequest::Metadata));
        let err = service().oneshot(request).await.unwrap_err();
        assert_eq!(err, GatewayError::InstanceNotFound("de-bw".into()));
    }

    #[tokio::test]
    async fn test_empty_request_through_stack() {
        let request = FanOutRequest::new(RequestKind::places());
        let aggregate = service().oneshot(request).await.unwrap();
        assert!(aggregate.results.is_empty());
    }
}
