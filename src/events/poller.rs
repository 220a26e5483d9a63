//! Publication-date poller.
//!
//! Engines reload their data without a configuration change. The poller
//! asks every instance for its metadata at a fixed interval and emits
//! [`InstanceEvent::DataReloaded`] when the publication date differs from
//! the one the registry holds, including the first time it is observed.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::{broadcast, mpsc};

use super::types::InstanceEvent;
use crate::capability::CapabilityProxy;
use crate::instance::{Instance, InstanceRegistry};

pub struct MetadataPoller {
    registry: Arc<InstanceRegistry>,
    interval: Duration,
    timeout: Duration,
    events_tx: mpsc::UnboundedSender<InstanceEvent>,
}

impl MetadataPoller {
    pub fn new(
        registry: Arc<InstanceRegistry>,
        interval: Duration,
        timeout: Duration,
        events_tx: mpsc::UnboundedSender<InstanceEvent>,
    ) -> Self {
        Self {
            registry,
            interval,
            timeout,
            events_tx,
        }
    }

    /// Poll every instance once. Returns the number of events emitted.
    pub async fn poll_once(&self) -> usize {
        let snapshot = self.registry.snapshot();
        let checks = snapshot.iter().map(|instance| self.check(instance.clone()));
        let events: Vec<InstanceEvent> = join_all(checks).await.into_iter().flatten().collect();

        let emitted = events.len();
        for event in events {
            if self.events_tx.send(event).is_err() {
                tracing::debug!("Invalidation listener is gone, dropping data reload event");
            }
        }
        emitted
    }

    async fn check(&self, instance: Arc<Instance>) -> Option<InstanceEvent> {
        let proxy = CapabilityProxy::new(instance.clone(), self.timeout);
        let metadata = match proxy.metadata().await {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::debug!(instance_id = %instance.id(), error = %e, "Metadata poll failed");
                return None;
            }
        };

        if instance.publication_date() == Some(metadata.publication_date) {
            return None;
        }
        tracing::info!(
            instance_id = %instance.id(),
            previous = ?instance.publication_date(),
            current = metadata.publication_date,
            "Instance publication date changed"
        );
        Some(InstanceEvent::DataReloaded {
            instance_id: instance.id().to_string(),
            publication_date: metadata.publication_date,
        })
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(interval = ?self.interval, "Metadata poller started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
                _ = shutdown.recv() => break,
            }
        }
        tracing::info!("Metadata poller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{BackendCall, BackendError, CapabilityBackend, CapabilityResponse, InstanceMetadata};
    use crate::instance::model::tests::{config, instance};
    use crate::resilience::CircuitBreaker;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicI64, Ordering};

    #[derive(Debug)]
    struct Engine {
        publication_date: AtomicI64,
    }

    #[async_trait]
    impl CapabilityBackend for Engine {
        async fn call(&self, _call: BackendCall) -> Result<CapabilityResponse, BackendError> {
            Ok(CapabilityResponse::Metadata(InstanceMetadata {
                publication_date: self.publication_date.load(Ordering::SeqCst),
                timezone: "Europe/Paris".into(),
                status: "running".into(),
            }))
        }
    }

    #[tokio::test]
    async fn test_emits_on_first_observation_and_change() {
        let engine = Arc::new(Engine { publication_date: AtomicI64::new(100) });
        let breaker = Arc::new(CircuitBreaker::new("fr-idf", 4, Duration::from_secs(60)));
        let live = Instance::new(config("fr-idf"), engine.clone(), breaker);
        let registry = Arc::new(InstanceRegistry::new());
        registry.replace("fr-idf", Arc::new(live));
        // Unreachable engines are skipped
        registry.replace("de-bw", Arc::new(instance(config("de-bw"))));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let poller = MetadataPoller::new(registry.clone(), Duration::from_secs(10), Duration::from_secs(1), tx);

        assert_eq!(poller.poll_once().await, 1);
        assert_eq!(
            rx.try_recv().unwrap(),
            InstanceEvent::DataReloaded { instance_id: "fr-idf".into(), publication_date: 100 }
        );

        let current = registry.lookup("fr-idf").unwrap();
        registry.replace("fr-idf", Arc::new(current.with_publication_date(100)));
        assert_eq!(poller.poll_once().await, 0);

        engine.publication_date.store(200, Ordering::SeqCst);
        assert_eq!(poller.poll_once().await, 1);
        assert!(matches!(
            rx.try_recv().unwrap(),
            InstanceEvent::DataReloaded { publication_date: 200, .. }
        ));
    }
}
