//! Invalidation listener.
//!
//! # Responsibilities
//! - Apply instance lifecycle events to the registry
//! - Purge cache entries that depend on a changed instance
//!
//! # Design Decisions
//! - The registry is updated before the cache is evicted. A request that
//!   resolved the stale instance computes a key containing the stale
//!   revision, which no request resolving the new instance will read
//! - Handlers are idempotent: a duplicate event repeats a swap to an equal
//!   instance and an eviction of nothing
//! - A rejected reload keeps the stale instance and keeps its cache entries

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use super::types::InstanceEvent;
use crate::cache::ObjectCache;
use crate::config::InstanceConfig;
use crate::instance::{InstanceFactory, InstanceRegistry};
use crate::observability::metrics;

/// What handling an event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// A new instance value is live and its cache entries are gone.
    Swapped,
    /// The instance was removed and its cache entries are gone.
    Removed,
    /// Nothing live changed: the instance is unknown, in which case only the
    /// cache was purged, or its data is already current.
    Ignored,
    /// The new configuration was rejected; the stale instance stays live.
    Rejected,
}

/// Consumes [`InstanceEvent`]s.
#[derive(Debug, Clone)]
pub struct InvalidationListener {
    registry: Arc<InstanceRegistry>,
    cache: Arc<ObjectCache>,
    factory: InstanceFactory,
}

impl InvalidationListener {
    pub fn new(registry: Arc<InstanceRegistry>, cache: Arc<ObjectCache>, factory: InstanceFactory) -> Self {
        Self {
            registry,
            cache,
            factory,
        }
    }

    pub async fn handle(&self, event: InstanceEvent) -> Applied {
        let label = event.label();
        let applied = match event {
            InstanceEvent::Reloaded { instance_id, config } => self.reloaded(instance_id, config).await,
            InstanceEvent::Removed { instance_id } => self.removed(&instance_id).await,
            InstanceEvent::DataReloaded {
                instance_id,
                publication_date,
            } => self.data_reloaded(&instance_id, publication_date).await,
        };
        if applied != Applied::Rejected {
            metrics::record_registry_event(label);
        }
        applied
    }

    async fn reloaded(&self, instance_id: String, config: InstanceConfig) -> Applied {
        if config.id != instance_id {
            tracing::error!(
                instance_id = %instance_id,
                config_id = %config.id,
                "Reload event does not match its configuration, ignoring"
            );
            return Applied::Rejected;
        }

        // Same engine, same data: the publication date stamped by an earlier
        // data reload still holds.
        let carried_date = self
            .registry
            .lookup(&instance_id)
            .filter(|current| current.config().backend == config.backend)
            .and_then(|current| current.publication_date());

        let instance = match self.factory.build(config) {
            Ok(instance) => match carried_date {
                Some(date) => Arc::new(instance.with_publication_date(date)),
                None => Arc::new(instance),
            },
            Err(e) => {
                tracing::error!(
                    instance_id = %instance_id,
                    error = %e,
                    "Failed to build reloaded instance. Keeping current configuration."
                );
                return Applied::Rejected;
            }
        };

        let previous = self.registry.replace(&instance_id, instance.clone());
        let removed = self.cache.evict_instance(&instance_id).await;

        match previous {
            Some(prev) if prev.revision() == instance.revision() => {
                tracing::info!(instance_id = %instance_id, removed, "Instance reloaded with identical configuration");
            }
            Some(prev) => {
                tracing::info!(
                    instance_id = %instance_id,
                    from = %prev.revision(),
                    to = %instance.revision(),
                    removed,
                    "Instance reloaded"
                );
            }
            None => {
                tracing::info!(instance_id = %instance_id, revision = %instance.revision(), "Instance added");
            }
        }
        Applied::Swapped
    }

    async fn removed(&self, instance_id: &str) -> Applied {
        let previous = self.registry.remove(instance_id);
        let removed = self.cache.evict_instance(instance_id).await;
        if previous.is_some() {
            tracing::info!(instance_id = %instance_id, removed, "Instance removed");
            Applied::Removed
        } else {
            tracing::debug!(instance_id = %instance_id, "Removal of unknown instance");
            Applied::Ignored
        }
    }

    async fn data_reloaded(&self, instance_id: &str, publication_date: i64) -> Applied {
        let Some(current) = self.registry.lookup(instance_id) else {
            tracing::debug!(instance_id = %instance_id, "Data reload for unknown instance");
            return Applied::Ignored;
        };
        if current.publication_date() == Some(publication_date) {
            tracing::debug!(instance_id = %instance_id, publication_date, "Data already current");
            return Applied::Ignored;
        }

        let stamped = Arc::new(current.with_publication_date(publication_date));
        self.registry.replace(instance_id, stamped);
        let removed = self.cache.evict_instance(instance_id).await;
        tracing::info!(
            instance_id = %instance_id,
            publication_date,
            removed,
            "Instance data reloaded"
        );
        Applied::Swapped
    }

    /// Consume events until the channel closes or shutdown is signalled.
    pub async fn run(
        self,
        mut events: mpsc::UnboundedReceiver<InstanceEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        tracing::info!("Invalidation listener started");
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        tracing::debug!(instance_id = %event.instance_id(), event = event.label(), "Instance event received");
                        self.handle(event).await;
                    }
                    None => break,
                },
                _ = shutdown.recv() => break,
            }
        }
        tracing::info!("Invalidation listener stopped");
    }
}
