//! Gateway assembly.
//!
//! Builds every shared component from a [`GatewayConfig`] in dependency
//! order and spawns the background consumers that keep the registry and
//! the cache in step with instance lifecycle events.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::Shutdown;
use crate::cache::ObjectCache;
use crate::capability::{BackendConnector, HttpConnector};
use crate::config::{load_instances_dir, ConfigError, GatewayConfig, InstanceDirWatcher};
use crate::events::{InstanceEvent, InvalidationListener, MetadataPoller, RedisEventSource};
use crate::instance::{InstanceFactory, InstanceRegistry};
use crate::orchestrator::{Orchestrator, OrchestratorService, StatsLayer, StatsService};
use crate::resilience::RetryPolicy;

/// Running gateway components.
pub struct Gateway {
    config: GatewayConfig,
    registry: Arc<InstanceRegistry>,
    cache: Arc<ObjectCache>,
    orchestrator: Arc<Orchestrator>,
    factory: InstanceFactory,
    events_tx: mpsc::UnboundedSender<InstanceEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<InstanceEvent>>>,
    shutdown: Shutdown,
}

impl Gateway {
    /// Build the gateway with HTTP capability backends.
    pub async fn build(config: GatewayConfig) -> Result<Self, ConfigError> {
        Self::build_with(config, Arc::new(HttpConnector::default())).await
    }

    /// Build the gateway with a custom backend connector.
    pub async fn build_with(
        config: GatewayConfig,
        connector: Arc<dyn BackendConnector>,
    ) -> Result<Self, ConfigError> {
        let factory = InstanceFactory::new(connector, config.circuit_breaker.clone());
        let registry = Arc::new(InstanceRegistry::new());

        let dir = Path::new(&config.registry.instances_dir);
        let loaded = load_instances_dir(dir, &config.registry.instance_file_extension)?;
        let instances = loaded.into_iter().filter_map(|(path, cfg)| {
            let id = cfg.id.clone();
            match factory.build(cfg) {
                Ok(instance) => Some(instance),
                Err(e) => {
                    tracing::error!(path = %path.display(), instance_id = %id, error = %e, "Skipping instance");
                    None
                }
            }
        });
        registry.load_all(instances);
        tracing::info!(instances = registry.len(), dir = %dir.display(), "Instance registry loaded");

        // Engines reporting new data feed the same listener as the sources.
        let (events_tx, events_rx) = mpsc::unbounded_channel::<InstanceEvent>();

        let cache = Arc::new(ObjectCache::from_config(&config.cache).await);
        let orchestrator = Arc::new(
            Orchestrator::new(
                registry.clone(),
                cache.clone(),
                &config.orchestrator,
                RetryPolicy::from_config(&config.retries),
            )
            .with_events(events_tx.clone()),
        );

        Ok(Self {
            config,
            registry,
            cache,
            orchestrator,
            factory,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            shutdown: Shutdown::new(),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<ObjectCache> {
        &self.cache
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Orchestrator wrapped in the request stats middleware.
    pub fn service(&self) -> StatsService<OrchestratorService> {
        tower::ServiceBuilder::new()
            .layer(StatsLayer)
            .service(OrchestratorService::new(self.orchestrator.clone()))
    }

    /// Spawn the invalidation listener and every configured event source.
    ///
    /// The listener is spawned by the first call only.
    pub fn spawn_background(&self) -> Background {
        let tx = self.events_tx.clone();
        let mut tasks = Vec::new();

        match self.events_rx.lock().ok().and_then(|mut rx| rx.take()) {
            Some(rx) => {
                let listener =
                    InvalidationListener::new(self.registry.clone(), self.cache.clone(), self.factory.clone());
                tasks.push(tokio::spawn(listener.run(rx, self.shutdown.subscribe())));
            }
            None => tracing::error!("Invalidation listener already running, events go to the first one"),
        }

        if self.config.cache.sweep_interval_secs > 0 {
            let interval = Duration::from_secs(self.config.cache.sweep_interval_secs);
            tasks.push(tokio::spawn(self.cache.clone().run_sweeper(interval, self.shutdown.subscribe())));
        }

        let events = &self.config.events;
        if !events.redis_channel.is_empty() {
            let url = events.redis_url.as_deref().unwrap_or(&self.config.cache.redis_url);
            match RedisEventSource::new(url, events.redis_channel.clone(), tx.clone()) {
                Ok(source) => tasks.push(tokio::spawn(source.run(self.shutdown.subscribe()))),
                Err(e) => tracing::error!(error = %e, "Invalid event channel URL, subscriber disabled"),
            }
        }

        if events.metadata_poll_interval_secs > 0 {
            let poller = MetadataPoller::new(
                self.registry.clone(),
                Duration::from_secs(events.metadata_poll_interval_secs),
                Duration::from_millis(events.metadata_timeout_ms),
                tx.clone(),
            );
            tasks.push(tokio::spawn(poller.run(self.shutdown.subscribe())));
        }

        let watcher = if self.config.registry.watch {
            self.start_watcher(tx)
        } else {
            None
        };

        Background {
            tasks,
            _watcher: watcher,
        }
    }

    fn start_watcher(&self, tx: mpsc::UnboundedSender<InstanceEvent>) -> Option<notify::RecommendedWatcher> {
        let dir = Path::new(&self.config.registry.instances_dir);
        let watcher = InstanceDirWatcher::new(dir, self.config.registry.instance_file_extension.clone(), tx);

        // Deletions can only be mapped back to an id for files seen before.
        if let Ok(loaded) = load_instances_dir(dir, &self.config.registry.instance_file_extension) {
            for (path, cfg) in &loaded {
                watcher.track(path, &cfg.id);
            }
        }

        match watcher.run() {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                tracing::error!(error = %e, "Failed to start instances watcher, hot reload disabled");
                None
            }
        }
    }
}

/// Handles of the spawned background work.
pub struct Background {
    tasks: Vec<JoinHandle<()>>,
    _watcher: Option<notify::RecommendedWatcher>,
}

impl Background {
    /// Wait for every background task to leave its loop.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Background task ended abnormally");
            }
        }
    }
}
