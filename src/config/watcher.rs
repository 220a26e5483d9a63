//! Instances directory watcher for hot reload.
//!
//! Turns filesystem changes in the instances directory into instance
//! lifecycle events on the same channel the invalidation listener consumes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::{is_instance_file, load_instance_file};
use crate::events::InstanceEvent;

/// A watcher that monitors the instances directory.
pub struct InstanceDirWatcher {
    dir: PathBuf,
    tracker: FileTracker,
}

/// Remembers which instance each file defines, so that a deletion (where the
/// file can no longer be read) can still be mapped to an instance id.
#[derive(Clone)]
struct FileTracker {
    extension: String,
    known: Arc<DashMap<PathBuf, String>>,
    events_tx: mpsc::UnboundedSender<InstanceEvent>,
}

impl InstanceDirWatcher {
    pub fn new(
        dir: &Path,
        extension: impl Into<String>,
        events_tx: mpsc::UnboundedSender<InstanceEvent>,
    ) -> Self {
        Self {
            dir: dir.to_path_buf(),
            tracker: FileTracker {
                extension: extension.into(),
                known: Arc::new(DashMap::new()),
                events_tx,
            },
        }
    }

    /// Record a file loaded at startup.
    pub fn track(&self, path: &Path, instance_id: &str) {
        self.tracker
            .known
            .insert(path.to_path_buf(), instance_id.to_string());
    }

    /// Start watching the directory in a background thread.
    ///
    /// The returned watcher must be kept alive for events to keep flowing.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tracker = self.tracker.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => tracker.handle(&event),
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.dir, RecursiveMode::NonRecursive)?;

        tracing::info!(dir = ?self.dir, "Instances watcher started");
        Ok(watcher)
    }
}

impl FileTracker {
    fn handle(&self, event: &Event) {
        for path in &event.paths {
            if !is_instance_file(path, &self.extension) {
                continue;
            }

            if event.kind.is_remove() || !path.exists() {
                self.file_gone(path);
            } else if event.kind.is_modify() || event.kind.is_create() {
                self.file_changed(path);
            }
        }
    }

    fn file_gone(&self, path: &Path) {
        let Some((_, instance_id)) = self.known.remove(path) else {
            return;
        };
        tracing::info!(path = %path.display(), instance_id = %instance_id, "Instance file removed");
        self.send(InstanceEvent::Removed { instance_id });
    }

    fn file_changed(&self, path: &Path) {
        tracing::info!(path = %path.display(), "Instance file change detected, reloading...");
        match load_instance_file(path) {
            Ok(config) => {
                let previous = self.known.insert(path.to_path_buf(), config.id.clone());
                // The file now defines another instance: retire the old one.
                if let Some(old_id) = previous.filter(|old| *old != config.id) {
                    self.send(InstanceEvent::Removed { instance_id: old_id });
                }
                self.send(InstanceEvent::Reloaded {
                    instance_id: config.id.clone(),
                    config,
                });
            }
            Err(e) => {
                tracing::error!(
                    path = %path.display(),
                    error = %e,
                    "Failed to reload instance. Keeping current configuration."
                );
            }
        }
    }

    fn send(&self, event: InstanceEvent) {
        if self.events_tx.send(event).is_err() {
            tracing::warn!("Invalidation listener is gone, dropping instance event");
        }
    }
}
