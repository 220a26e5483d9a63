//! Instance registry.
//!
//! # Responsibilities
//! - Map instance ids to live [`Instance`]s
//! - Swap single entries atomically on reload and removal
//! - Answer coverage queries (which instance serves this point)
//!
//! # Design Decisions
//! - The whole map is an immutable [`RegistrySnapshot`] behind an `ArcSwap`;
//!   readers never block and never observe a half-applied update
//! - Writers go through `rcu`, so concurrent replace/remove calls on
//!   different ids do not lose each other's updates
//! - Requests resolve all their instances from one snapshot

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use super::model::Instance;
use crate::observability::metrics;

/// Immutable view of the registry at one point in time.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    instances: HashMap<String, Arc<Instance>>,
    version: u64,
}

impl RegistrySnapshot {
    pub fn get(&self, id: &str) -> Option<&Arc<Instance>> {
        self.instances.get(id)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Incremented by every applied update.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Instance ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.instances.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Instance>> {
        self.instances.values()
    }

    /// Every instance whose coverage contains the point.
    pub fn covering(&self, lon: f64, lat: f64) -> Vec<Arc<Instance>> {
        self.instances
            .values()
            .filter(|i| i.covers(lon, lat))
            .cloned()
            .collect()
    }

    /// Best instance covering the point, see [`choose_best`].
    pub fn best_covering(&self, lon: f64, lat: f64) -> Option<Arc<Instance>> {
        choose_best(self.covering(lon, lat))
    }
}

/// Pick the preferred instance among candidates covering the same point:
/// non-free before free, then higher priority, then smallest id.
pub fn choose_best<I>(candidates: I) -> Option<Arc<Instance>>
where
    I: IntoIterator<Item = Arc<Instance>>,
{
    candidates.into_iter().min_by(|a, b| {
        a.is_free()
            .cmp(&b.is_free())
            .then_with(|| b.priority().cmp(&a.priority()))
            .then_with(|| a.id().cmp(b.id()))
    })
}

/// Concurrent map of instance id to current [`Instance`].
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    current: ArcSwap<RegistrySnapshot>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-filled with `instances`. Later duplicates win.
    pub fn with_instances<I>(instances: I) -> Self
    where
        I: IntoIterator<Item = Instance>,
    {
        let registry = Self::new();
        registry.load_all(instances);
        registry
    }

    /// Current snapshot. Hold it for the duration of one request.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.load_full()
    }

    /// Current instance for `id`.
    pub fn lookup(&self, id: &str) -> Option<Arc<Instance>> {
        self.current.load().get(id).cloned()
    }

    /// Best instance covering a coordinate.
    pub fn lookup_by_coord(&self, lon: f64, lat: f64) -> Option<Arc<Instance>> {
        self.current.load().best_covering(lon, lat)
    }

    pub fn len(&self) -> usize {
        self.current.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.load().is_empty()
    }

    /// Insert or replace the entry for `id`. Returns the previous instance.
    pub fn replace(&self, id: &str, instance: Arc<Instance>) -> Option<Arc<Instance>> {
        let previous = self.current.rcu(|snapshot| {
            let mut next = RegistrySnapshot::clone(snapshot);
            next.instances.insert(id.to_string(), instance.clone());
            next.version += 1;
            next
        });
        self.record_size();
        previous.get(id).cloned()
    }

    /// Remove the entry for `id`. Returns the removed instance; removing an
    /// unknown id leaves the registry untouched.
    pub fn remove(&self, id: &str) -> Option<Arc<Instance>> {
        if self.current.load().get(id).is_none() {
            return None;
        }
        let previous = self.current.rcu(|snapshot| {
            let mut next = RegistrySnapshot::clone(snapshot);
            if next.instances.remove(id).is_some() {
                next.version += 1;
            }
            next
        });
        self.record_size();
        previous.get(id).cloned()
    }

    /// Insert every instance in a single update.
    pub fn load_all<I>(&self, instances: I)
    where
        I: IntoIterator<Item = Instance>,
    {
        let batch: Vec<Arc<Instance>> = instances.into_iter().map(Arc::new).collect();
        self.current.rcu(|snapshot| {
            let mut next = RegistrySnapshot::clone(snapshot);
            for instance in &batch {
                next.instances.insert(instance.id().to_string(), instance.clone());
            }
            next.version += 1;
            next
        });
        self.record_size();
    }

    fn record_size(&self) {
        metrics::set_registry_instances(self.current.load().len());
    }
}
