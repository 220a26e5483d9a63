//! Object id resolution.
//!
//! A sub-query may target a transport object (stop area, line, address...)
//! instead of an instance. Coordinate ids (`lon;lat` and `coord:lon:lat`)
//! resolve through coverage. Any other id is looked up on every instance of
//! the snapshot; the set of instances holding it is cached under a key that
//! depends on every instance, so any reload or data publication evicts it.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::cache::{Cacheable, ObjectCache, TtlClass};
use crate::capability::{CapabilityProxy, Coord, ObjectQuery};
use crate::instance::{Instance, RegistrySnapshot};
use crate::task::TaskScope;

/// Instances known to hold an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectLocation {
    pub instance_ids: Vec<String>,
}

impl Cacheable for ObjectLocation {
    const SCHEMA: &'static str = "object_location";
    const VERSION: u32 = 1;
}

/// Coordinate named by an object id, if it is one.
pub fn object_coord(object_id: &str) -> Option<Coord> {
    let (lon, lat) = match object_id.strip_prefix("coord:") {
        Some(rest) => rest.split_once(':')?,
        None => object_id.split_once(';')?,
    };
    let lon = lon.trim().parse().ok()?;
    let lat = lat.trim().parse().ok()?;
    Some(Coord { lon, lat })
}

/// Finds which instances hold an object.
#[derive(Debug)]
pub(crate) struct ObjectLocator<'a> {
    pub cache: &'a ObjectCache,
    pub lookup_timeout: Duration,
    pub wait_timeout: Duration,
    pub max_concurrent: usize,
}

impl ObjectLocator<'_> {
    /// Instances of `snapshot` holding `object_id`, possibly empty.
    pub async fn holders(&self, snapshot: &RegistrySnapshot, object_id: &str) -> Vec<Arc<Instance>> {
        if snapshot.is_empty() {
            return Vec::new();
        }
        let ids = snapshot.ids();
        let key = self.cache.key(ids.iter().map(String::as_str), &location_digest(snapshot, &ids, object_id));

        if let Some(location) = self.cache.get::<ObjectLocation>(&key).await {
            return location
                .instance_ids
                .iter()
                .filter_map(|id| snapshot.get(id).cloned())
                .collect();
        }

        let scope = TaskScope::new(self.max_concurrent);
        let lookups: Vec<_> = ids
            .iter()
            .filter_map(|id| snapshot.get(id).cloned())
            .map(|instance| {
                let proxy = CapabilityProxy::new(instance.clone(), self.lookup_timeout);
                let handle = proxy.lookup_object(&scope, ObjectQuery { id: object_id.to_string() });
                (instance, handle)
            })
            .collect();

        let answers = join_all(lookups.iter().map(|(_, handle)| handle.wait_timeout(self.wait_timeout))).await;

        let mut complete = true;
        let mut holders = Vec::new();
        for ((instance, _), answer) in lookups.iter().zip(answers) {
            match answer {
                Some(Ok(places)) if !places.is_empty() => holders.push(instance.clone()),
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(instance_id = %instance.id(), object_id, error = %e, "Object lookup failed");
                    complete = false;
                }
                None => {
                    tracing::debug!(instance_id = %instance.id(), object_id, "Object lookup timed out");
                    complete = false;
                }
            }
        }

        // An instance that did not answer may hold the object
        if complete {
            let location = ObjectLocation {
                instance_ids: holders.iter().map(|i| i.id().to_string()).collect(),
            };
            self.cache.set(&key, &location, TtlClass::Static).await;
        }
        holders
    }
}

fn location_digest(snapshot: &RegistrySnapshot, ids: &[String], object_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ObjectLocation::SCHEMA.as_bytes());
    hasher.update([0x1e]);
    hasher.update(object_id.as_bytes());
    for id in ids {
        let revision = snapshot.get(id).map(|i| i.revision()).unwrap_or_default();
        hasher.update([0x1e]);
        hasher.update(id.as_bytes());
        hasher.update([0x1f]);
        hasher.update(revision.as_bytes());
    }
    hex::encode(hasher.finalize())
}
