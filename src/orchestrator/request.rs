//! Fan-out request model.

use serde::{Deserialize, Serialize};

use crate::cache::TtlClass;
use crate::capability::{CapabilityRequest, Coord};

/// How sub-results combine into an aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "policy")]
pub enum JoinPolicy {
    /// Every sub-query must succeed; the first failure fails the request.
    AllRequired,
    /// Failed sub-queries are recorded as absent. A partial aggregate is
    /// cached only when `cache_partial` is set.
    BestEffort { cache_partial: bool },
}

/// Per request type policy: join, freshness and retry behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestKind {
    /// Stable name, part of the fingerprint and of metric labels.
    pub name: String,
    pub join: JoinPolicy,
    pub ttl: TtlClass,
    /// Whether a timed-out sub-query may be re-dispatched once.
    pub retry_on_timeout: bool,
}

impl RequestKind {
    pub fn new(name: impl Into<String>, join: JoinPolicy, ttl: TtlClass, retry_on_timeout: bool) -> Self {
        Self {
            name: name.into(),
            join,
            ttl,
            retry_on_timeout,
        }
    }

    /// Multimodal journeys: every leg is needed.
    pub fn journeys() -> Self {
        Self::new("journeys", JoinPolicy::AllRequired, TtlClass::Default, true)
    }

    /// Place autocompletion across coverages: whatever answers in time.
    pub fn places() -> Self {
        Self::new(
            "places",
            JoinPolicy::BestEffort { cache_partial: false },
            TtlClass::Default,
            true,
        )
    }

    /// Stops around a point with live departures.
    pub fn stops_nearby() -> Self {
        Self::new("stops_nearby", JoinPolicy::AllRequired, TtlClass::Realtime, false)
    }

    /// Coverage descriptions; a partial listing is still worth keeping.
    pub fn coverage_status() -> Self {
        Self::new(
            "coverage_status",
            JoinPolicy::BestEffort { cache_partial: true },
            TtlClass::Static,
            false,
        )
    }
}

/// Where a sub-query goes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    Instance(String),
    /// The best instance covering the point.
    Coord(Coord),
    /// The best instance holding the object. `lon;lat` and `coord:lon:lat`
    /// ids are treated as coordinates.
    Object(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubQuery {
    pub target: Target,
    pub request: CapabilityRequest,
}

impl SubQuery {
    pub fn on(instance_id: impl Into<String>, request: CapabilityRequest) -> Self {
        Self {
            target: Target::Instance(instance_id.into()),
            request,
        }
    }

    pub fn at(lon: f64, lat: f64, request: CapabilityRequest) -> Self {
        Self {
            target: Target::Coord(Coord { lon, lat }),
            request,
        }
    }

    pub fn object(object_id: impl Into<String>, request: CapabilityRequest) -> Self {
        Self {
            target: Target::Object(object_id.into()),
            request,
        }
    }
}

/// One logical request, decomposed into sub-queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanOutRequest {
    pub kind: RequestKind,
    pub subqueries: Vec<SubQuery>,
}

impl FanOutRequest {
    pub fn new(kind: RequestKind) -> Self {
        Self {
            kind,
            subqueries: Vec::new(),
        }
    }

    pub fn with(mut self, subquery: SubQuery) -> Self {
        self.subqueries.push(subquery);
        self
    }
}
