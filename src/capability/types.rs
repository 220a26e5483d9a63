//! Capability payloads.
//!
//! Requests and responses are opaque to the gateway beyond their type; the
//! routing engine interprets them. They travel as JSON and are stored inside
//! cached aggregates, so every type is `Serialize + Deserialize` and
//! deterministic to serialize (no maps with unordered keys).

use serde::{Deserialize, Serialize};

use crate::config::{FeatureFlags, RoutingParams};

/// A named backend operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    PlaceResolution,
    Routing,
    StopLookup,
    ObjectLookup,
    Metadata,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::PlaceResolution => "place_resolution",
            Capability::Routing => "routing",
            Capability::StopLookup => "stop_lookup",
            Capability::ObjectLookup => "object_lookup",
            Capability::Metadata => "metadata",
        }
    }

    /// Relative endpoint path on the instance backend.
    pub fn path(&self) -> &'static str {
        match self {
            Capability::PlaceResolution => "places",
            Capability::Routing => "journeys",
            Capability::StopLookup => "stop_points",
            Capability::ObjectLookup => "objects",
            Capability::Metadata => "metadata",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// WGS84 coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coord {
    pub lon: f64,
    pub lat: f64,
}

/// Street-network mode used at either end of a journey.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Walking,
    Bike,
    Bss,
    Car,
    Ridesharing,
    Taxi,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceQuery {
    pub text: String,
    pub max_results: u32,
    /// Optional proximity bias.
    #[serde(default)]
    pub near: Option<Coord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub id: String,
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub coord: Option<Coord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteQuery {
    /// Place id or `lon;lat`.
    pub from: String,
    pub to: String,
    /// Unix timestamp, seconds.
    pub datetime: i64,
    /// `true`: depart after `datetime`; `false`: arrive before it.
    #[serde(default = "default_clockwise")]
    pub clockwise: bool,
    #[serde(default)]
    pub first_section_modes: Vec<Mode>,
    #[serde(default)]
    pub last_section_modes: Vec<Mode>,
    /// Overrides the instance's `max_nb_transfers` when set.
    #[serde(default)]
    pub max_nb_transfers: Option<u32>,
}

fn default_clockwise() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Journey {
    pub departure: i64,
    pub arrival: i64,
    pub duration_secs: u32,
    pub nb_transfers: u32,
    #[serde(default)]
    pub modes: Vec<Mode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopQuery {
    pub around: Coord,
    pub distance_m: u32,
    pub max_results: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopPoint {
    pub id: String,
    pub name: String,
    pub coord: Coord,
    pub distance_m: u32,
    #[serde(default)]
    pub lines: Vec<String>,
}

/// Does the instance's data hold this object (stop area, line, address...)?
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectQuery {
    pub id: String,
}

/// Data description returned by an instance's engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceMetadata {
    /// Changes whenever the engine loads new data.
    pub publication_date: i64,
    #[serde(default)]
    pub timezone: String,
    #[serde(default)]
    pub status: String,
}

/// A typed capability request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "capability", content = "query", rename_all = "snake_case")]
pub enum CapabilityRequest {
    ResolvePlace(PlaceQuery),
    ComputeRoute(RouteQuery),
    LookupStop(StopQuery),
    LookupObject(ObjectQuery),
    Metadata,
}

impl CapabilityRequest {
    pub fn capability(&self) -> Capability {
        match self {
            CapabilityRequest::ResolvePlace(_) => Capability::PlaceResolution,
            CapabilityRequest::ComputeRoute(_) => Capability::Routing,
            CapabilityRequest::LookupStop(_) => Capability::StopLookup,
            CapabilityRequest::LookupObject(_) => Capability::ObjectLookup,
            CapabilityRequest::Metadata => Capability::Metadata,
        }
    }
}

/// A typed capability response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum CapabilityResponse {
    Places(Vec<Place>),
    Journeys(Vec<Journey>),
    Stops(Vec<StopPoint>),
    /// Places matching the looked-up object; empty when the instance does
    /// not hold it.
    Objects(Vec<Place>),
    Metadata(InstanceMetadata),
}

impl CapabilityResponse {
    pub fn capability(&self) -> Capability {
        match self {
            CapabilityResponse::Places(_) => Capability::PlaceResolution,
            CapabilityResponse::Journeys(_) => Capability::Routing,
            CapabilityResponse::Stops(_) => Capability::StopLookup,
            CapabilityResponse::Objects(_) => Capability::ObjectLookup,
            CapabilityResponse::Metadata(_) => Capability::Metadata,
        }
    }
}

/// What is sent to the instance backend: the request plus the instance
/// parameters it must be evaluated with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendCall {
    pub instance_id: String,
    pub scenario: String,
    pub routing: RoutingParams,
    pub features: FeatureFlags,
    pub request: CapabilityRequest,
}
