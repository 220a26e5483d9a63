//! Per-instance capability proxy.
//!
//! # Responsibilities
//! - Bind capability calls to one resolved instance
//! - Reject requests needing a mobility service the instance has disabled
//! - Enforce the sub-query deadline
//! - Fail fast through the instance's circuit breaker
//! - Return results as [`TaskHandle`]s so callers can fan out
//!
//! # Design Decisions
//! - The proxy holds an `Arc<Instance>` captured at resolution time; a
//!   registry swap mid-request does not affect calls already bound
//! - A cancelled call neither trips nor closes the breaker

use std::sync::Arc;
use std::time::Duration;

use super::backend::BackendError;
use super::types::{
    Capability, CapabilityRequest, CapabilityResponse, InstanceMetadata, Journey, Mode,
    ObjectQuery, Place, PlaceQuery, RouteQuery, StopPoint, StopQuery,
};
use crate::config::FeatureFlags;
use crate::instance::Instance;
use crate::task::{TaskHandle, TaskScope};

/// Capability calls against a single instance.
#[derive(Debug, Clone)]
pub struct CapabilityProxy {
    instance: Arc<Instance>,
    deadline: Duration,
}

impl CapabilityProxy {
    /// `default_deadline` applies unless the instance overrides it.
    pub fn new(instance: Arc<Instance>, default_deadline: Duration) -> Self {
        let deadline = instance.subquery_timeout().unwrap_or(default_deadline);
        Self { instance, deadline }
    }

    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Perform one guarded call and wait for it.
    pub async fn call(&self, request: CapabilityRequest) -> Result<CapabilityResponse, BackendError> {
        self.check_features(&request)?;
        let Some(permit) = self.instance.breaker().acquire() else {
            return Err(BackendError::CircuitOpen(self.instance.id().to_string()));
        };

        let result = self.call_unguarded(request).await;
        match &result {
            Ok(_) => permit.settle(true),
            Err(e) => permit.settle(!e.trips_breaker()),
        }
        result
    }

    fn check_features(&self, request: &CapabilityRequest) -> Result<(), BackendError> {
        let CapabilityRequest::ComputeRoute(query) = request else {
            return Ok(());
        };
        let features = &self.instance.config().features;
        match query
            .first_section_modes
            .iter()
            .chain(&query.last_section_modes)
            .find(|mode| !mode_enabled(**mode, features))
        {
            Some(mode) => Err(BackendError::FeatureDisabled {
                instance_id: self.instance.id().to_string(),
                mode: *mode,
            }),
            None => Ok(()),
        }
    }

    /// Call without consulting the breaker. Used by health probes which must
    /// keep observing an instance whose circuit is open.
    pub async fn call_unguarded(
        &self,
        request: CapabilityRequest,
    ) -> Result<CapabilityResponse, BackendError> {
        let expected = request.capability();
        let call = self.instance.backend_call(request);

        let response = tokio::time::timeout(self.deadline, self.instance.backend().call(call))
            .await
            .map_err(|_| BackendError::Timeout(self.deadline))??;

        if response.capability() != expected {
            return Err(BackendError::UnexpectedResponse {
                expected,
                got: response.capability(),
            });
        }
        Ok(response)
    }

    /// Schedule a call in `scope`.
    pub fn dispatch(
        &self,
        scope: &TaskScope,
        request: CapabilityRequest,
    ) -> TaskHandle<CapabilityResponse, BackendError> {
        let proxy = self.clone();
        scope.spawn(async move { proxy.call(request).await })
    }

    pub fn resolve_place(&self, scope: &TaskScope, query: PlaceQuery) -> TaskHandle<Vec<Place>, BackendError> {
        let proxy = self.clone();
        scope.spawn(async move {
            match proxy.call(CapabilityRequest::ResolvePlace(query)).await? {
                CapabilityResponse::Places(places) => Ok(places),
                other => Err(unexpected(Capability::PlaceResolution, &other)),
            }
        })
    }

    pub fn compute_route(&self, scope: &TaskScope, query: RouteQuery) -> TaskHandle<Vec<Journey>, BackendError> {
        let proxy = self.clone();
        scope.spawn(async move {
            match proxy.call(CapabilityRequest::ComputeRoute(query)).await? {
                CapabilityResponse::Journeys(journeys) => Ok(journeys),
                other => Err(unexpected(Capability::Routing, &other)),
            }
        })
    }

    pub fn lookup_stop(&self, scope: &TaskScope, query: StopQuery) -> TaskHandle<Vec<StopPoint>, BackendError> {
        let proxy = self.clone();
        scope.spawn(async move {
            match proxy.call(CapabilityRequest::LookupStop(query)).await? {
                CapabilityResponse::Stops(stops) => Ok(stops),
                other => Err(unexpected(Capability::StopLookup, &other)),
            }
        })
    }

    /// Places of the engine's data matching an object id.
    pub fn lookup_object(&self, scope: &TaskScope, query: ObjectQuery) -> TaskHandle<Vec<Place>, BackendError> {
        let proxy = self.clone();
        scope.spawn(async move {
            match proxy.call(CapabilityRequest::LookupObject(query)).await? {
                CapabilityResponse::Objects(places) => Ok(places),
                other => Err(unexpected(Capability::ObjectLookup, &other)),
            }
        })
    }

    /// Fetch the engine's metadata, bypassing the breaker.
    pub async fn metadata(&self) -> Result<InstanceMetadata, BackendError> {
        match self.call_unguarded(CapabilityRequest::Metadata).await? {
            CapabilityResponse::Metadata(meta) => Ok(meta),
            other => Err(unexpected(Capability::Metadata, &other)),
        }
    }
}

fn mode_enabled(mode: Mode, features: &FeatureFlags) -> bool {
    match mode {
        Mode::Bss => features.bike_share,
        Mode::Ridesharing => features.ridesharing,
        Mode::Taxi => features.taxi,
        Mode::Walking | Mode::Bike | Mode::Car => true,
    }
}

fn unexpected(expected: Capability, got: &CapabilityResponse) -> BackendError {
    BackendError::UnexpectedResponse {
        expected,
        got: got.capability(),
    }
}
