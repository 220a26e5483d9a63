//! Joining sub-query results.
//!
//! # Design Decisions
//! - Handles are awaited in completion order; the join never waits on one
//!   slow sub-query while another has already failed
//! - Under [`JoinPolicy::AllRequired`] the first observed failure ends the
//!   join; remaining tasks are cancelled when the request's scope drops
//! - Results are reported in the canonical sub-query order, whatever the
//!   completion order was

use std::time::Duration;

use futures_util::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::error::GatewayError;
use super::request::JoinPolicy;
use crate::cache::Cacheable;
use crate::capability::{BackendError, Capability, CapabilityResponse};
use crate::task::{TaskError, TaskHandle, TaskOutcome};

/// Outcome of one sub-query inside an aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum SubOutcome {
    Ok { response: CapabilityResponse },
    /// Tolerated failure; `reason` is for diagnostics only.
    Absent { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubResult {
    pub instance_id: String,
    pub capability: Capability,
    pub outcome: SubOutcome,
}

impl SubResult {
    pub fn response(&self) -> Option<&CapabilityResponse> {
        match &self.outcome {
            SubOutcome::Ok { response } => Some(response),
            SubOutcome::Absent { .. } => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self.outcome, SubOutcome::Absent { .. })
    }
}

/// Joined result of a fan-out request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub results: Vec<SubResult>,
    /// At least one sub-result is absent.
    pub partial: bool,
}

impl Aggregate {
    pub fn empty() -> Self {
        Self {
            results: Vec::new(),
            partial: false,
        }
    }

    /// First sub-result for `instance_id` and `capability`.
    pub fn get(&self, instance_id: &str, capability: Capability) -> Option<&SubResult> {
        self.results
            .iter()
            .find(|r| r.instance_id == instance_id && r.capability == capability)
    }

    pub fn responses(&self) -> impl Iterator<Item = &CapabilityResponse> {
        self.results.iter().filter_map(SubResult::response)
    }

    pub fn absent_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_absent()).count()
    }
}

impl Cacheable for Aggregate {
    const SCHEMA: &'static str = "fanout-aggregate";
    const VERSION: u32 = 1;
}

/// A dispatched sub-query awaiting its join.
#[derive(Debug)]
pub(crate) struct Pending {
    pub instance_id: String,
    pub capability: Capability,
    pub handle: TaskHandle<CapabilityResponse, BackendError>,
}

/// Join `pending` under `policy`, giving up at `deadline`.
pub(crate) async fn join(
    pending: Vec<Pending>,
    policy: JoinPolicy,
    deadline: Duration,
) -> Result<Aggregate, GatewayError> {
    let expires = Instant::now() + deadline;
    let mut outcomes: Vec<Option<TaskOutcome<CapabilityResponse, BackendError>>> =
        vec![None; pending.len()];

    let mut in_flight: FuturesUnordered<_> = pending
        .iter()
        .enumerate()
        .map(|(idx, p)| async move { (idx, p.handle.wait_and_get().await) })
        .collect();

    loop {
        let next = match tokio::time::timeout_at(expires, in_flight.next()).await {
            Ok(next) => next,
            Err(_) => {
                if policy == JoinPolicy::AllRequired {
                    return Err(GatewayError::JoinTimeout(deadline));
                }
                tracing::debug!(?deadline, "Join deadline reached, keeping finished sub-results");
                break;
            }
        };
        let Some((idx, outcome)) = next else {
            break;
        };

        if policy == JoinPolicy::AllRequired {
            if let Err(e) = &outcome {
                return Err(to_gateway_error(&pending[idx], e));
            }
        }
        outcomes[idx] = Some(outcome);
    }
    drop(in_flight);

    let mut partial = false;
    let results = pending
        .into_iter()
        .zip(outcomes)
        .map(|(p, outcome)| {
            let outcome = match outcome {
                Some(Ok(response)) => SubOutcome::Ok { response },
                Some(Err(e)) => SubOutcome::Absent {
                    reason: to_gateway_error(&p, &e).to_string(),
                },
                None => SubOutcome::Absent {
                    reason: GatewayError::JoinTimeout(deadline).to_string(),
                },
            };
            partial |= matches!(outcome, SubOutcome::Absent { .. });
            SubResult {
                instance_id: p.instance_id,
                capability: p.capability,
                outcome,
            }
        })
        .collect();

    Ok(Aggregate { results, partial })
}

fn to_gateway_error(pending: &Pending, error: &TaskError<BackendError>) -> GatewayError {
    match error {
        TaskError::Failed(BackendError::Timeout(after)) => GatewayError::Timeout {
            instance_id: pending.instance_id.clone(),
            capability: pending.capability,
            after: *after,
        },
        TaskError::Failed(source) => GatewayError::BackendFailure {
            instance_id: pending.instance_id.clone(),
            capability: pending.capability,
            source: source.clone(),
        },
        TaskError::Cancelled => GatewayError::Cancelled,
        TaskError::Panicked(msg) => {
            GatewayError::Internal(format!("sub-query on '{}' panicked: {msg}", pending.instance_id))
        }
    }
}
