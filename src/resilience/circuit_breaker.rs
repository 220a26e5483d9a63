//! Circuit breaker for backend protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: backend assumed down, calls fail fast
//! - Half-Open: a single probe is let through to test recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= threshold
//! Open → Half-Open: after reset timeout
//! Half-Open → Closed: probe succeeds
//! Half-Open → Open: probe fails
//! ```
//!
//! # Design Decisions
//! - One breaker per instance; a replaced instance starts with a fresh one
//! - Fail fast in Open state (no waiting for the sub-query deadline)
//! - Single probe in Half-Open (prevents hammering a recovering backend)

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;

/// Breaker state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(val: u8) -> Self {
        match val {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

/// Consecutive-failure circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    reset_timeout: Duration,
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    probe_in_flight: AtomicBool,
    opened_at: Mutex<Option<Instant>>,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    pub fn new(name: impl Into<String>, failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
            state: AtomicU8::new(CircuitState::Closed as u8),
            consecutive_failures: AtomicU32::new(0),
            probe_in_flight: AtomicBool::new(false),
            opened_at: Mutex::new(None),
        }
    }

    pub fn from_config(name: impl Into<String>, config: &CircuitBreakerConfig) -> Self {
        Self::new(
            name,
            config.failure_threshold,
            Duration::from_secs(config.reset_timeout_secs),
        )
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Ask for permission to perform a call.
    ///
    /// Returns `false` when the call must fail fast. A `true` answer must be
    /// followed by exactly one `record_success` or `record_failure`.
    pub fn try_acquire(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = self
                    .opened_at
                    .lock()
                    .map(|opened| opened.map(|at| at.elapsed()))
                    .unwrap_or(None);
                match elapsed {
                    Some(elapsed) if elapsed >= self.reset_timeout => {
                        if self
                            .probe_in_flight
                            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                            .is_ok()
                        {
                            self.state.store(CircuitState::HalfOpen as u8, Ordering::Release);
                            tracing::info!(breaker = %self.name, "Circuit half-open, probing backend");
                            true
                        } else {
                            false
                        }
                    }
                    _ => false,
                }
            }
            // The probe slot is already taken.
            CircuitState::HalfOpen => false,
        }
    }

    /// Like [`try_acquire`](Self::try_acquire), returning a permit that
    /// abandons itself when dropped unsettled.
    pub fn acquire(&self) -> Option<BreakerPermit<'_>> {
        self.try_acquire().then(|| BreakerPermit {
            breaker: self,
            settled: false,
        })
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        if self.state() != CircuitState::Closed {
            tracing::info!(breaker = %self.name, "Circuit closed");
        }
        self.state.store(CircuitState::Closed as u8, Ordering::Release);
        self.probe_in_flight.store(false, Ordering::Release);
    }

    pub fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        let state = self.state();

        if state == CircuitState::HalfOpen || failures >= self.failure_threshold {
            if state != CircuitState::Open {
                tracing::warn!(
                    breaker = %self.name,
                    failures,
                    "Circuit opened"
                );
            }
            if let Ok(mut opened) = self.opened_at.lock() {
                *opened = Some(Instant::now());
            }
            self.state.store(CircuitState::Open as u8, Ordering::Release);
            self.probe_in_flight.store(false, Ordering::Release);
        }
    }

    /// Give back a permit whose call never completed (the caller was
    /// cancelled). A half-open probe slot is released without closing the
    /// circuit; the next caller may probe straight away.
    pub fn abandon(&self) {
        if self.state() == CircuitState::HalfOpen {
            self.state.store(CircuitState::Open as u8, Ordering::Release);
            self.probe_in_flight.store(false, Ordering::Release);
        }
    }
}

/// Permission to perform one call through a [`CircuitBreaker`].
#[derive(Debug)]
#[must_use = "a dropped permit is abandoned, it never closes the circuit"]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl BreakerPermit<'_> {
    /// Report the outcome of the call.
    pub fn settle(mut self, healthy: bool) {
        self.settled = true;
        if healthy {
            self.breaker.record_success();
        } else {
            self.breaker.record_failure();
        }
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.abandon();
        }
    }
}
