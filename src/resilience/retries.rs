//! Retry logic.
//!
//! # Responsibilities
//! - Decide whether a failed sub-query may be re-dispatched
//! - Compute the delay before the re-dispatch
//!
//! # Design Decisions
//! - Only deadline expiries are retried; transport and remote errors are
//!   surfaced through the join policy untouched
//! - At most one retry per sub-query, whatever the configuration says
//! - The request kind has the last word: real-time kinds never retry

use std::time::Duration;

use crate::capability::BackendError;
use crate::config::RetryConfig;
use crate::resilience::backoff::calculate_backoff;

/// Hard ceiling on timeout retries per sub-query.
pub const MAX_TIMEOUT_RETRIES: u32 = 1;

/// Retry policy derived from [`RetryConfig`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    enabled: bool,
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            enabled: config.enabled,
            max_retries: config.max_timeout_retries.min(MAX_TIMEOUT_RETRIES),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// A policy that never retries.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// `retries_done` is the number of re-dispatches already performed.
    pub fn should_retry(&self, error: &BackendError, retries_done: u32, kind_allows: bool) -> bool {
        self.enabled
            && kind_allows
            && retries_done < self.max_retries
            && matches!(error, BackendError::Timeout(_))
    }

    pub fn delay(&self, retry_number: u32) -> Duration {
        calculate_backoff(retry_number, self.base_delay, self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::from_config(&RetryConfig {
            enabled: true,
            max_timeout_retries: 5,
            base_delay_ms: 10,
            max_delay_ms: 100,
        })
    }

    #[test]
    fn test_only_timeouts_are_retried() {
        let p = policy();
        assert!(p.should_retry(&BackendError::Timeout(Duration::from_millis(5)), 0, true));
        assert!(!p.should_retry(&BackendError::Transport("reset".into()), 0, true));
        assert!(!p.should_retry(
            &BackendError::Remote { status: 500, message: "boom".into() },
            0,
            true
        ));
    }

    #[test]
    fn test_retry_capped_at_one() {
        let p = policy();
        let timeout = BackendError::Timeout(Duration::from_millis(5));
        assert!(p.should_retry(&timeout, 0, true));
        assert!(!p.should_retry(&timeout, 1, true));
    }

    #[test]
    fn test_kind_and_switch_veto() {
        let timeout = BackendError::Timeout(Duration::from_millis(5));
        assert!(!policy().should_retry(&timeout, 0, false));
        assert!(!RetryPolicy::disabled().should_retry(&timeout, 0, true));
    }
}
