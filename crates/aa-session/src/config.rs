//! Orchestrator configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backoff for retryable smart account resolution failures.
///
/// Only `ResolveError::NetworkUnreachable` is retried; every other error
/// fails the login immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Zero disables retrying.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound for the doubled delay.
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// No retries.
    pub const NONE: Self = Self {
        max_retries: 0,
        initial_backoff: Duration::from_millis(250),
        max_backoff: Duration::from_secs(5),
    };

    /// Exponential backoff with `max_retries` retries.
    #[must_use]
    pub const fn exponential(max_retries: u32, initial_backoff: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff,
            max_backoff: Duration::from_secs(5),
        }
    }

    /// Delay before retry number `retry` (zero-based).
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::NONE
    }
}

/// Orchestrator configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Retry policy for smart account resolution.
    #[serde(default)]
    pub resolve_retry: RetryPolicy,
}
