//! Bounded exponential backoff.
//!
//! `delay = base_interval * 2^(attempt - 1)`, retried while
//! `attempt <= max_attempts`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Immutable backoff configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackoffSpec {
    pub base_interval_ms: u64,
    pub max_attempts: u32,
}

/// Pure retry policy derived from a [`BackoffSpec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    spec: BackoffSpec,
}

impl BackoffPolicy {
    #[must_use]
    pub const fn new(spec: BackoffSpec) -> Self {
        Self { spec }
    }

    /// Delay before retry number `attempt` (1-based), in milliseconds.
    ///
    /// Saturates at `u64::MAX` instead of overflowing.
    #[must_use]
    pub const fn delay_ms_for(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1);
        if exponent >= 64 {
            return if self.spec.base_interval_ms == 0 {
                0
            } else {
                u64::MAX
            };
        }
        self.spec.base_interval_ms.saturating_mul(1_u64 << exponent)
    }

    /// Delay before retry number `attempt` (1-based).
    #[must_use]
    pub const fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.delay_ms_for(attempt))
    }

    /// Whether a retry is still within budget after `attempt` consecutive failures.
    #[must_use]
    pub const fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.spec.max_attempts
    }
}
