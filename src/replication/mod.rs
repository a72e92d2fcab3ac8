//! Replication Module
//!
//! Fans committed operations out from the primary to every replica. Each
//! peer gets its own FIFO queue drained by a single worker, so operations
//! apply on a given replica in dispatch order even while an earlier one
//! is being retried.

pub mod protocol;
mod replicator;
mod task;

pub use replicator::{Replicator, ReplicationStats, StatsSnapshot};
pub use task::{ReplicationTask, TaskOutcome};

use std::time::Duration;

use crate::config::ReplicationConfig;

/// Retry policy for delivery attempts
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per task before it is dropped
    pub max_attempts: u32,
    /// Deadline for a single delivery attempt
    pub attempt_timeout: Duration,
    /// Backoff before the second attempt; doubles for each attempt after
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(5),
            backoff_base: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Build the policy from configuration
    pub fn from_config(config: &ReplicationConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            attempt_timeout: Duration::from_millis(config.attempt_timeout_ms),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
        }
    }

    /// Delay before the retry that follows `attempt` (1-based)
    ///
    /// Attempt 1 waits the base delay, attempt 2 twice that, and so on.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.backoff_base.saturating_mul(1u32 << shift)
    }
}
