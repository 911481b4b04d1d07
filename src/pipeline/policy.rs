use std::time::Duration;
use tokio::time::Instant;

use crate::power_flow::SolverError;
use crate::repo::{ModelLoadError, StoreError};

/// Exponential backoff with a cap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay to wait after the `attempt`-th failure (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

/// Retry and timing policy of one orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelinePolicy {
    pub solver_retry: RetryPolicy,
    pub storage_retry: RetryPolicy,
    /// Re-solves allowed after a malformed measurement set.
    pub contract_retries: u32,
    /// Upper bound for any single collaborator call.
    pub per_call_timeout: Duration,
    /// Overall budget of one invocation.
    pub deadline: Duration,
    /// Lifetime of a reservation before other workers may take it over.
    pub reservation_ttl: Duration,
}

impl Default for PipelinePolicy {
    fn default() -> Self {
        let backoff = |max_attempts| RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        };
        Self {
            solver_retry: backoff(4),
            storage_retry: backoff(6),
            contract_retries: 1,
            per_call_timeout: Duration::from_secs(60),
            deadline: Duration::from_secs(14 * 60),
            reservation_ttl: Duration::from_secs(15 * 60),
        }
    }
}

/// Absolute end of an invocation's time budget
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires_at: Instant,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            expires_at: Instant::now() + budget,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Sub-deadline for one call: the per-call timeout, clipped to what is left.
    pub fn call_budget(&self, per_call: Duration) -> Option<Duration> {
        let remaining = self.remaining();
        (!remaining.is_zero()).then(|| per_call.min(remaining))
    }

    /// Sleep for `delay` unless that would overrun the deadline.
    ///
    /// Returns false without sleeping when the budget is too small.
    pub async fn sleep_within(&self, delay: Duration) -> bool {
        if delay >= self.remaining() {
            return false;
        }
        tokio::time::sleep(delay).await;
        true
    }
}

/// Errors that may succeed when retried
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for StoreError {
    fn is_transient(&self) -> bool {
        StoreError::is_transient(self)
    }
}

impl Transient for ModelLoadError {
    fn is_transient(&self) -> bool {
        ModelLoadError::is_transient(self)
    }
}

impl Transient for SolverError {
    fn is_transient(&self) -> bool {
        SolverError::is_transient(self)
    }
}
