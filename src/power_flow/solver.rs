use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::domain::{GridTopology, VoltageMeasurement};

/// Result of a solve that ran to completion.
///
/// Non-convergence is an expected physical outcome, so it is a variant here
/// rather than an error.
#[derive(Debug, Clone, PartialEq)]
pub enum SolveOutcome {
    Converged {
        measurements: Vec<VoltageMeasurement>,
        iterations: u32,
    },
    NonConverged {
        diagnostic: String,
    },
}

/// Solver failures
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolverError {
    /// The call did not finish within its sub-deadline (transient).
    #[error("solver timed out after {0:?}")]
    Timeout(Duration),
    /// The solver process or task failed (transient).
    #[error("solver crashed: {0}")]
    Crashed(String),
    /// The solver cannot handle this model; retrying will not help.
    #[error("solver does not support this model: {0}")]
    Unsupported(String),
}

impl SolverError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SolverError::Timeout(_) | SolverError::Crashed(_))
    }
}

#[async_trait]
pub trait PowerFlowSolver: Send + Sync {
    async fn solve(&self, topology: &GridTopology) -> Result<SolveOutcome, SolverError>;
}
