use thiserror::Error;

use super::orchestrator::PipelineState;
use super::RecordError;
use crate::compliance::EvaluationError;

/// Failure classes reported to the trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorClass {
    Input,
    SolverTransient,
    SolverContract,
    StorageTransient,
    Consistency,
    DeadlineExceeded,
}

/// Errors that terminate a scenario.
///
/// Lost reservation races are not errors; they end the scenario `Done`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    /// Missing, malformed or stale model. Never retried.
    #[error("input rejected: {0}")]
    Input(String),
    #[error("solver failed: {0}")]
    SolverTransient(String),
    #[error("solver returned an unusable measurement set: {0}")]
    SolverContract(#[from] EvaluationError),
    #[error("storage unavailable: {0}")]
    StorageTransient(String),
    /// Programming or data defect. Never retried.
    #[error("consistency violation: {0}")]
    Consistency(String),
    #[error("deadline exceeded while {0}")]
    DeadlineExceeded(PipelineState),
}

impl PipelineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            PipelineError::Input(_) => ErrorClass::Input,
            PipelineError::SolverTransient(_) => ErrorClass::SolverTransient,
            PipelineError::SolverContract(_) => ErrorClass::SolverContract,
            PipelineError::StorageTransient(_) => ErrorClass::StorageTransient,
            PipelineError::Consistency(_) => ErrorClass::Consistency,
            PipelineError::DeadlineExceeded(_) => ErrorClass::DeadlineExceeded,
        }
    }

    /// Whether a later re-trigger of the same scenario may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PipelineError::Input(_) | PipelineError::Consistency(_))
    }
}

impl From<RecordError> for PipelineError {
    fn from(err: RecordError) -> Self {
        PipelineError::Consistency(err.to_string())
    }
}
