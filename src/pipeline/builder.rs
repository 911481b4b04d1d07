use chrono::Utc;
use thiserror::Error;

use crate::domain::{ComplianceRecord, ComplianceVerdict, GridScenario, SolverStatus};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordError {
    #[error("inconsistent record state: {0}")]
    InconsistentRecordState(String),
}

/// Assembles audit records stamped with the active rule set
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    rule_version: String,
    standard: String,
    processed_by: String,
}

impl RecordBuilder {
    pub fn new(
        rule_version: impl Into<String>,
        standard: impl Into<String>,
        processed_by: impl Into<String>,
    ) -> Self {
        Self {
            rule_version: rule_version.into(),
            standard: standard.into(),
            processed_by: processed_by.into(),
        }
    }

    pub fn rule_version(&self) -> &str {
        &self.rule_version
    }

    /// Build the record for one scenario.
    ///
    /// A converged solve must come with a verdict; a non-converged or failed
    /// solve must come without one and with a diagnostic instead.
    pub fn build(
        &self,
        scenario: &GridScenario,
        verdict: Option<ComplianceVerdict>,
        solver_status: SolverStatus,
        diagnostic: Option<String>,
        solver_attempts: u32,
    ) -> Result<ComplianceRecord, RecordError> {
        match (solver_status, &verdict, &diagnostic) {
            (SolverStatus::Converged, None, _) => {
                return Err(RecordError::InconsistentRecordState(
                    "converged solve without a verdict".to_string(),
                ))
            }
            (SolverStatus::NonConverged | SolverStatus::Error, Some(_), _) => {
                return Err(RecordError::InconsistentRecordState(format!(
                    "verdict present for solver status {solver_status}"
                )))
            }
            (SolverStatus::NonConverged | SolverStatus::Error, None, None) => {
                return Err(RecordError::InconsistentRecordState(format!(
                    "solver status {solver_status} requires a diagnostic"
                )))
            }
            _ => {}
        }

        Ok(ComplianceRecord {
            scenario_key: scenario.scenario_key.clone(),
            model_reference: scenario.model_reference.clone(),
            submitted_at: scenario.submitted_at,
            solver_status,
            verdict,
            diagnostic,
            evaluated_at: Utc::now(),
            rule_version: self.rule_version.clone(),
            standard: self.standard.clone(),
            processed_by: self.processed_by.clone(),
            solver_attempts,
        })
    }
}
