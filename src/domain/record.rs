use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ComplianceVerdict, ModelReference, ScenarioKey};

/// Solver outcome as persisted on the audit record
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SolverStatus {
    Converged,
    NonConverged,
    Error,
}

/// Immutable audit entry, one per scenario key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceRecord {
    pub scenario_key: ScenarioKey,
    pub model_reference: ModelReference,
    pub submitted_at: DateTime<Utc>,
    pub solver_status: SolverStatus,
    /// Present iff `solver_status` is `converged`.
    pub verdict: Option<ComplianceVerdict>,
    /// Why no verdict exists (non-convergence or solver error).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
    pub evaluated_at: DateTime<Utc>,
    pub rule_version: String,
    pub standard: String,
    pub processed_by: String,
    pub solver_attempts: u32,
}

impl ComplianceRecord {
    /// `Some(true|false)` for evaluated scenarios, `None` when the solve failed.
    pub fn compliant(&self) -> Option<bool> {
        self.verdict.as_ref().map(|v| v.compliant)
    }

    /// Short status label used in logs and summaries.
    pub fn status_label(&self) -> &'static str {
        match self.compliant() {
            Some(true) => "PASS",
            Some(false) => "FAIL",
            None => "ERROR",
        }
    }
}
