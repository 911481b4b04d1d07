use serde::{Deserialize, Serialize};

/// Direction of a voltage band violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ViolationKind {
    Undervoltage,
    Overvoltage,
}

/// A node whose voltage lies outside the tolerance band
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub node_id: String,
    pub voltage_pu: f64,
    /// Distance to the nearest band edge, always positive.
    pub deviation: f64,
    pub kind: ViolationKind,
}

/// Outcome of checking one measurement set against a tolerance band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceVerdict {
    pub compliant: bool,
    /// Worst offender first; equal deviations are ordered by node id.
    pub violations: Vec<Violation>,
    pub min_voltage: f64,
    pub max_voltage: f64,
    pub node_count: usize,
}

impl ComplianceVerdict {
    pub fn worst_violation(&self) -> Option<&Violation> {
        self.violations.first()
    }

    pub fn count_of(&self, kind: ViolationKind) -> usize {
        self.violations.iter().filter(|v| v.kind == kind).count()
    }
}
