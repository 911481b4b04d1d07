use ordered_float::OrderedFloat;
use std::collections::HashSet;
use thiserror::Error;

use super::TolerancePolicy;
use crate::domain::{ComplianceVerdict, Violation, ViolationKind, VoltageMeasurement};

/// Reasons a measurement set cannot be classified
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    #[error("measurement set is empty")]
    EmptyMeasurementSet,
    #[error("node {node_id} has unphysical voltage {voltage_pu} pu")]
    InvalidMeasurement { node_id: String, voltage_pu: f64 },
    #[error("node {0} appears more than once")]
    DuplicateNode(String),
    #[error("invalid tolerance policy: {0}")]
    InvalidTolerance(String),
}

/// Classify `measurements` against `tolerance`.
///
/// Violations are ordered by descending deviation, then by node id, so the
/// result depends only on the inputs and never on their order of arrival.
pub fn evaluate(
    measurements: &[VoltageMeasurement],
    tolerance: &TolerancePolicy,
) -> Result<ComplianceVerdict, EvaluationError> {
    tolerance
        .validate()
        .map_err(EvaluationError::InvalidTolerance)?;

    if measurements.is_empty() {
        return Err(EvaluationError::EmptyMeasurementSet);
    }

    let mut seen = HashSet::with_capacity(measurements.len());
    let mut min_voltage = f64::INFINITY;
    let mut max_voltage = f64::NEG_INFINITY;
    let mut violations = Vec::new();

    for m in measurements {
        if !m.is_physical() {
            return Err(EvaluationError::InvalidMeasurement {
                node_id: m.node_id.clone(),
                voltage_pu: m.voltage_pu,
            });
        }
        if !seen.insert(m.node_id.as_str()) {
            return Err(EvaluationError::DuplicateNode(m.node_id.clone()));
        }

        min_voltage = min_voltage.min(m.voltage_pu);
        max_voltage = max_voltage.max(m.voltage_pu);

        if !tolerance.contains(m.voltage_pu) {
            let kind = if m.voltage_pu < tolerance.lower_pu {
                ViolationKind::Undervoltage
            } else {
                ViolationKind::Overvoltage
            };
            violations.push(Violation {
                node_id: m.node_id.clone(),
                voltage_pu: m.voltage_pu,
                deviation: tolerance.deviation(m.voltage_pu),
                kind,
            });
        }
    }

    violations.sort_by(|a, b| {
        OrderedFloat(b.deviation)
            .cmp(&OrderedFloat(a.deviation))
            .then_with(|| a.node_id.cmp(&b.node_id))
    });

    Ok(ComplianceVerdict {
        compliant: violations.is_empty(),
        violations,
        min_voltage,
        max_voltage,
        node_count: measurements.len(),
    })
}
