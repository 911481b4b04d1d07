use serde::{Deserialize, Serialize};

/// Simulated voltage magnitude at one node, in per-unit of nominal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoltageMeasurement {
    pub node_id: String,
    pub voltage_pu: f64,
}

impl VoltageMeasurement {
    pub fn new(node_id: impl Into<String>, voltage_pu: f64) -> Self {
        Self {
            node_id: node_id.into(),
            voltage_pu,
        }
    }

    /// A usable magnitude is finite and strictly positive.
    pub fn is_physical(&self) -> bool {
        self.voltage_pu.is_finite() && self.voltage_pu > 0.0
    }
}
