use serde::{Deserialize, Serialize};

/// Role of a bus in the load flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BusKind {
    /// Reference bus with fixed voltage magnitude (the feeding transformer).
    Slack,
    /// Bus with specified active/reactive injection.
    #[default]
    Pq,
}

/// A node of the grid model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bus {
    pub id: String,
    #[serde(default)]
    pub kind: BusKind,
    /// Active power demand in per-unit (negative = generation).
    #[serde(default)]
    pub p_pu: f64,
    /// Reactive power demand in per-unit.
    #[serde(default)]
    pub q_pu: f64,
}

/// A branch between two buses, impedance in per-unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub from: String,
    pub to: String,
    pub r_pu: f64,
    pub x_pu: f64,
}

/// Grid model as uploaded for evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridTopology {
    #[serde(default)]
    pub name: Option<String>,
    /// Setpoint of the slack bus.
    #[serde(default = "default_slack_voltage")]
    pub slack_voltage_pu: f64,
    pub buses: Vec<Bus>,
    #[serde(default)]
    pub lines: Vec<Line>,
}

fn default_slack_voltage() -> f64 {
    1.0
}

impl GridTopology {
    /// Parse a JSON model and check that it is structurally usable.
    pub fn from_json(bytes: &[u8]) -> Result<Self, String> {
        let topology: GridTopology =
            serde_json::from_slice(bytes).map_err(|e| format!("invalid model JSON: {e}"))?;
        topology.validate()?;
        Ok(topology)
    }

    /// Structural checks that do not depend on the solver
    pub fn validate(&self) -> Result<(), String> {
        if self.buses.is_empty() {
            return Err("model has no buses".to_string());
        }
        if !self.slack_voltage_pu.is_finite() || self.slack_voltage_pu <= 0.0 {
            return Err(format!(
                "slack_voltage_pu must be positive and finite: {}",
                self.slack_voltage_pu
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for bus in &self.buses {
            if bus.id.trim().is_empty() {
                return Err("bus with empty id".to_string());
            }
            if !seen.insert(bus.id.as_str()) {
                return Err(format!("duplicate bus id: {}", bus.id));
            }
            if !bus.p_pu.is_finite() || !bus.q_pu.is_finite() {
                return Err(format!("bus {} has non-finite injection", bus.id));
            }
        }

        for line in &self.lines {
            if !seen.contains(line.from.as_str()) || !seen.contains(line.to.as_str()) {
                return Err(format!(
                    "line {} -> {} references an unknown bus",
                    line.from, line.to
                ));
            }
            if !line.r_pu.is_finite() || !line.x_pu.is_finite() || line.r_pu < 0.0 {
                return Err(format!(
                    "line {} -> {} has invalid impedance",
                    line.from, line.to
                ));
            }
        }

        Ok(())
    }

    pub fn slack_bus(&self) -> Option<&Bus> {
        self.buses.iter().find(|b| b.kind == BusKind::Slack)
    }
}
