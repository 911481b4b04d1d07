use serde::{Deserialize, Serialize};

/// Default lower edge of the band (-10 % of nominal).
pub const DEFAULT_LOWER_PU: f64 = 0.90;
/// Default upper edge of the band (+10 % of nominal).
pub const DEFAULT_UPPER_PU: f64 = 1.10;

/// Admissible per-unit voltage band
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TolerancePolicy {
    pub lower_pu: f64,
    pub upper_pu: f64,
}

impl Default for TolerancePolicy {
    fn default() -> Self {
        Self {
            lower_pu: DEFAULT_LOWER_PU,
            upper_pu: DEFAULT_UPPER_PU,
        }
    }
}

impl TolerancePolicy {
    pub fn new(lower_pu: f64, upper_pu: f64) -> Result<Self, String> {
        let policy = Self { lower_pu, upper_pu };
        policy.validate()?;
        Ok(policy)
    }

    /// The band must be finite and strictly enclose nominal voltage.
    pub fn validate(&self) -> Result<(), String> {
        if !self.lower_pu.is_finite() {
            return Err(format!("lower_pu is not finite: {}", self.lower_pu));
        }
        if !self.upper_pu.is_finite() {
            return Err(format!("upper_pu is not finite: {}", self.upper_pu));
        }
        if self.lower_pu <= 0.0 {
            return Err(format!("lower_pu must be positive: {}", self.lower_pu));
        }
        if !(self.lower_pu < 1.0 && 1.0 < self.upper_pu) {
            return Err(format!(
                "tolerance band must satisfy lower_pu < 1.0 < upper_pu (got {} .. {})",
                self.lower_pu, self.upper_pu
            ));
        }
        Ok(())
    }

    pub fn contains(&self, voltage_pu: f64) -> bool {
        voltage_pu >= self.lower_pu && voltage_pu <= self.upper_pu
    }

    /// Distance outside the band, zero when inside.
    pub fn deviation(&self, voltage_pu: f64) -> f64 {
        (self.lower_pu - voltage_pu)
            .max(voltage_pu - self.upper_pu)
            .max(0.0)
    }
}
