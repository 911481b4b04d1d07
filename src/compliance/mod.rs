//! Voltage band rule evaluation
//!
//! Pure, I/O-free classification of per-node voltages against a tolerance policy.
//! Evaluations share no state and may run from any number of workers at once.

pub mod evaluator;
pub mod tolerance;

pub use evaluator::{evaluate, EvaluationError};
pub use tolerance::TolerancePolicy;
