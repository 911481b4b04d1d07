/// Load-flow solving
///
/// The pipeline consumes solvers through the [`PowerFlowSolver`] trait.
/// [`SweepSolver`] is the built-in reference implementation for radial feeders.

pub mod solver;
pub mod sweep;

pub use solver::{PowerFlowSolver, SolveOutcome, SolverError};
pub use sweep::{SweepSolver, SweepSolverConfig};
