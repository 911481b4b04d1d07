//! Backward/forward sweep load flow for radial distribution feeders.
//!
//! Uses the real-valued linearised voltage drop `dV = (R*P + X*Q) / V` with
//! series losses folded into the branch flows. Accurate enough for
//! medium-voltage feeders with moderate R/X ratios.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

use super::{PowerFlowSolver, SolveOutcome, SolverError};
use crate::domain::{BusKind, GridTopology, VoltageMeasurement};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepSolverConfig {
    pub max_iterations: u32,
    /// Largest voltage update (pu) accepted as converged.
    pub tolerance_pu: f64,
}

impl Default for SweepSolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            tolerance_pu: 1e-6,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SweepSolver {
    config: SweepSolverConfig,
}

impl SweepSolver {
    pub fn new(config: SweepSolverConfig) -> Self {
        Self { config }
    }

    /// Run the sweep on the calling thread.
    pub fn solve_blocking(&self, topology: &GridTopology) -> Result<SolveOutcome, SolverError> {
        let feeder = RadialFeeder::build(topology)?;
        let n = topology.buses.len();
        let mut voltage = vec![topology.slack_voltage_pu; n];

        for iteration in 1..=self.config.max_iterations {
            // Backward sweep: accumulate branch flows from the leaves up
            let mut downstream_p = vec![0.0; n];
            let mut downstream_q = vec![0.0; n];
            let mut branch_p = vec![0.0; n];
            let mut branch_q = vec![0.0; n];

            for &bus in feeder.order.iter().rev() {
                let Some((parent, line)) = feeder.parent[bus] else {
                    continue;
                };
                let line = &topology.lines[line];
                let p = topology.buses[bus].p_pu + downstream_p[bus];
                let q = topology.buses[bus].q_pu + downstream_q[bus];
                let loss = (p * p + q * q) / (voltage[bus] * voltage[bus]);

                branch_p[bus] = p + line.r_pu * loss;
                branch_q[bus] = q + line.x_pu * loss;
                downstream_p[parent] += branch_p[bus];
                downstream_q[parent] += branch_q[bus];
            }

            // Forward sweep: update voltages from the slack outwards
            let mut max_delta: f64 = 0.0;
            for &bus in &feeder.order {
                let Some((parent, line)) = feeder.parent[bus] else {
                    continue;
                };
                let line = &topology.lines[line];
                let upstream = voltage[parent];
                let updated = upstream - (line.r_pu * branch_p[bus] + line.x_pu * branch_q[bus]) / upstream;

                if !updated.is_finite() || updated <= 0.0 {
                    return Ok(SolveOutcome::NonConverged {
                        diagnostic: format!(
                            "voltage collapse at bus {} in iteration {}",
                            topology.buses[bus].id, iteration
                        ),
                    });
                }

                max_delta = max_delta.max((updated - voltage[bus]).abs());
                voltage[bus] = updated;
            }

            if max_delta < self.config.tolerance_pu {
                debug!(iterations = iteration, "sweep converged");
                let measurements = topology
                    .buses
                    .iter()
                    .zip(voltage)
                    .map(|(bus, v)| VoltageMeasurement::new(bus.id.clone(), v))
                    .collect();
                return Ok(SolveOutcome::Converged {
                    measurements,
                    iterations: iteration,
                });
            }
        }

        Ok(SolveOutcome::NonConverged {
            diagnostic: format!(
                "no convergence after {} iterations",
                self.config.max_iterations
            ),
        })
    }
}

#[async_trait]
impl PowerFlowSolver for SweepSolver {
    async fn solve(&self, topology: &GridTopology) -> Result<SolveOutcome, SolverError> {
        let solver = self.clone();
        let topology = topology.clone();
        tokio::task::spawn_blocking(move || solver.solve_blocking(&topology))
            .await
            .map_err(|e| SolverError::Crashed(e.to_string()))?
    }
}

/// Spanning tree of a radial feeder rooted at the slack bus
struct RadialFeeder {
    /// Buses in breadth-first order from the slack.
    order: Vec<usize>,
    /// Upstream bus and connecting line for every non-slack bus.
    parent: Vec<Option<(usize, usize)>>,
}

impl RadialFeeder {
    fn build(topology: &GridTopology) -> Result<Self, SolverError> {
        let slack_count = topology
            .buses
            .iter()
            .filter(|b| b.kind == BusKind::Slack)
            .count();
        if slack_count != 1 {
            return Err(SolverError::Unsupported(format!(
                "expected exactly one slack bus, found {slack_count}"
            )));
        }

        let n = topology.buses.len();
        if topology.lines.len() + 1 != n {
            return Err(SolverError::Unsupported(format!(
                "feeder is not radial: {} buses, {} lines",
                n,
                topology.lines.len()
            )));
        }

        let index: HashMap<&str, usize> = topology
            .buses
            .iter()
            .enumerate()
            .map(|(i, b)| (b.id.as_str(), i))
            .collect();

        let mut adjacency: Vec<Vec<(usize, usize)>> = vec![Vec::new(); n];
        for (line_idx, line) in topology.lines.iter().enumerate() {
            let (Some(&from), Some(&to)) = (index.get(line.from.as_str()), index.get(line.to.as_str()))
            else {
                return Err(SolverError::Unsupported(format!(
                    "line {} -> {} references an unknown bus",
                    line.from, line.to
                )));
            };
            adjacency[from].push((to, line_idx));
            adjacency[to].push((from, line_idx));
        }

        let slack = topology
            .buses
            .iter()
            .position(|b| b.kind == BusKind::Slack)
            .ok_or_else(|| SolverError::Unsupported("no slack bus".to_string()))?;

        let mut parent = vec![None; n];
        let mut visited = vec![false; n];
        let mut order = Vec::with_capacity(n);
        let mut queue = VecDeque::from([slack]);
        visited[slack] = true;

        while let Some(bus) = queue.pop_front() {
            order.push(bus);
            for &(next, line) in &adjacency[bus] {
                if !visited[next] {
                    visited[next] = true;
                    parent[next] = Some((bus, line));
                    queue.push_back(next);
                }
            }
        }

        if order.len() != n {
            return Err(SolverError::Unsupported(format!(
                "{} buses are not connected to the slack",
                n - order.len()
            )));
        }

        Ok(Self { order, parent })
    }
}
