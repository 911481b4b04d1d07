use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::guard::{CommitOutcome, Existing, IdempotencyGuard, ReservationToken, ReserveOutcome};
use super::policy::{Deadline, PipelinePolicy, RetryPolicy, Transient};
use super::{PipelineError, RecordBuilder};
use crate::compliance::{evaluate, EvaluationError, TolerancePolicy};
use crate::domain::{
    ComplianceRecord, ComplianceVerdict, GridScenario, GridTopology, ScenarioKey, SolverStatus,
};
use crate::power_flow::{PowerFlowSolver, SolveOutcome, SolverError};
use crate::repo::{AuditStore, LoadedModel, ModelLoadError, ModelStore, Reservation, StoreError};

/// Floor for the release call once the deadline is spent.
const MIN_RELEASE_BUDGET: Duration = Duration::from_millis(250);

/// Position of a scenario in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum PipelineState {
    Received,
    Solving,
    Evaluating,
    Reserving,
    Committing,
    Done,
    Rejected,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PipelineState::Done | PipelineState::Rejected | PipelineState::Failed
        )
    }
}

/// How a `Done` scenario was settled
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// This invocation wrote the record.
    Committed(ComplianceRecord),
    /// An earlier invocation had already written it.
    AlreadyCommitted(ComplianceRecord),
    /// Another live invocation holds the reservation.
    InFlight(Reservation),
}

impl Completion {
    pub fn record(&self) -> Option<&ComplianceRecord> {
        match self {
            Completion::Committed(r) | Completion::AlreadyCommitted(r) => Some(r),
            Completion::InFlight(_) => None,
        }
    }

    pub fn created_record(&self) -> bool {
        matches!(self, Completion::Committed(_))
    }
}

impl From<Existing> for Completion {
    fn from(existing: Existing) -> Self {
        match existing {
            Existing::Committed(record) => Completion::AlreadyCommitted(record),
            Existing::InFlight(reservation) => Completion::InFlight(reservation),
        }
    }
}

/// Terminal result handed back to the trigger
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    Done(Completion),
    Rejected {
        reason: String,
    },
    Failed {
        reason: String,
        class: super::ErrorClass,
        attempts: u32,
        retryable: bool,
    },
}

impl PipelineOutcome {
    pub fn state(&self) -> PipelineState {
        match self {
            PipelineOutcome::Done(_) => PipelineState::Done,
            PipelineOutcome::Rejected { .. } => PipelineState::Rejected,
            PipelineOutcome::Failed { .. } => PipelineState::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioReport {
    pub scenario: GridScenario,
    pub outcome: PipelineOutcome,
    /// States visited, in order, ending in the terminal state.
    pub trail: Vec<PipelineState>,
    pub solver_attempts: u32,
}

/// Band and labels applied to every record
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub tolerance: TolerancePolicy,
    pub rule_version: String,
    pub standard: String,
}

/// Per-invocation bookkeeping; never shared between scenarios.
struct Run {
    state: PipelineState,
    trail: Vec<PipelineState>,
    /// Attempts spent in the current retry loop.
    attempts: u32,
    solver_attempts: u32,
}

impl Run {
    fn new() -> Self {
        Self {
            state: PipelineState::Received,
            trail: vec![PipelineState::Received],
            attempts: 0,
            solver_attempts: 0,
        }
    }

    fn enter(&mut self, next: PipelineState) {
        debug_assert!(!self.state.is_terminal(), "transition out of {}", self.state);
        if self.state == next {
            return;
        }
        debug!(from = %self.state, to = %next, "state transition");
        self.state = next;
        self.trail.push(next);
    }
}

/// Result of the solve/evaluate phase
struct Solved {
    status: SolverStatus,
    verdict: Option<ComplianceVerdict>,
    diagnostic: Option<String>,
}

/// Drives one scenario at a time from receipt to a terminal state.
///
/// Holds only shared clients; all per-scenario state lives on the stack of
/// [`Orchestrator::process`], so one instance may serve any number of
/// concurrent invocations.
pub struct Orchestrator {
    models: Arc<dyn ModelStore>,
    solver: Arc<dyn PowerFlowSolver>,
    guard: IdempotencyGuard,
    builder: RecordBuilder,
    tolerance: TolerancePolicy,
    policy: PipelinePolicy,
}

impl Orchestrator {
    pub fn new(
        models: Arc<dyn ModelStore>,
        solver: Arc<dyn PowerFlowSolver>,
        audit: Arc<dyn AuditStore>,
        rules: RuleSet,
        policy: PipelinePolicy,
        worker_id: impl Into<String>,
    ) -> Self {
        let worker_id = worker_id.into();
        Self {
            models,
            solver,
            guard: IdempotencyGuard::new(audit, worker_id.clone(), policy.reservation_ttl),
            builder: RecordBuilder::new(rules.rule_version, rules.standard, worker_id),
            tolerance: rules.tolerance,
            policy,
        }
    }

    /// Process one scenario to a terminal state. Never panics on collaborator failure.
    pub async fn process(&self, scenario: GridScenario) -> ScenarioReport {
        let span = info_span!(
            "scenario",
            scenario_key = %scenario.scenario_key,
            model = %scenario.model_reference,
        );
        self.run(scenario).instrument(span).await
    }

    async fn run(&self, scenario: GridScenario) -> ScenarioReport {
        let deadline = Deadline::after(self.policy.deadline);
        let mut run = Run::new();
        info!(rule_version = %self.builder.rule_version(), "scenario received");

        let outcome = match self.drive(&scenario, &deadline, &mut run).await {
            Ok(completion) => {
                run.enter(PipelineState::Done);
                match &completion {
                    Completion::Committed(record) => info!(
                        status = record.status_label(),
                        solver_status = %record.solver_status,
                        violations = record.verdict.as_ref().map_or(0, |v| v.violations.len()),
                        "compliance record committed"
                    ),
                    Completion::AlreadyCommitted(record) => info!(
                        status = record.status_label(),
                        processed_by = %record.processed_by,
                        "scenario already recorded, nothing written"
                    ),
                    Completion::InFlight(r) => info!(
                        holder = %r.holder,
                        expires_at = %r.expires_at,
                        "scenario in flight on another worker, nothing written"
                    ),
                }
                PipelineOutcome::Done(completion)
            }
            Err(PipelineError::Input(reason)) => {
                run.enter(PipelineState::Rejected);
                warn!(%reason, "scenario rejected");
                PipelineOutcome::Rejected { reason }
            }
            Err(err) => {
                let failed_in = run.state;
                run.enter(PipelineState::Failed);
                if let PipelineError::Consistency(_) = err {
                    error!(alert = true, error = %err, state = %failed_in, "consistency defect, scenario not recorded");
                } else {
                    warn!(error = %err, state = %failed_in, attempts = run.attempts, "scenario failed");
                }
                PipelineOutcome::Failed {
                    reason: err.to_string(),
                    class: err.class(),
                    attempts: run.attempts,
                    retryable: err.is_retryable(),
                }
            }
        };

        ScenarioReport {
            scenario,
            outcome,
            trail: run.trail,
            solver_attempts: run.solver_attempts,
        }
    }

    async fn drive(
        &self,
        scenario: &GridScenario,
        deadline: &Deadline,
        run: &mut Run,
    ) -> Result<Completion, PipelineError> {
        let key = &scenario.scenario_key;
        let guard = &self.guard;

        // Retriggers of settled or in-flight scenarios skip the solver entirely.
        let existing = self
            .retry(
                &self.policy.storage_retry,
                deadline,
                run,
                move || guard.lookup(key),
                |e: StoreError| PipelineError::Consistency(e.to_string()),
            )
            .await?;
        if let Some(existing) = existing {
            return Ok(existing.into());
        }

        // Claim the key before any solver work so concurrent duplicates back off here.
        let claimed = self.claim(key, Uuid::new_v4(), deadline, run).await?;
        let token = match claimed {
            ReserveOutcome::Proceed(token) => token,
            ReserveOutcome::AlreadyProcessed(existing) => return Ok(existing.into()),
        };
        debug!(token = %token.token, "scenario claimed");

        let settled = self.evaluate_and_commit(scenario, &token, deadline, run).await;
        if settled.is_err() {
            self.release(&token, deadline).await;
        }
        settled
    }

    async fn claim(
        &self,
        key: &ScenarioKey,
        token: Uuid,
        deadline: &Deadline,
        run: &mut Run,
    ) -> Result<ReserveOutcome, PipelineError> {
        let guard = &self.guard;
        self.retry(
            &self.policy.storage_retry,
            deadline,
            run,
            move || guard.reserve_with(key, token),
            |e: StoreError| PipelineError::Consistency(e.to_string()),
        )
        .await
    }

    /// Everything after the claim; the caller releases `token` on error.
    async fn evaluate_and_commit(
        &self,
        scenario: &GridScenario,
        token: &ReservationToken,
        deadline: &Deadline,
        run: &mut Run,
    ) -> Result<Completion, PipelineError> {
        let model = self.load_model(scenario, deadline, run).await?;

        let solved = self.solve_and_evaluate(&model.topology, deadline, run).await?;
        let record = self.builder.build(
            scenario,
            solved.verdict,
            solved.status,
            solved.diagnostic,
            run.solver_attempts,
        )?;

        // The lease may have expired during a long solve and been taken over.
        run.enter(PipelineState::Reserving);
        match self.claim(&token.key, token.token, deadline, run).await? {
            ReserveOutcome::Proceed(_) => {}
            ReserveOutcome::AlreadyProcessed(existing) => return Ok(existing.into()),
        }

        run.enter(PipelineState::Committing);
        let guard = &self.guard;
        let committed = {
            let record = &record;
            self.retry(
                &self.policy.storage_retry,
                deadline,
                run,
                move || guard.commit(token, record),
                |e: StoreError| PipelineError::Consistency(e.to_string()),
            )
            .await?
        };

        Ok(match committed {
            CommitOutcome::Committed => Completion::Committed(record),
            CommitOutcome::Superseded(existing) => existing.into(),
        })
    }

    async fn load_model(
        &self,
        scenario: &GridScenario,
        deadline: &Deadline,
        run: &mut Run,
    ) -> Result<LoadedModel, PipelineError> {
        let models = &self.models;
        let reference = &scenario.model_reference;
        let model = self
            .retry(
                &self.policy.storage_retry,
                deadline,
                run,
                move || models.load(reference),
                |e: ModelLoadError| PipelineError::Input(e.to_string()),
            )
            .await?;

        if !scenario.scenario_key.matches(&model.fingerprint) {
            return Err(PipelineError::Input(format!(
                "content of {reference} changed since submission (now {})",
                model.fingerprint
            )));
        }

        debug!(buses = model.topology.buses.len(), "model loaded");
        Ok(model)
    }

    async fn solve_and_evaluate(
        &self,
        topology: &GridTopology,
        deadline: &Deadline,
        run: &mut Run,
    ) -> Result<Solved, PipelineError> {
        let mut transient_failures = 0u32;
        let mut contract_failures = 0u32;

        loop {
            run.enter(PipelineState::Solving);
            run.solver_attempts += 1;

            let solved = match self.bounded(deadline, self.solver.solve(topology)).await {
                Some(result) => result,
                None if deadline.is_expired() => {
                    return Err(PipelineError::DeadlineExceeded(PipelineState::Solving))
                }
                None => Err(SolverError::Timeout(self.policy.per_call_timeout)),
            };

            match solved {
                Ok(SolveOutcome::Converged {
                    measurements,
                    iterations,
                }) => {
                    run.enter(PipelineState::Evaluating);
                    debug!(iterations, nodes = measurements.len(), "load flow converged");

                    match evaluate(&measurements, &self.tolerance) {
                        Ok(verdict) => {
                            return Ok(Solved {
                                status: SolverStatus::Converged,
                                verdict: Some(verdict),
                                diagnostic: None,
                            })
                        }
                        Err(EvaluationError::InvalidTolerance(reason)) => {
                            return Err(PipelineError::Consistency(reason))
                        }
                        Err(err) => {
                            contract_failures += 1;
                            run.attempts = contract_failures;
                            if contract_failures > self.policy.contract_retries {
                                return Err(PipelineError::SolverContract(err));
                            }
                            warn!(error = %err, "solver returned unusable measurements, re-solving");
                        }
                    }
                }
                Ok(SolveOutcome::NonConverged { diagnostic }) => {
                    info!(%diagnostic, "load flow did not converge");
                    return Ok(Solved {
                        status: SolverStatus::NonConverged,
                        verdict: None,
                        diagnostic: Some(diagnostic),
                    });
                }
                Err(SolverError::Unsupported(reason)) => {
                    warn!(%reason, "solver refused the model");
                    return Ok(Solved {
                        status: SolverStatus::Error,
                        verdict: None,
                        diagnostic: Some(reason),
                    });
                }
                Err(err) => {
                    transient_failures += 1;
                    run.attempts = transient_failures;
                    let policy = &self.policy.solver_retry;
                    if transient_failures >= policy.max_attempts {
                        return Err(PipelineError::SolverTransient(format!(
                            "{err} (after {transient_failures} attempts)"
                        )));
                    }
                    let delay = policy.backoff(transient_failures);
                    warn!(
                        error = %err,
                        attempt = transient_failures,
                        max_attempts = policy.max_attempts,
                        ?delay,
                        "solver failed, retrying"
                    );
                    if !deadline.sleep_within(delay).await {
                        return Err(PipelineError::DeadlineExceeded(PipelineState::Solving));
                    }
                }
            }
        }
    }

    /// Run a storage call with the per-call timeout, retrying transient failures.
    ///
    /// Permanent failures are mapped through `fatal`.
    async fn retry<T, E, F, Fut>(
        &self,
        policy: &RetryPolicy,
        deadline: &Deadline,
        run: &mut Run,
        mut op: F,
        fatal: fn(E) -> PipelineError,
    ) -> Result<T, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transient + Display,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            run.attempts = attempt;

            let failure = match self.bounded(deadline, op()).await {
                Some(Ok(value)) => return Ok(value),
                Some(Err(err)) if !err.is_transient() => return Err(fatal(err)),
                Some(Err(err)) => err.to_string(),
                None => "call timed out".to_string(),
            };

            if deadline.is_expired() {
                return Err(PipelineError::DeadlineExceeded(run.state));
            }
            if attempt >= policy.max_attempts {
                return Err(PipelineError::StorageTransient(format!(
                    "{failure} (after {attempt} attempts)"
                )));
            }

            let delay = policy.backoff(attempt);
            warn!(
                error = %failure,
                attempt,
                max_attempts = policy.max_attempts,
                state = %run.state,
                ?delay,
                "storage call failed, retrying"
            );
            if !deadline.sleep_within(delay).await {
                return Err(PipelineError::DeadlineExceeded(run.state));
            }
        }
    }

    /// Await `fut` under the per-call timeout clipped to the deadline.
    async fn bounded<F: Future>(&self, deadline: &Deadline, fut: F) -> Option<F::Output> {
        let budget = deadline.call_budget(self.policy.per_call_timeout)?;
        tokio::time::timeout(budget, fut).await.ok()
    }

    /// Best-effort release; an unreleased lease still expires on its own.
    ///
    /// Bounded by what is left of the deadline, but always given at least
    /// [`MIN_RELEASE_BUDGET`] so an exhausted invocation still tries.
    async fn release(&self, token: &ReservationToken, deadline: &Deadline) {
        let budget = deadline
            .call_budget(self.policy.per_call_timeout)
            .unwrap_or_default()
            .max(MIN_RELEASE_BUDGET.min(self.policy.per_call_timeout));
        match tokio::time::timeout(budget, self.guard.release(token)).await {
            Ok(Ok(true)) => debug!("reservation released"),
            Ok(Ok(false)) => debug!("reservation already gone"),
            Ok(Err(err)) => warn!(error = %err, "could not release reservation, it will expire"),
            Err(_) => warn!(?budget, "releasing reservation timed out, it will expire"),
        }
    }
}
