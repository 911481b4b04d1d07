//! Compliance evaluation pipeline
//!
//! Per-scenario state machine:
//!
//! ```text
//! Received -> Solving -> Evaluating -> Reserving -> Committing -> Done
//!     |          |            |            |             |
//!     +-> Rejected            +------------+-------------+-> Failed
//! ```
//!
//! Workers share nothing but the audit store. Duplicate triggers for the same
//! scenario key are absorbed by the [`IdempotencyGuard`]: the lease is claimed
//! while `Received`, before the model is loaded, so exactly one worker solves and
//! commits; every other one finishes `Done` without solving or writing.
//! `Reserving` re-confirms the held lease before the commit.

pub mod batch;
pub mod builder;
pub mod error;
pub mod guard;
pub mod orchestrator;
pub mod policy;

pub use batch::{run_batch, BatchSummary};
pub use builder::{RecordBuilder, RecordError};
pub use error::{ErrorClass, PipelineError};
pub use guard::{CommitOutcome, Existing, IdempotencyGuard, ReservationToken, ReserveOutcome};
pub use orchestrator::{
    Completion, Orchestrator, PipelineOutcome, PipelineState, RuleSet, ScenarioReport,
};
pub use policy::{Deadline, PipelinePolicy, RetryPolicy};
