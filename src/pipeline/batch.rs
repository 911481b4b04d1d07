use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::error;

use super::{Orchestrator, PipelineOutcome, ScenarioReport};
use crate::domain::GridScenario;

/// Reports of one fan-out run
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub reports: Vec<ScenarioReport>,
    /// Worker tasks that panicked or were cancelled.
    pub lost: usize,
}

impl BatchSummary {
    pub fn created(&self) -> usize {
        self.count(|o| matches!(o, PipelineOutcome::Done(c) if c.created_record()))
    }

    pub fn done(&self) -> usize {
        self.count(|o| matches!(o, PipelineOutcome::Done(_)))
    }

    pub fn rejected(&self) -> usize {
        self.count(|o| matches!(o, PipelineOutcome::Rejected { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, PipelineOutcome::Failed { .. }))
    }

    pub fn is_clean(&self) -> bool {
        self.lost == 0 && self.rejected() == 0 && self.failed() == 0
    }

    fn count(&self, pred: impl Fn(&PipelineOutcome) -> bool) -> usize {
        self.reports.iter().filter(|r| pred(&r.outcome)).count()
    }
}

/// Process `scenarios` as independent invocations, at most `max_concurrency` at once.
///
/// Reports come back in completion order.
pub async fn run_batch(
    orchestrator: Arc<Orchestrator>,
    scenarios: Vec<GridScenario>,
    max_concurrency: usize,
) -> BatchSummary {
    let permits = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for scenario in scenarios {
        let orchestrator = orchestrator.clone();
        let permits = permits.clone();
        tasks.spawn(async move {
            let _permit = permits.acquire_owned().await.ok();
            orchestrator.process(scenario).await
        });
    }

    let mut summary = BatchSummary::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(report) => summary.reports.push(report),
            Err(e) => {
                error!(error = %e, "scenario worker task lost");
                summary.lost += 1;
            }
        }
    }
    summary
}
