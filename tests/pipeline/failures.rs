use async_trait::async_trait;
use chrono::Utc;
use mockall::mock;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use grid_compliance::domain::{GridScenario, ModelReference, ScenarioKey};
use grid_compliance::pipeline::{Completion, ErrorClass, PipelineOutcome, PipelineState};
use grid_compliance::repo::{
    AuditEntry, AuditStore, LoadedModel, MemoryAuditStore, MemoryModelStore, ModelLoadError,
    ModelStore, Precondition, PutOutcome, StoreError,
};

use super::{orchestrator, FixedSolver, FEEDER};

mock! {
    pub Models {}

    #[async_trait]
    impl ModelStore for Models {
        async fn fetch(&self, reference: &ModelReference) -> Result<Vec<u8>, ModelLoadError>;
        async fn load(&self, reference: &ModelReference) -> Result<LoadedModel, ModelLoadError>;
    }
}

/// Audit store that injects faults in front of a healthy in-memory store.
#[derive(Default)]
struct FlakyAuditStore {
    inner: Arc<MemoryAuditStore>,
    /// Remaining puts that fail before touching the store.
    failing_puts: AtomicU32,
    /// Remaining unguarded puts that are applied but whose reply is lost.
    lost_acks: AtomicU32,
    /// Same for puts guarded by a reservation token.
    lost_guarded_acks: AtomicU32,
    /// Fail every write guarded by a reservation token.
    reject_guarded: AtomicBool,
    corrupt_reads: AtomicBool,
}

impl FlakyAuditStore {
    fn over(inner: Arc<MemoryAuditStore>) -> Self {
        Self {
            inner,
            ..Default::default()
        }
    }

    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl AuditStore for FlakyAuditStore {
    async fn conditional_put(
        &self,
        key: &ScenarioKey,
        entry: AuditEntry,
        precondition: Precondition,
    ) -> Result<PutOutcome, StoreError> {
        if Self::take(&self.failing_puts) {
            return Err(StoreError::Unavailable("connection reset".into()));
        }
        if matches!(precondition, Precondition::ReservedBy(_))
            && self.reject_guarded.load(Ordering::SeqCst)
        {
            return Err(StoreError::Timeout);
        }
        let lost = match precondition {
            Precondition::Absent => &self.lost_acks,
            Precondition::ReservedBy(_) => &self.lost_guarded_acks,
        };
        let outcome = self.inner.conditional_put(key, entry, precondition).await?;
        if Self::take(lost) {
            return Err(StoreError::Timeout);
        }
        Ok(outcome)
    }

    async fn get(&self, key: &ScenarioKey) -> Result<Option<AuditEntry>, StoreError> {
        if self.corrupt_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Corrupt {
                key: key.to_string(),
                reason: "unknown entry state".into(),
            });
        }
        self.inner.get(key).await
    }

    async fn delete_reservation(&self, key: &ScenarioKey, token: Uuid) -> Result<bool, StoreError> {
        self.inner.delete_reservation(key, token).await
    }
}

fn feeder() -> (Arc<MemoryModelStore>, GridScenario) {
    let models = Arc::new(MemoryModelStore::new());
    let reference = ModelReference::new("scenarios/feeder.json");
    models.insert(reference.clone(), FEEDER);
    let scenario = GridScenario::from_upload(reference, FEEDER.as_bytes(), Utc::now());
    (models, scenario)
}

fn solver() -> Arc<FixedSolver> {
    FixedSolver::new(&[("trafo", 1.0), ("n1", 0.96)], Duration::ZERO)
}

#[tokio::test]
async fn test_transient_store_failures_are_retried() {
    let (models, scenario) = feeder();
    let inner = Arc::new(MemoryAuditStore::new());
    let audit = Arc::new(FlakyAuditStore::over(inner.clone()));
    audit.failing_puts.store(2, Ordering::SeqCst);
    let orchestrator = orchestrator(models, solver(), audit, "worker-a");

    let report = orchestrator.process(scenario).await;

    assert!(matches!(report.outcome, PipelineOutcome::Done(Completion::Committed(_))));
    assert_eq!(
        report.trail,
        vec![
            PipelineState::Received,
            PipelineState::Solving,
            PipelineState::Evaluating,
            PipelineState::Reserving,
            PipelineState::Committing,
            PipelineState::Done,
        ]
    );
    assert_eq!(inner.committed_records().len(), 1);
}

#[tokio::test]
async fn test_lost_acknowledgements_do_not_duplicate_work() {
    let (models, scenario) = feeder();
    let inner = Arc::new(MemoryAuditStore::new());
    let audit = Arc::new(FlakyAuditStore::over(inner.clone()));
    // Both the claim and the commit are applied but their replies are lost.
    audit.lost_acks.store(1, Ordering::SeqCst);
    audit.lost_guarded_acks.store(1, Ordering::SeqCst);
    let solver = solver();
    let orchestrator = orchestrator(models, solver.clone(), audit, "worker-a");

    let report = orchestrator.process(scenario).await;

    match report.outcome {
        PipelineOutcome::Done(Completion::Committed(record)) => {
            assert_eq!(record.processed_by, "worker-a")
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(solver.calls(), 1);
    assert_eq!(inner.committed_records().len(), 1);
}

#[tokio::test]
async fn test_commit_failure_releases_reservation() {
    let (models, scenario) = feeder();
    let inner = Arc::new(MemoryAuditStore::new());
    let audit = Arc::new(FlakyAuditStore::over(inner.clone()));
    audit.reject_guarded.store(true, Ordering::SeqCst);
    let orchestrator = orchestrator(models.clone(), solver(), audit, "worker-a");

    let report = orchestrator.process(scenario.clone()).await;

    match report.outcome {
        PipelineOutcome::Failed {
            class, retryable, ..
        } => {
            assert_eq!(class, ErrorClass::StorageTransient);
            assert!(retryable);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(report.trail.last(), Some(&PipelineState::Failed));
    assert!(inner.is_empty(), "reservation must be released");

    // A later trigger against a healthy store goes straight through.
    let retry = super::orchestrator(models, solver(), inner.clone(), "worker-b");
    let report = retry.process(scenario).await;
    assert!(matches!(report.outcome, PipelineOutcome::Done(Completion::Committed(_))));
    assert_eq!(inner.committed_records()[0].processed_by, "worker-b");
}

#[tokio::test]
async fn test_corrupt_entry_is_a_consistency_failure() {
    let (models, scenario) = feeder();
    let audit = Arc::new(FlakyAuditStore::default());
    audit.corrupt_reads.store(true, Ordering::SeqCst);
    let solver = solver();
    let orchestrator = orchestrator(models, solver.clone(), audit, "worker-a");

    let report = orchestrator.process(scenario).await;

    match report.outcome {
        PipelineOutcome::Failed {
            class, retryable, ..
        } => {
            assert_eq!(class, ErrorClass::Consistency);
            assert!(!retryable);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(solver.calls(), 0);
}

#[tokio::test]
async fn test_model_store_outage_recovers() {
    let loaded = LoadedModel::parse(FEEDER.as_bytes()).unwrap();
    let scenario = GridScenario::from_upload(
        ModelReference::new("s3://models/feeder.json"),
        FEEDER.as_bytes(),
        Utc::now(),
    );

    let calls = Arc::new(AtomicU32::new(0));
    let mut models = MockModels::new();
    {
        let calls = calls.clone();
        models.expect_load().times(3).returning(move |_| {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ModelLoadError::Unavailable("503 from object store".into()))
            } else {
                Ok(loaded.clone())
            }
        });
    }
    models.expect_fetch().never();

    let audit = Arc::new(MemoryAuditStore::new());
    let orchestrator = orchestrator(Arc::new(models), solver(), audit.clone(), "worker-a");

    let report = orchestrator.process(scenario).await;

    assert!(matches!(report.outcome, PipelineOutcome::Done(Completion::Committed(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(audit.committed_records().len(), 1);
}

#[tokio::test]
async fn test_malformed_model_rejected_without_solving() {
    let scenario = GridScenario::from_upload(
        ModelReference::new("s3://models/broken.json"),
        b"not json",
        Utc::now(),
    );
    let mut models = MockModels::new();
    models
        .expect_load()
        .times(1)
        .returning(|_| Err(ModelLoadError::Malformed("expected value at line 1".into())));

    let audit = Arc::new(MemoryAuditStore::new());
    let solver = solver();
    let orchestrator = orchestrator(Arc::new(models), solver.clone(), audit.clone(), "worker-a");

    let report = orchestrator.process(scenario).await;

    assert!(matches!(report.outcome, PipelineOutcome::Rejected { .. }));
    assert_eq!(solver.calls(), 0);
    assert!(audit.is_empty());
}

#[tokio::test]
async fn test_model_store_down_fails_retryable() {
    let scenario = GridScenario::from_upload(
        ModelReference::new("s3://models/feeder.json"),
        FEEDER.as_bytes(),
        Utc::now(),
    );
    let mut models = MockModels::new();
    models
        .expect_load()
        .times(4)
        .returning(|_| Err(ModelLoadError::Unavailable("no route to host".into())));

    let orchestrator = orchestrator(
        Arc::new(models),
        solver(),
        Arc::new(MemoryAuditStore::new()),
        "worker-a",
    );

    let report = orchestrator.process(scenario).await;

    match report.outcome {
        PipelineOutcome::Failed {
            class,
            attempts,
            retryable,
            ..
        } => {
            assert_eq!(class, ErrorClass::StorageTransient);
            assert_eq!(attempts, 4);
            assert!(retryable);
        }
        other => panic!("unexpected {other:?}"),
    }
}
