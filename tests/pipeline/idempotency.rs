use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use grid_compliance::compliance::{evaluate, TolerancePolicy};
use grid_compliance::domain::{GridScenario, ModelReference, VoltageMeasurement};
use grid_compliance::pipeline::{run_batch, Completion, PipelineOutcome, PipelineState};
use grid_compliance::repo::{
    AuditEntry, AuditStore, MemoryAuditStore, MemoryModelStore, Precondition, Reservation,
};

use super::{orchestrator, FixedSolver, FEEDER};

fn feeder_store() -> (Arc<MemoryModelStore>, GridScenario) {
    let models = Arc::new(MemoryModelStore::new());
    let reference = ModelReference::new("scenarios/feeder.json");
    models.insert(reference.clone(), FEEDER);
    let scenario = GridScenario::from_upload(reference, FEEDER.as_bytes(), Utc::now());
    (models, scenario)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicates_record_once() {
    let (models, scenario) = feeder_store();
    let audit = Arc::new(MemoryAuditStore::new());
    let solver = FixedSolver::new(&[("trafo", 1.0), ("n1", 0.97)], Duration::from_millis(20));
    let orchestrator = Arc::new(orchestrator(models, solver.clone(), audit.clone(), "worker-a"));

    let duplicates = vec![scenario.clone(); 24];
    let summary = run_batch(orchestrator, duplicates, 24).await;

    assert_eq!(summary.reports.len(), 24);
    assert_eq!(summary.lost, 0);
    assert_eq!(summary.done(), 24, "every duplicate must end Done");
    assert_eq!(summary.created(), 1, "exactly one invocation writes the record");
    assert_eq!(solver.calls(), 1, "duplicates must not re-run the solver");
    assert_eq!(audit.committed_records().len(), 1);
    assert_eq!(audit.committed_records()[0].scenario_key, scenario.scenario_key);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_duplicates_across_workers_record_once() {
    let (models, scenario) = feeder_store();
    let audit = Arc::new(MemoryAuditStore::new());

    let solver = FixedSolver::new(&[("trafo", 1.0), ("n1", 0.95)], Duration::from_millis(20));

    // Independent workers share nothing but the audit store.
    let handles = (0..8).map(|i| {
        let worker = orchestrator(
            models.clone(),
            solver.clone(),
            audit.clone(),
            &format!("worker-{i}"),
        );
        let scenario = scenario.clone();
        tokio::spawn(async move { worker.process(scenario).await })
    });
    let reports: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert!(reports.iter().all(|r| r.outcome.state() == PipelineState::Done));
    let created = reports
        .iter()
        .filter(|r| matches!(r.outcome, PipelineOutcome::Done(Completion::Committed(_))))
        .count();
    assert_eq!(created, 1);
    assert_eq!(solver.calls(), 1);
    assert_eq!(audit.committed_records().len(), 1);
}

#[tokio::test]
async fn test_distinct_scenarios_are_independent() {
    let models = Arc::new(MemoryModelStore::new());
    let mut scenarios = Vec::new();
    for i in 0..5 {
        let reference = ModelReference::new(format!("scenarios/feeder-{i}.json"));
        let content = FEEDER.replace("test-feeder", &format!("feeder-{i}"));
        models.insert(reference.clone(), content.clone());
        scenarios.push(GridScenario::from_upload(reference, content.as_bytes(), Utc::now()));
    }
    let audit = Arc::new(MemoryAuditStore::new());
    let solver = FixedSolver::new(&[("trafo", 1.0)], Duration::ZERO);
    let orchestrator = Arc::new(orchestrator(models, solver.clone(), audit.clone(), "worker-a"));

    let summary = run_batch(orchestrator, scenarios, 2).await;

    assert_eq!(summary.created(), 5);
    assert_eq!(audit.committed_records().len(), 5);
    assert_eq!(solver.calls(), 5);
}

#[tokio::test]
async fn test_record_reads_back_identical_verdict() {
    let (models, scenario) = feeder_store();
    let audit = Arc::new(MemoryAuditStore::new());
    let voltages = [("A", 1.00), ("B", 0.85), ("C", 1.12)];
    let solver = FixedSolver::new(&voltages, Duration::ZERO);
    let orchestrator = orchestrator(models, solver, audit.clone(), "worker-a");

    orchestrator.process(scenario.clone()).await;

    let expected = evaluate(
        &voltages
            .iter()
            .map(|(n, v)| VoltageMeasurement::new(*n, *v))
            .collect::<Vec<_>>(),
        &TolerancePolicy::default(),
    )
    .unwrap();

    let Some(AuditEntry::Committed(record)) = audit.get(&scenario.scenario_key).await.unwrap() else {
        panic!("record not committed");
    };
    let verdict = record.verdict.clone().expect("converged record carries a verdict");
    assert_eq!(verdict.compliant, expected.compliant);
    assert_eq!(verdict.violations, expected.violations);
    assert_eq!(verdict.min_voltage, 0.85);
    assert_eq!(verdict.max_voltage, 1.12);

    // Survives the JSON encoding used by durable stores
    let json = serde_json::to_string(&AuditEntry::Committed(record)).unwrap();
    let AuditEntry::Committed(back) = serde_json::from_str::<AuditEntry>(&json).unwrap() else {
        panic!("wrong entry state");
    };
    assert_eq!(back.verdict, Some(verdict));
}

#[tokio::test]
async fn test_live_reservation_elsewhere_short_circuits() {
    let (models, scenario) = feeder_store();
    let audit = Arc::new(MemoryAuditStore::new());
    let now = Utc::now();
    audit
        .conditional_put(
            &scenario.scenario_key,
            AuditEntry::Reserved(Reservation {
                token: Uuid::new_v4(),
                holder: "worker-elsewhere".to_string(),
                reserved_at: now,
                expires_at: now + ChronoDuration::minutes(10),
            }),
            Precondition::Absent,
        )
        .await
        .unwrap();
    let solver = FixedSolver::new(&[("trafo", 1.0)], Duration::ZERO);
    let orchestrator = orchestrator(models, solver.clone(), audit.clone(), "worker-a");

    let report = orchestrator.process(scenario).await;

    match report.outcome {
        PipelineOutcome::Done(Completion::InFlight(r)) => assert_eq!(r.holder, "worker-elsewhere"),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(solver.calls(), 0);
    assert!(audit.committed_records().is_empty());
}

#[tokio::test]
async fn test_expired_reservation_of_crashed_worker_is_recovered() {
    let (models, scenario) = feeder_store();
    let audit = Arc::new(MemoryAuditStore::new());
    let long_ago = Utc::now() - ChronoDuration::hours(2);
    audit
        .conditional_put(
            &scenario.scenario_key,
            AuditEntry::Reserved(Reservation {
                token: Uuid::new_v4(),
                holder: "worker-crashed".to_string(),
                reserved_at: long_ago,
                expires_at: long_ago + ChronoDuration::minutes(15),
            }),
            Precondition::Absent,
        )
        .await
        .unwrap();
    let solver = FixedSolver::new(&[("trafo", 1.0)], Duration::ZERO);
    let orchestrator = orchestrator(models, solver.clone(), audit.clone(), "worker-b");

    let report = orchestrator.process(scenario).await;

    assert!(matches!(report.outcome, PipelineOutcome::Done(Completion::Committed(_))));
    assert_eq!(audit.committed_records()[0].processed_by, "worker-b");
}
