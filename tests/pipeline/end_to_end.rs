use chrono::Utc;
use std::sync::Arc;

use grid_compliance::domain::{GridScenario, SolverStatus, ViolationKind};
use grid_compliance::pipeline::{run_batch, PipelineOutcome};
use grid_compliance::power_flow::SweepSolver;
use grid_compliance::repo::{FsModelStore, MemoryAuditStore, ModelStore};

use super::orchestrator;

fn radial(name: &str, load: (f64, f64)) -> String {
    format!(
        r#"{{
            "name": "{name}",
            "buses": [
                {{"id": "trafo", "kind": "slack"}},
                {{"id": "n1", "p_pu": {p}, "q_pu": {q}}}
            ],
            "lines": [{{"from": "trafo", "to": "n1", "r_pu": 0.05, "x_pu": 0.05}}]
        }}"#,
        p = load.0,
        q = load.1,
    )
}

const MESHED: &str = r#"{
    "buses": [
        {"id": "trafo", "kind": "slack"},
        {"id": "a", "p_pu": 0.1},
        {"id": "b", "p_pu": 0.1}
    ],
    "lines": [
        {"from": "trafo", "to": "a", "r_pu": 0.05, "x_pu": 0.05},
        {"from": "a", "to": "b", "r_pu": 0.05, "x_pu": 0.05},
        {"from": "b", "to": "trafo", "r_pu": 0.05, "x_pu": 0.05}
    ]
}"#;

#[tokio::test]
async fn test_batch_over_model_directory() {
    let dir = tempfile::tempdir().unwrap();
    let files = [
        ("light.json", radial("light", (0.5, 0.2))),
        ("overloaded.json", radial("overloaded", (2.0, 0.0))),
        ("collapse.json", radial("collapse", (20.0, 5.0))),
        ("meshed.json", MESHED.to_string()),
    ];
    for (name, content) in &files {
        std::fs::write(dir.path().join(name), content).unwrap();
    }
    std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    let store = Arc::new(FsModelStore::new(dir.path()));
    let mut scenarios = Vec::new();
    for reference in store.list().await.unwrap() {
        let bytes = store.fetch(&reference).await.unwrap();
        scenarios.push(GridScenario::from_upload(reference, &bytes, Utc::now()));
    }
    assert_eq!(scenarios.len(), 4);

    let audit = Arc::new(MemoryAuditStore::new());
    let orchestrator = Arc::new(orchestrator(
        store,
        Arc::new(SweepSolver::default()),
        audit.clone(),
        "gridcheck-test",
    ));

    let summary = run_batch(orchestrator, scenarios, 4).await;
    assert!(summary.is_clean(), "{:?}", summary.reports);
    assert_eq!(summary.created(), 4);

    let records = audit.committed_records();
    let by_model = |name: &str| {
        records
            .iter()
            .find(|r| r.model_reference.as_str() == name)
            .unwrap_or_else(|| panic!("no record for {name}"))
    };

    let light = by_model("light.json");
    assert_eq!(light.solver_status, SolverStatus::Converged);
    assert_eq!(light.status_label(), "PASS");

    let overloaded = by_model("overloaded.json");
    assert_eq!(overloaded.status_label(), "FAIL");
    let verdict = overloaded.verdict.as_ref().unwrap();
    assert_eq!(verdict.count_of(ViolationKind::Undervoltage), 1);
    assert_eq!(verdict.worst_violation().map(|v| v.node_id.as_str()), Some("n1"));

    let collapse = by_model("collapse.json");
    assert_eq!(collapse.solver_status, SolverStatus::NonConverged);
    assert!(collapse.verdict.is_none());
    assert!(collapse.diagnostic.is_some());
    assert_eq!(collapse.status_label(), "ERROR");

    let meshed = by_model("meshed.json");
    assert_eq!(meshed.solver_status, SolverStatus::Error);
    assert!(meshed.verdict.is_none());
}

#[tokio::test]
async fn test_rerun_of_same_directory_writes_nothing_new() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("light.json"), radial("light", (0.5, 0.2))).unwrap();

    let store = Arc::new(FsModelStore::new(dir.path()));
    let reference = store.list().await.unwrap().remove(0);
    let bytes = store.fetch(&reference).await.unwrap();
    let scenario = GridScenario::from_upload(reference, &bytes, Utc::now());

    let audit = Arc::new(MemoryAuditStore::new());
    let orchestrator = Arc::new(orchestrator(
        store,
        Arc::new(SweepSolver::default()),
        audit.clone(),
        "gridcheck-test",
    ));

    let first = run_batch(orchestrator.clone(), vec![scenario.clone()], 1).await;
    let second = run_batch(orchestrator, vec![scenario], 1).await;

    assert_eq!(first.created(), 1);
    assert_eq!(second.created(), 0);
    assert_eq!(second.done(), 1);
    assert_eq!(audit.len(), 1);

    let PipelineOutcome::Done(again) = &second.reports[0].outcome else {
        panic!("rerun did not finish Done");
    };
    assert_eq!(again.record(), audit.committed_records().first());
}

#[tokio::test]
async fn test_edited_model_is_a_new_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("feeder.json");
    std::fs::write(&path, radial("feeder", (0.5, 0.2))).unwrap();

    let store = Arc::new(FsModelStore::new(dir.path()));
    let reference = store.list().await.unwrap().remove(0);
    let original = GridScenario::from_upload(
        reference.clone(),
        &store.fetch(&reference).await.unwrap(),
        Utc::now(),
    );

    let audit = Arc::new(MemoryAuditStore::new());
    let orchestrator = orchestrator(
        store.clone(),
        Arc::new(SweepSolver::default()),
        audit.clone(),
        "gridcheck-test",
    );
    orchestrator.process(original.clone()).await;

    std::fs::write(&path, radial("feeder", (2.0, 0.0))).unwrap();
    let edited = GridScenario::from_upload(
        reference.clone(),
        &store.fetch(&reference).await.unwrap(),
        Utc::now(),
    );
    assert_ne!(edited.scenario_key, original.scenario_key);

    orchestrator.process(edited).await;
    assert_eq!(audit.committed_records().len(), 2);

    // The original trigger now points at content that no longer exists.
    let stale = orchestrator
        .process(GridScenario {
            scenario_key: grid_compliance::domain::ScenarioKey::derive(
                &reference,
                &grid_compliance::domain::ContentFingerprint::of(b"{}"),
            ),
            ..original
        })
        .await;
    assert_eq!(
        stale.outcome.state(),
        grid_compliance::pipeline::PipelineState::Rejected
    );
}
