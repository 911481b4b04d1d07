use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use grid_compliance::{config, pipeline, power_flow, repo, telemetry};
use config::Config;
use pipeline::{run_batch, Orchestrator, PipelineOutcome, RuleSet};
use power_flow::SweepSolver;
use repo::{FsModelStore, ModelStore, Repositories};
use std::sync::Arc;
use telemetry::init_tracing;
use tracing::{info, warn};
use uuid::Uuid;

use grid_compliance::domain::{GridScenario, ModelReference};

/// Evaluate grid models against the configured voltage band and record the verdicts.
#[derive(Debug, Parser)]
#[command(name = "gridcheck", version)]
struct Args {
    /// Configuration file (overridable with GRIDCHK__* environment variables).
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    /// Model references relative to `storage.models_dir`; every `*.json` there when omitted.
    models: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let args = Args::parse();
    let cfg = Config::load_from(&args.config)?;

    let repos = Repositories::new(&cfg).await?;
    let store = FsModelStore::new(&cfg.storage.models_dir);

    let worker_id = cfg
        .pipeline
        .worker_id
        .clone()
        .unwrap_or_else(|| format!("gridcheck-{}", Uuid::new_v4().simple()));

    let orchestrator = Arc::new(Orchestrator::new(
        repos.models.clone(),
        Arc::new(SweepSolver::new(cfg.solver_config())),
        repos.audit.clone(),
        RuleSet {
            tolerance: cfg.tolerance,
            rule_version: cfg.rules.rule_version.clone(),
            standard: cfg.rules.standard.clone(),
        },
        cfg.pipeline.policy(),
        worker_id.clone(),
    ));

    let references = if args.models.is_empty() {
        store.list().await?
    } else {
        args.models.into_iter().map(ModelReference::new).collect()
    };

    // Fingerprint each upload the way the ingestion trigger would.
    let mut scenarios = Vec::with_capacity(references.len());
    let mut unresolved = 0usize;
    for reference in references {
        match store.fetch(&reference).await {
            Ok(bytes) => scenarios.push(GridScenario::from_upload(reference, &bytes, Utc::now())),
            Err(e) => {
                warn!(model = %reference, error = %e, "cannot read model, not submitted");
                unresolved += 1;
            }
        }
    }

    info!(
        %worker_id,
        models_dir = %store.root().display(),
        scenarios = scenarios.len(),
        standard = %cfg.rules.standard,
        rule_version = %cfg.rules.rule_version,
        "starting compliance batch"
    );

    let summary = tokio::select! {
        summary = run_batch(orchestrator, scenarios, cfg.pipeline.max_concurrency) => summary,
        _ = telemetry::shutdown_signal() => {
            anyhow::bail!("interrupted, outstanding scenarios left to the next trigger");
        }
    };

    for report in &summary.reports {
        let PipelineOutcome::Done(completion) = &report.outcome else {
            continue;
        };
        let Some(record) = completion.record() else {
            continue;
        };
        let worst = record.verdict.as_ref().and_then(|v| v.worst_violation());
        info!(
            model = %report.scenario.model_reference,
            status = record.status_label(),
            solver_status = %record.solver_status,
            worst_node = worst.map(|v| v.node_id.as_str()),
            worst_voltage_pu = worst.map(|v| v.voltage_pu),
            "scenario result"
        );
    }

    info!(
        total = summary.reports.len(),
        created = summary.created(),
        done = summary.done(),
        rejected = summary.rejected(),
        failed = summary.failed(),
        lost = summary.lost,
        unresolved,
        "compliance batch finished"
    );

    if !summary.is_clean() || unresolved > 0 {
        anyhow::bail!(
            "{} rejected, {} failed, {} lost, {} unreadable",
            summary.rejected(),
            summary.failed(),
            summary.lost,
            unresolved
        );
    }
    Ok(())
}
