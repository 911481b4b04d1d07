use anyhow::{Context, Result};
use figment::{providers::{Env, Format, Toml}, Figment};
use serde::Deserialize;
use std::time::Duration;
use validator::{Validate, ValidationError};

use crate::compliance::TolerancePolicy;
use crate::pipeline::{PipelinePolicy, RetryPolicy};
use crate::power_flow::SweepSolverConfig;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct Config {
    #[validate(custom(function = "validate_tolerance"))]
    pub tolerance: TolerancePolicy,
    #[validate(nested)]
    pub rules: RulesConfig,
    #[validate(nested)]
    pub pipeline: PipelineConfig,
    #[validate(nested)]
    pub solver: SolverConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RulesConfig {
    /// Tag recorded on every compliance record.
    #[validate(length(min = 1))]
    pub rule_version: String,
    #[validate(length(min = 1))]
    pub standard: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "validate_deadlines"))]
pub struct PipelineConfig {
    #[validate(range(min = 1, max = 20))]
    pub max_solver_retries: u32,
    #[validate(range(min = 1, max = 20))]
    pub max_storage_retries: u32,
    #[validate(range(max = 5))]
    pub contract_retries: u32,
    #[validate(range(min = 1))]
    pub initial_backoff_ms: u64,
    #[validate(range(min = 1))]
    pub max_backoff_ms: u64,
    #[validate(range(min = 1))]
    pub per_call_timeout_ms: u64,
    #[validate(range(min = 1))]
    pub deadline_ms: u64,
    #[validate(range(min = 1))]
    pub reservation_ttl_ms: u64,
    #[validate(range(min = 1, max = 1024))]
    pub max_concurrency: usize,
    #[serde(default)]
    pub worker_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SolverConfig {
    #[validate(range(min = 1, max = 10000))]
    pub max_iterations: u32,
    #[validate(range(exclusive_min = 0.0, max = 0.1))]
    pub tolerance_pu: f64,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub models_dir: String,
    pub backend: StorageBackend,
    #[serde(default)]
    pub db_url: String,
}

fn validate_tolerance(tolerance: &TolerancePolicy) -> Result<(), ValidationError> {
    tolerance.validate().map_err(|reason| {
        let mut err = ValidationError::new("tolerance_band");
        err.message = Some(reason.into());
        err
    })
}

fn validate_deadlines(pipeline: &PipelineConfig) -> Result<(), ValidationError> {
    if pipeline.per_call_timeout_ms >= pipeline.deadline_ms {
        return Err(ValidationError::new("per_call_timeout_must_be_below_deadline"));
    }
    if pipeline.initial_backoff_ms > pipeline.max_backoff_ms {
        return Err(ValidationError::new("initial_backoff_exceeds_max_backoff"));
    }
    Ok(())
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from("config/default.toml")
    }

    pub fn load_from(path: &str) -> Result<Self> {
        let figment = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("GRIDCHK__").split("__"));
        Self::extract(figment)
    }

    fn extract(figment: Figment) -> Result<Self> {
        let cfg: Config = figment.extract().context("invalid configuration")?;
        cfg.validate().context("configuration failed validation")?;
        Ok(cfg)
    }

    pub fn solver_config(&self) -> SweepSolverConfig {
        SweepSolverConfig {
            max_iterations: self.solver.max_iterations,
            tolerance_pu: self.solver.tolerance_pu,
        }
    }
}

impl PipelineConfig {
    pub fn policy(&self) -> PipelinePolicy {
        let backoff = |retries: u32| RetryPolicy {
            max_attempts: retries + 1,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        };
        PipelinePolicy {
            solver_retry: backoff(self.max_solver_retries),
            storage_retry: backoff(self.max_storage_retries),
            contract_retries: self.contract_retries,
            per_call_timeout: Duration::from_millis(self.per_call_timeout_ms),
            deadline: Duration::from_millis(self.deadline_ms),
            reservation_ttl: Duration::from_millis(self.reservation_ttl_ms),
        }
    }
}
