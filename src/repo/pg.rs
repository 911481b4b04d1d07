#![cfg(feature = "db")]

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, types::Json, PgPool, Row};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use super::{AuditEntry, AuditStore, Precondition, PutOutcome, StoreError};
use crate::domain::ScenarioKey;

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS compliance_audit (
        scenario_key TEXT PRIMARY KEY,
        state        TEXT NOT NULL,
        token        TEXT,
        entry        JSONB NOT NULL,
        updated_at   TIMESTAMPTZ NOT NULL DEFAULT now()
    )
"#;

/// Audit store on a Postgres table keyed by scenario key.
///
/// The primary key constraint provides the first-writer-wins semantics;
/// a committed row is never matched by the guarded update.
pub struct PgAuditStore {
    pool: PgPool,
}

impl PgAuditStore {
    /// Connect with exponential backoff, then check the pool answers.
    pub async fn connect(url: &str, max_attempts: usize) -> Result<Self> {
        let mut attempt = 0;
        let mut delay = Duration::from_secs(1);

        let pool = loop {
            attempt += 1;
            let connected = PgPoolOptions::new()
                .max_connections(10)
                .acquire_timeout(Duration::from_secs(30))
                .connect(url)
                .await;
            match connected {
                Ok(pool) => break pool,
                Err(e) if attempt >= max_attempts => {
                    return Err(e).context(format!(
                        "failed to connect to audit database after {max_attempts} attempts"
                    ));
                }
                Err(e) => {
                    warn!(attempt, max_attempts, error = %e, ?delay, "audit database connection failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        };

        sqlx::query("SELECT 1")
            .fetch_one(&pool)
            .await
            .context("audit database health check failed")?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        info!("compliance_audit table ready");
        Ok(())
    }

    async fn fetch(&self, key: &ScenarioKey) -> Result<Option<AuditEntry>, StoreError> {
        let row = sqlx::query("SELECT entry FROM compliance_audit WHERE scenario_key = $1")
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;

        match row {
            None => Ok(None),
            Some(row) => {
                let Json(entry): Json<AuditEntry> =
                    row.try_get("entry").map_err(|e| StoreError::Corrupt {
                        key: key.to_string(),
                        reason: e.to_string(),
                    })?;
                Ok(Some(entry))
            }
        }
    }
}

fn unavailable(e: sqlx::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn token_of(entry: &AuditEntry) -> Option<String> {
    match entry {
        AuditEntry::Reserved(r) => Some(r.token.to_string()),
        AuditEntry::Committed(_) => None,
    }
}

#[async_trait]
impl AuditStore for PgAuditStore {
    async fn conditional_put(
        &self,
        key: &ScenarioKey,
        entry: AuditEntry,
        precondition: Precondition,
    ) -> Result<PutOutcome, StoreError> {
        let state = entry.state();
        let token = token_of(&entry);

        let result = match precondition {
            Precondition::Absent => {
                sqlx::query(
                    r#"
                    INSERT INTO compliance_audit (scenario_key, state, token, entry)
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT (scenario_key) DO NOTHING
                    "#,
                )
                .bind(key.as_str())
                .bind(state)
                .bind(token)
                .bind(Json(&entry))
                .execute(&self.pool)
                .await
            }
            Precondition::ReservedBy(expected) => {
                sqlx::query(
                    r#"
                    UPDATE compliance_audit
                    SET state = $2, token = $3, entry = $4, updated_at = now()
                    WHERE scenario_key = $1 AND state = 'reserved' AND token = $5
                    "#,
                )
                .bind(key.as_str())
                .bind(state)
                .bind(token)
                .bind(Json(&entry))
                .bind(expected.to_string())
                .execute(&self.pool)
                .await
            }
        }
        .map_err(unavailable)?;

        if result.rows_affected() == 1 {
            Ok(PutOutcome::Written)
        } else {
            Ok(PutOutcome::Conflict {
                existing: self.fetch(key).await?,
            })
        }
    }

    async fn get(&self, key: &ScenarioKey) -> Result<Option<AuditEntry>, StoreError> {
        self.fetch(key).await
    }

    async fn delete_reservation(&self, key: &ScenarioKey, token: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "DELETE FROM compliance_audit WHERE scenario_key = $1 AND state = 'reserved' AND token = $2",
        )
        .bind(key.as_str())
        .bind(token.to_string())
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(result.rows_affected() == 1)
    }
}
