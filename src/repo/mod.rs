//! Storage collaborators: uploaded grid models and the audit store.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::config::{Config, StorageBackend};
use crate::domain::{ComplianceRecord, ContentFingerprint, GridTopology, ModelReference, ScenarioKey};

pub mod memory;
pub mod models;

#[cfg(feature = "db")]
pub mod pg;

pub use memory::MemoryAuditStore;
pub use models::{FsModelStore, MemoryModelStore};

/// Failures while resolving a model reference
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelLoadError {
    #[error("model not found: {0}")]
    NotFound(String),
    #[error("invalid model reference: {0}")]
    InvalidReference(String),
    #[error("malformed model: {0}")]
    Malformed(String),
    #[error("model storage unavailable: {0}")]
    Unavailable(String),
}

impl ModelLoadError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ModelLoadError::Unavailable(_))
    }
}

/// A parsed model together with the fingerprint of the bytes it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedModel {
    pub topology: GridTopology,
    pub fingerprint: ContentFingerprint,
}

impl LoadedModel {
    pub fn parse(bytes: &[u8]) -> Result<Self, ModelLoadError> {
        let topology = GridTopology::from_json(bytes).map_err(ModelLoadError::Malformed)?;
        Ok(Self {
            topology,
            fingerprint: ContentFingerprint::of(bytes),
        })
    }
}

#[async_trait]
pub trait ModelStore: Send + Sync {
    /// Raw bytes of the uploaded model.
    async fn fetch(&self, reference: &ModelReference) -> Result<Vec<u8>, ModelLoadError>;

    async fn load(&self, reference: &ModelReference) -> Result<LoadedModel, ModelLoadError> {
        let bytes = self.fetch(reference).await?;
        LoadedModel::parse(&bytes)
    }
}

/// Audit store failures
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("audit store unavailable: {0}")]
    Unavailable(String),
    #[error("audit store call timed out")]
    Timeout,
    #[error("corrupt audit entry for {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout)
    }
}

/// First-writer-wins claim on a scenario key, valid until `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub token: Uuid,
    pub holder: String,
    pub reserved_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Reservation {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Value stored under a scenario key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AuditEntry {
    Reserved(Reservation),
    Committed(ComplianceRecord),
}

impl AuditEntry {
    pub fn state(&self) -> &'static str {
        match self {
            AuditEntry::Reserved(_) => "reserved",
            AuditEntry::Committed(_) => "committed",
        }
    }
}

/// Condition a conditional put must satisfy to be applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// Nothing is stored under the key yet.
    Absent,
    /// The key holds a reservation with this token.
    ReservedBy(Uuid),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PutOutcome {
    Written,
    /// The precondition failed; carries whatever the key holds now.
    Conflict { existing: Option<AuditEntry> },
}

/// Durable key-value store with an atomic single-key conditional write.
///
/// A committed entry is never replaced: no precondition matches it.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn conditional_put(
        &self,
        key: &ScenarioKey,
        entry: AuditEntry,
        precondition: Precondition,
    ) -> Result<PutOutcome, StoreError>;

    async fn get(&self, key: &ScenarioKey) -> Result<Option<AuditEntry>, StoreError>;

    /// Remove a reservation if it is still held under `token`.
    async fn delete_reservation(&self, key: &ScenarioKey, token: Uuid) -> Result<bool, StoreError>;
}

pub struct Repositories {
    pub models: Arc<dyn ModelStore>,
    pub audit: Arc<dyn AuditStore>,
}

impl Repositories {
    pub async fn new(cfg: &Config) -> Result<Self> {
        let models: Arc<dyn ModelStore> = Arc::new(FsModelStore::new(&cfg.storage.models_dir));

        let audit: Arc<dyn AuditStore> = match cfg.storage.backend {
            StorageBackend::Memory => Arc::new(MemoryAuditStore::new()),
            #[cfg(feature = "db")]
            StorageBackend::Postgres => {
                let store = pg::PgAuditStore::connect(&cfg.storage.db_url, 5).await?;
                store.migrate().await?;
                Arc::new(store)
            }
            #[cfg(not(feature = "db"))]
            StorageBackend::Postgres => {
                anyhow::bail!("storage.backend = \"postgres\" requires the `db` feature")
            }
        };

        Ok(Self { models, audit })
    }
}
