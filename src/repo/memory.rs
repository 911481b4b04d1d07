use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

use super::{AuditEntry, AuditStore, Precondition, PutOutcome, StoreError};
use crate::domain::{ComplianceRecord, ScenarioKey};

/// In-process audit store.
///
/// The mutex is only held for the duration of a map operation, never across
/// an await point.
#[derive(Debug, Default)]
pub struct MemoryAuditStore {
    entries: Mutex<HashMap<ScenarioKey, AuditEntry>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// All committed records, ordered by scenario key.
    pub fn committed_records(&self) -> Vec<ComplianceRecord> {
        let mut records: Vec<_> = self
            .entries
            .lock()
            .values()
            .filter_map(|e| match e {
                AuditEntry::Committed(r) => Some(r.clone()),
                AuditEntry::Reserved(_) => None,
            })
            .collect();
        records.sort_by(|a, b| a.scenario_key.cmp(&b.scenario_key));
        records
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn conditional_put(
        &self,
        key: &ScenarioKey,
        entry: AuditEntry,
        precondition: Precondition,
    ) -> Result<PutOutcome, StoreError> {
        let mut entries = self.entries.lock();
        let current = entries.get(key);

        let applies = match (precondition, current) {
            (Precondition::Absent, None) => true,
            (Precondition::ReservedBy(token), Some(AuditEntry::Reserved(r))) => r.token == token,
            _ => false,
        };

        if applies {
            entries.insert(key.clone(), entry);
            Ok(PutOutcome::Written)
        } else {
            Ok(PutOutcome::Conflict {
                existing: current.cloned(),
            })
        }
    }

    async fn get(&self, key: &ScenarioKey) -> Result<Option<AuditEntry>, StoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn delete_reservation(&self, key: &ScenarioKey, token: Uuid) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(AuditEntry::Reserved(r)) if r.token == token => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
