use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::domain::{ComplianceRecord, ScenarioKey};
use crate::repo::{AuditEntry, AuditStore, Precondition, PutOutcome, Reservation, StoreError};

/// Rounds of put/takeover before contention is reported as a store error.
const MAX_RESERVE_ROUNDS: usize = 3;

/// What another worker has already done for a key
#[derive(Debug, Clone, PartialEq)]
pub enum Existing {
    Committed(ComplianceRecord),
    /// Reserved by a live worker that has not committed yet.
    InFlight(Reservation),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReserveOutcome {
    Proceed(ReservationToken),
    AlreadyProcessed(Existing),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    Committed,
    /// Another worker's record won; ours was not written.
    Superseded(Existing),
}

/// Proof of holding the reservation for `key`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationToken {
    pub key: ScenarioKey,
    pub token: Uuid,
}

/// First-writer-wins guard over the audit store.
///
/// A reservation is a lease: it expires after `ttl`, after which any worker
/// may take it over. Holders that give up call [`IdempotencyGuard::release`].
#[derive(Clone)]
pub struct IdempotencyGuard {
    store: Arc<dyn AuditStore>,
    holder: String,
    ttl: Duration,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn AuditStore>, holder: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            holder: holder.into(),
            ttl,
        }
    }

    /// Read-only check: a committed record or a live reservation, if any.
    pub async fn lookup(&self, key: &ScenarioKey) -> Result<Option<Existing>, StoreError> {
        let now = Utc::now();
        Ok(match self.store.get(key).await? {
            Some(AuditEntry::Committed(record)) => Some(Existing::Committed(record)),
            Some(AuditEntry::Reserved(r)) if !r.is_expired(now) => Some(Existing::InFlight(r)),
            _ => None,
        })
    }

    pub async fn reserve(&self, key: &ScenarioKey) -> Result<ReserveOutcome, StoreError> {
        self.reserve_with(key, Uuid::new_v4()).await
    }

    /// Claim `key` under `token`.
    ///
    /// Calling again with the same token after a lost response is safe: a
    /// reservation already held under `token` yields `Proceed`.
    pub async fn reserve_with(
        &self,
        key: &ScenarioKey,
        token: Uuid,
    ) -> Result<ReserveOutcome, StoreError> {
        let proceed = || {
            ReserveOutcome::Proceed(ReservationToken {
                key: key.clone(),
                token,
            })
        };

        for _ in 0..MAX_RESERVE_ROUNDS {
            let existing = match self
                .store
                .conditional_put(key, self.lease(token), Precondition::Absent)
                .await?
            {
                PutOutcome::Written => return Ok(proceed()),
                PutOutcome::Conflict { existing: None } => continue,
                PutOutcome::Conflict {
                    existing: Some(existing),
                } => existing,
            };

            let stale = match existing {
                AuditEntry::Committed(record) => {
                    return Ok(ReserveOutcome::AlreadyProcessed(Existing::Committed(record)))
                }
                AuditEntry::Reserved(r) if r.token == token => return Ok(proceed()),
                AuditEntry::Reserved(r) if !r.is_expired(Utc::now()) => {
                    return Ok(ReserveOutcome::AlreadyProcessed(Existing::InFlight(r)))
                }
                AuditEntry::Reserved(r) => r,
            };

            debug!(
                previous_holder = %stale.holder,
                expired_at = %stale.expires_at,
                "taking over expired reservation"
            );
            match self
                .store
                .conditional_put(key, self.lease(token), Precondition::ReservedBy(stale.token))
                .await?
            {
                PutOutcome::Written => return Ok(proceed()),
                PutOutcome::Conflict { existing: None } => continue,
                PutOutcome::Conflict {
                    existing: Some(AuditEntry::Committed(record)),
                } => return Ok(ReserveOutcome::AlreadyProcessed(Existing::Committed(record))),
                PutOutcome::Conflict {
                    existing: Some(AuditEntry::Reserved(r)),
                } => {
                    // Lost the takeover race to another worker.
                    debug!(winner = %r.holder, "reservation conflict");
                    return Ok(ReserveOutcome::AlreadyProcessed(Existing::InFlight(r)));
                }
            }
        }

        Err(StoreError::Unavailable(format!(
            "reservation of {key} did not settle after {MAX_RESERVE_ROUNDS} rounds"
        )))
    }

    /// Write `record` as the final entry for the reserved key.
    pub async fn commit(
        &self,
        token: &ReservationToken,
        record: &ComplianceRecord,
    ) -> Result<CommitOutcome, StoreError> {
        let entry = AuditEntry::Committed(record.clone());
        let mut outcome = self
            .store
            .conditional_put(&token.key, entry.clone(), Precondition::ReservedBy(token.token))
            .await?;

        if let PutOutcome::Conflict { existing: None } = outcome {
            // Our lease was taken over and released meanwhile; the key is free again.
            outcome = self
                .store
                .conditional_put(&token.key, entry, Precondition::Absent)
                .await?;
        }

        Ok(match outcome {
            PutOutcome::Written => CommitOutcome::Committed,
            PutOutcome::Conflict {
                existing: Some(AuditEntry::Committed(existing)),
            } if existing == *record => CommitOutcome::Committed,
            PutOutcome::Conflict {
                existing: Some(AuditEntry::Committed(existing)),
            } => CommitOutcome::Superseded(Existing::Committed(existing)),
            PutOutcome::Conflict {
                existing: Some(AuditEntry::Reserved(r)),
            } => CommitOutcome::Superseded(Existing::InFlight(r)),
            PutOutcome::Conflict { existing: None } => {
                return Err(StoreError::Unavailable(format!(
                    "{} vanished during commit",
                    token.key
                )))
            }
        })
    }

    /// Give up a reservation so a later trigger can retry immediately.
    pub async fn release(&self, token: &ReservationToken) -> Result<bool, StoreError> {
        self.store.delete_reservation(&token.key, token.token).await
    }

    fn lease(&self, token: Uuid) -> AuditEntry {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        AuditEntry::Reserved(Reservation {
            token,
            holder: self.holder.clone(),
            reserved_at: now,
            expires_at: now.checked_add_signed(ttl).unwrap_or(chrono::DateTime::<Utc>::MAX_UTC),
        })
    }
}
