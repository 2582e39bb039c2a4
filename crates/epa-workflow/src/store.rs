//! # Authorization Persistence
//!
//! The store trait every persistence backend implements, plus the
//! in-memory implementation used by tests and single-node deployments.
//!
//! ## Optimistic Concurrency
//!
//! `save` is compare-and-swap on the record's `version`: the caller hands
//! back the record at the version it loaded, the store accepts the write
//! only if the stored version still matches, and the accepted write comes
//! back with the version incremented. A mismatch means another writer
//! committed in between; the caller re-reads and retries or gives up.
//! There is no in-place mutation API, so every write travels through the
//! version check.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use uuid::Uuid;

use epa_core::{Authorization, AuthorizationId, AuthorizationStatus};

/// Statuses that make up the reviewer work queue.
pub const PENDING_STATUSES: [AuthorizationStatus; 3] = [
    AuthorizationStatus::Submitted,
    AuthorizationStatus::PendingDocuments,
    AuthorizationStatus::UnderReview,
];

/// Failure inside a persistence backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("authorization {id} not found")]
    NotFound { id: AuthorizationId },
    #[error("authorization {id} already exists")]
    Duplicate { id: AuthorizationId },
    /// Another writer committed between this caller's load and save.
    #[error("version conflict: write carried version {expected}, store holds {found}")]
    VersionConflict { expected: i64, found: i64 },
    #[error("storage backend failure: {reason}")]
    Backend { reason: String },
}

/// Persistence operations for [`Authorization`] records. Implementations
/// are shared behind `Arc<dyn AuthorizationStore>`.
#[async_trait]
pub trait AuthorizationStore: Send + Sync {
    /// Store a fresh record. Fails with [`StoreError::Duplicate`] if the id
    /// is already present.
    async fn insert(&self, authorization: Authorization) -> Result<Authorization, StoreError>;

    /// Fetch a record by id.
    async fn load(&self, id: &AuthorizationId) -> Result<Authorization, StoreError>;

    /// Persist an updated record under the optimistic version check and
    /// return it with the version incremented.
    async fn save(&self, authorization: Authorization) -> Result<Authorization, StoreError>;

    /// Records in `status` (or all records when `None`), newest first.
    async fn list_by_status(
        &self,
        status: Option<AuthorizationStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Authorization>, StoreError>;

    /// The reviewer work queue: [`PENDING_STATUSES`] ordered by creation
    /// time, oldest first.
    async fn list_pending(&self) -> Result<Vec<Authorization>, StoreError>;

    /// Record counts per lifecycle status. Statuses with no records are
    /// absent from the map.
    async fn count_by_status(&self) -> Result<HashMap<AuthorizationStatus, i64>, StoreError>;

    /// Records touched at or after `since`, most recently updated first.
    async fn list_recently_updated(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<Authorization>, StoreError>;
}

/// Sharded in-memory store. Per-key exclusivity during `save` comes from
/// the map's own locking, so the version check and the write are one
/// atomic step.
#[derive(Debug, Default)]
pub struct InMemoryAuthorizationStore {
    records: DashMap<Uuid, Authorization>,
}

impl InMemoryAuthorizationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn snapshot(&self) -> Vec<Authorization> {
        self.records.iter().map(|entry| entry.clone()).collect()
    }
}

#[async_trait]
impl AuthorizationStore for InMemoryAuthorizationStore {
    async fn insert(&self, authorization: Authorization) -> Result<Authorization, StoreError> {
        match self.records.entry(*authorization.id.as_uuid()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate {
                id: authorization.id.clone(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(authorization.clone());
                Ok(authorization)
            }
        }
    }

    async fn load(&self, id: &AuthorizationId) -> Result<Authorization, StoreError> {
        self.records
            .get(id.as_uuid())
            .map(|entry| entry.clone())
            .ok_or_else(|| StoreError::NotFound { id: id.clone() })
    }

    async fn save(&self, authorization: Authorization) -> Result<Authorization, StoreError> {
        let mut entry = self
            .records
            .get_mut(authorization.id.as_uuid())
            .ok_or_else(|| StoreError::NotFound {
                id: authorization.id.clone(),
            })?;
        if entry.version != authorization.version {
            return Err(StoreError::VersionConflict {
                expected: authorization.version,
                found: entry.version,
            });
        }
        let mut updated = authorization;
        updated.version += 1;
        *entry = updated.clone();
        Ok(updated)
    }

    async fn list_by_status(
        &self,
        status: Option<AuthorizationStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Authorization>, StoreError> {
        let mut records: Vec<Authorization> = self
            .snapshot()
            .into_iter()
            .filter(|record| status.map_or(true, |wanted| record.status == wanted))
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn list_pending(&self) -> Result<Vec<Authorization>, StoreError> {
        let mut records: Vec<Authorization> = self
            .snapshot()
            .into_iter()
            .filter(|record| PENDING_STATUSES.contains(&record.status))
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    async fn count_by_status(&self) -> Result<HashMap<AuthorizationStatus, i64>, StoreError> {
        let mut counts = HashMap::new();
        for entry in self.records.iter() {
            *counts.entry(entry.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn list_recently_updated(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<Authorization>, StoreError> {
        let mut records: Vec<Authorization> = self
            .snapshot()
            .into_iter()
            .filter(|record| record.updated_at >= since)
            .collect();
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(records)
    }
}
