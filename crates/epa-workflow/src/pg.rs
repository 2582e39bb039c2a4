//! Postgres-backed authorization store.
//!
//! The aggregate is stored as one JSONB document per record, with the
//! status, version, and timestamps denormalized into columns for the
//! finder queries. The version column drives the optimistic check: the
//! UPDATE matches on `id AND version`, so a stale writer affects zero rows
//! and is answered with a version conflict instead of silently clobbering
//! the newer write.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use epa_core::{Authorization, AuthorizationId, AuthorizationStatus};

use crate::store::{AuthorizationStore, StoreError, PENDING_STATUSES};

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend {
            reason: err.to_string(),
        }
    }
}

/// Serialize the aggregate for the JSONB column.
fn to_jsonb(authorization: &Authorization) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(authorization).map_err(|err| {
        tracing::error!(
            authorization = %authorization.id,
            error = %err,
            "failed to serialize authorization for storage"
        );
        StoreError::Backend {
            reason: format!("serialization failed: {err}"),
        }
    })
}

/// Internal row type for sqlx mapping.
#[derive(sqlx::FromRow)]
struct RecordRow {
    record: serde_json::Value,
}

impl RecordRow {
    /// Decode the JSONB document. A document that no longer parses is
    /// corruption, not a defaultable condition, so this errors instead of
    /// inventing a record.
    fn into_authorization(self) -> Result<Authorization, StoreError> {
        serde_json::from_value(self.record).map_err(|err| {
            tracing::error!(error = %err, "stored authorization document does not parse");
            StoreError::Backend {
                reason: format!("stored record does not parse: {err}"),
            }
        })
    }
}

fn decode_rows(rows: Vec<RecordRow>) -> Result<Vec<Authorization>, StoreError> {
    rows.into_iter().map(RecordRow::into_authorization).collect()
}

/// Create the schema if it does not exist. Idempotent; run at startup.
pub async fn run_migrations(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS authorizations (
            id UUID PRIMARY KEY,
            status TEXT NOT NULL,
            record JSONB NOT NULL,
            version BIGINT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS authorizations_status_created_idx
         ON authorizations (status, created_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS authorizations_updated_idx
         ON authorizations (updated_at DESC)",
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Durable store over a Postgres pool.
#[derive(Debug, Clone)]
pub struct PgAuthorizationStore {
    pool: PgPool,
}

impl PgAuthorizationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuthorizationStore for PgAuthorizationStore {
    async fn insert(&self, authorization: Authorization) -> Result<Authorization, StoreError> {
        let record = to_jsonb(&authorization)?;
        let result = sqlx::query(
            "INSERT INTO authorizations (id, status, record, version, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(*authorization.id.as_uuid())
        .bind(authorization.status.as_str())
        .bind(&record)
        .bind(authorization.version)
        .bind(authorization.created_at)
        .bind(authorization.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Duplicate {
                id: authorization.id,
            });
        }
        Ok(authorization)
    }

    async fn load(&self, id: &AuthorizationId) -> Result<Authorization, StoreError> {
        let row = sqlx::query_as::<_, RecordRow>(
            "SELECT record FROM authorizations WHERE id = $1",
        )
        .bind(*id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| StoreError::NotFound { id: id.clone() })?
            .into_authorization()
    }

    async fn save(&self, authorization: Authorization) -> Result<Authorization, StoreError> {
        let expected = authorization.version;
        let mut updated = authorization;
        updated.version += 1;
        let record = to_jsonb(&updated)?;

        let result = sqlx::query(
            "UPDATE authorizations
             SET status = $1, record = $2, version = $3, updated_at = $4
             WHERE id = $5 AND version = $6",
        )
        .bind(updated.status.as_str())
        .bind(&record)
        .bind(updated.version)
        .bind(updated.updated_at)
        .bind(*updated.id.as_uuid())
        .bind(expected)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Zero rows means either the record is gone or another writer
            // moved the version. Look again to answer precisely.
            let found: Option<i64> =
                sqlx::query_scalar("SELECT version FROM authorizations WHERE id = $1")
                    .bind(*updated.id.as_uuid())
                    .fetch_optional(&self.pool)
                    .await?;
            return Err(match found {
                None => StoreError::NotFound { id: updated.id },
                Some(found) => StoreError::VersionConflict { expected, found },
            });
        }
        Ok(updated)
    }

    async fn list_by_status(
        &self,
        status: Option<AuthorizationStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Authorization>, StoreError> {
        let rows = match status {
            Some(status) => {
                sqlx::query_as::<_, RecordRow>(
                    "SELECT record FROM authorizations WHERE status = $1
                     ORDER BY created_at DESC LIMIT $2 OFFSET $3",
                )
                .bind(status.as_str())
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, RecordRow>(
                    "SELECT record FROM authorizations
                     ORDER BY created_at DESC LIMIT $1 OFFSET $2",
                )
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
        };
        decode_rows(rows)
    }

    async fn list_pending(&self) -> Result<Vec<Authorization>, StoreError> {
        let statuses: Vec<String> = PENDING_STATUSES
            .iter()
            .map(|status| status.as_str().to_string())
            .collect();
        let rows = sqlx::query_as::<_, RecordRow>(
            "SELECT record FROM authorizations WHERE status = ANY($1)
             ORDER BY created_at ASC",
        )
        .bind(&statuses)
        .fetch_all(&self.pool)
        .await?;
        decode_rows(rows)
    }

    async fn count_by_status(&self) -> Result<HashMap<AuthorizationStatus, i64>, StoreError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM authorizations GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = HashMap::new();
        for (status, count) in rows {
            match status.parse::<AuthorizationStatus>() {
                Ok(status) => {
                    counts.insert(status, count);
                }
                Err(err) => {
                    // A status string no release ever wrote. Surface it in
                    // the logs rather than failing the whole stats call.
                    tracing::error!(%status, error = %err, "unknown status value in storage");
                }
            }
        }
        Ok(counts)
    }

    async fn list_recently_updated(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<Authorization>, StoreError> {
        let rows = sqlx::query_as::<_, RecordRow>(
            "SELECT record FROM authorizations WHERE updated_at >= $1
             ORDER BY updated_at DESC",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        decode_rows(rows)
    }
}
