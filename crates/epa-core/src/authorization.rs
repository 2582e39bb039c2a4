//! # The Authorization Aggregate
//!
//! A prior-authorization record with its append-only audit history.
//!
//! ## Audit Invariant
//!
//! `status` must always equal the `to_status` of the last entry in
//! `audit.status_history` (for a fresh record with no history, `DRAFT`).
//! Both are written together inside [`Authorization::record_transition`],
//! the only mutation path for the status field. The denormalized `status`
//! is a read optimization; the history is the write-of-record, and
//! [`Authorization::derived_status`] rebuilds the current status from it
//! when reconstructing state after a crash.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::{ClinicalInfo, DocumentReference, InsuranceInfo, MedicationInfo, PatientInfo};
use crate::identity::{ActorId, AuthorizationId};
use crate::status::{AuthorizationStatus, TransitionError};

/// One audited lifecycle transition. Immutable once appended; entries are
/// totally ordered by `changed_at`, ties broken by insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StatusChange {
    pub from_status: AuthorizationStatus,
    pub to_status: AuthorizationStatus,
    pub changed_by: ActorId,
    pub reason: String,
    pub changed_at: DateTime<Utc>,
}

/// Free-text marker recording a workflow fact that is not itself a status
/// transition (gateway acknowledgements, eligibility evidence, skipped
/// enrichment).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct WorkflowEvent {
    pub note: String,
    pub recorded_at: DateTime<Utc>,
}

/// The append-only audit ledger carried by every record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AuditBlock {
    pub status_history: Vec<StatusChange>,
    pub workflow_events: Vec<WorkflowEvent>,
}

/// Coverage facts merged into the record after a payer eligibility check.
///
/// Copay is carried as integer cents; wire codecs convert the payer's
/// decimal strings and reject malformed amounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CoverageSummary {
    pub is_covered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub copay_cents: Option<i64>,
    pub prior_auth_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formulary_tier: Option<u8>,
    pub checked_at: DateTime<Utc>,
}

/// A prior-authorization record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Authorization {
    pub id: AuthorizationId,
    pub patient: PatientInfo,
    pub insurance: InsuranceInfo,
    pub medication: MedicationInfo,
    pub clinical: ClinicalInfo,
    pub status: AuthorizationStatus,
    #[serde(default)]
    pub documents: Vec<DocumentReference>,
    #[serde(default)]
    pub audit: AuditBlock,
    /// Payer-side reference assigned when the authorization is submitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_reference_id: Option<String>,
    /// Pharmacy-side reference assigned when the PA script is accepted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pharmacy_reference_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage: Option<CoverageSummary>,
    pub created_by: ActorId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<ActorId>,
    /// Optimistic-concurrency version, incremented by the store on save.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Authorization {
    /// Build a fresh record in `DRAFT` with an empty audit ledger.
    pub fn new(
        patient: PatientInfo,
        insurance: InsuranceInfo,
        medication: MedicationInfo,
        clinical: ClinicalInfo,
        created_by: ActorId,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: AuthorizationId::new(),
            patient,
            insurance,
            medication,
            clinical,
            status: AuthorizationStatus::Draft,
            documents: Vec::new(),
            audit: AuditBlock::default(),
            external_reference_id: None,
            pharmacy_reference_id: None,
            coverage: None,
            created_by,
            assigned_to: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a lifecycle transition: validate the edge against the allowed
    /// table, append the [`StatusChange`], and flip `status` — one step, so
    /// the audit invariant cannot be observed broken. On a disallowed edge
    /// the record is untouched.
    pub fn record_transition(
        &mut self,
        to: AuthorizationStatus,
        changed_by: ActorId,
        reason: impl Into<String>,
        changed_at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.status.ensure_transition(to)?;
        self.audit.status_history.push(StatusChange {
            from_status: self.status,
            to_status: to,
            changed_by,
            reason: reason.into(),
            changed_at,
        });
        self.status = to;
        self.updated_at = changed_at;
        Ok(())
    }

    /// Append a free-text workflow marker without changing status.
    pub fn record_event(&mut self, note: impl Into<String>, at: DateTime<Utc>) {
        self.audit.workflow_events.push(WorkflowEvent {
            note: note.into(),
            recorded_at: at,
        });
        self.updated_at = at;
    }

    /// Current status as derived from the audit ledger alone: the last
    /// history entry's target, or `DRAFT` for an empty ledger.
    pub fn derived_status(&self) -> AuthorizationStatus {
        self.audit
            .status_history
            .last()
            .map(|change| change.to_status)
            .unwrap_or(AuthorizationStatus::Draft)
    }

    /// Whether the denormalized `status` agrees with the ledger.
    pub fn audit_consistent(&self) -> bool {
        self.status == self.derived_status()
    }

    /// Whether the record has reached a state with no outgoing edges.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
