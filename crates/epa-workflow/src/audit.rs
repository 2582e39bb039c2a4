//! Audit-ledger verification.
//!
//! The status ledger is the write-of-record; the denormalized `status`
//! field is a read optimization. Records loaded from storage are checked
//! here, so a crash that persisted a stale status field is caught and
//! repaired from the ledger instead of being served as truth.

use thiserror::Error;

use epa_core::{Authorization, AuthorizationStatus};

/// Inconsistency between a record's status field and its audit ledger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuditViolation {
    /// The status field disagrees with the last ledger entry. Repairable:
    /// the ledger wins.
    #[error("status field reads {stored} but the ledger derives {derived}")]
    StatusDrift {
        stored: AuthorizationStatus,
        derived: AuthorizationStatus,
    },
    /// Ledger entry `index` does not continue from its predecessor. Not
    /// repairable locally; the record needs manual review.
    #[error("ledger broken at entry {index}: previous transition ended at {expected}, next starts from {found}")]
    BrokenChain {
        index: usize,
        expected: AuthorizationStatus,
        found: AuthorizationStatus,
    },
}

/// Check that the ledger chains correctly from `DRAFT` and that the status
/// field matches its last entry.
pub fn verify_ledger(authorization: &Authorization) -> Result<(), AuditViolation> {
    let mut expected_from = AuthorizationStatus::Draft;
    for (index, change) in authorization.audit.status_history.iter().enumerate() {
        if change.from_status != expected_from {
            return Err(AuditViolation::BrokenChain {
                index,
                expected: expected_from,
                found: change.from_status,
            });
        }
        expected_from = change.to_status;
    }
    if authorization.status != expected_from {
        return Err(AuditViolation::StatusDrift {
            stored: authorization.status,
            derived: expected_from,
        });
    }
    Ok(())
}

/// Repair a drifted status field from the ledger. Returns whether a repair
/// was made. Chain breaks are logged and left alone; there is no safe
/// automatic repair for a corrupted ledger.
pub fn reconcile_status(authorization: &mut Authorization) -> bool {
    match verify_ledger(authorization) {
        Ok(()) => false,
        Err(AuditViolation::StatusDrift { stored, derived }) => {
            tracing::error!(
                authorization = %authorization.id,
                %stored,
                %derived,
                "status field drifted from the audit ledger; serving the ledger's status"
            );
            authorization.status = derived;
            true
        }
        Err(violation @ AuditViolation::BrokenChain { .. }) => {
            tracing::error!(
                authorization = %authorization.id,
                %violation,
                "audit ledger is internally inconsistent; record needs manual review"
            );
            false
        }
    }
}
