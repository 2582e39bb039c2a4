//! # Idempotent Submission Keys
//!
//! One prior authorization must produce at most one payer submission even
//! across retries and ambiguous failures. This registry pins a stable
//! idempotency key to each in-flight submission: [`SubmissionKeys::begin`]
//! hands back the pending key when one exists, so a resend after a timeout
//! travels under the same key and the remote can deduplicate it.
//!
//! Keys live in process memory. A crash between an ambiguous send and its
//! confirmation loses the pending key, and the next submission attempt gets
//! a fresh one the remote cannot correlate; that residual duplicate window
//! is accepted and the payer-side dedupe remains the final backstop.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use epa_core::AuthorizationId;

/// A submission that has been sent at least once and not yet confirmed or
/// abandoned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSubmission {
    pub idempotency_key: String,
    pub last_attempt_at: DateTime<Utc>,
}

/// Registry of in-flight submission keys, keyed by record and upstream.
#[derive(Debug, Default)]
pub struct SubmissionKeys {
    pending: DashMap<(AuthorizationId, &'static str), PendingSubmission>,
}

impl SubmissionKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key for a new or retried submission. A pending key from an earlier
    /// attempt is returned verbatim; only the first call mints one. The
    /// attempt timestamp is refreshed either way.
    pub fn begin(&self, id: &AuthorizationId, upstream: &'static str) -> String {
        let mut entry = self
            .pending
            .entry((id.clone(), upstream))
            .or_insert_with(|| PendingSubmission {
                idempotency_key: derive_key(id),
                last_attempt_at: Utc::now(),
            });
        entry.last_attempt_at = Utc::now();
        entry.idempotency_key.clone()
    }

    /// The submission was acknowledged; the key has served its purpose.
    pub fn confirm(&self, id: &AuthorizationId, upstream: &'static str) {
        self.pending.remove(&(id.clone(), upstream));
    }

    /// The remote definitively rejected the submission. Release the key so
    /// a corrected resubmission is not deduplicated away.
    pub fn abandon(&self, id: &AuthorizationId, upstream: &'static str) {
        self.pending.remove(&(id.clone(), upstream));
    }

    /// The pending submission for a record, if one is in flight.
    pub fn pending(&self, id: &AuthorizationId, upstream: &'static str) -> Option<PendingSubmission> {
        self.pending
            .get(&(id.clone(), upstream))
            .map(|entry| entry.value().clone())
    }
}

/// Derive a fresh submission key: SHA-256 over the record id and a random
/// nonce, truncated to 32 hex chars. The hash keeps internal record ids out
/// of upstream systems; uniqueness comes from the nonce.
fn derive_key(id: &AuthorizationId) -> String {
    let mut hasher = Sha256::new();
    hasher.update(id.as_uuid().as_bytes());
    hasher.update(Uuid::new_v4().as_bytes());
    hasher
        .finalize()
        .iter()
        .take(16)
        .map(|b| format!("{b:02x}"))
        .collect()
}
