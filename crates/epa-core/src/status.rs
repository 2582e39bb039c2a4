//! # Authorization Lifecycle States
//!
//! The prior-authorization status enum and the allowed-transition table.
//!
//! ## The Table Is the Machine
//!
//! `ALLOWED_TRANSITIONS` is a const table of `(from, allowed targets)` rows —
//! the single place lifecycle edges are defined. Transition validation is a
//! table lookup, never a scattered `match` in handler code, so adding or
//! removing an edge is a one-row data change testable in isolation from any
//! gateway side effect.
//!
//! ## Terminal States
//!
//! `APPROVED` and `CANCELLED` have no outgoing edges. `DENIED` is terminal
//! except for the single re-opening edge to `APPEALED`.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Lifecycle state of a prior-authorization record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthorizationStatus {
    /// Being assembled by the prescriber; nothing sent externally yet.
    Draft,
    /// Handed to the pharmacy/payer pipeline; awaiting triage.
    Submitted,
    /// Payer requires supporting documents before review can start.
    PendingDocuments,
    /// Under active clinical review by the payer.
    UnderReview,
    /// Reviewer requested additional information from the prescriber.
    NeedsInfo,
    /// Coverage granted. Terminal.
    Approved,
    /// Coverage refused. Terminal except for the appeal edge.
    Denied,
    /// Withdrawn before a decision. Terminal.
    Cancelled,
    /// Denial contested; returns to review when the payer accepts the appeal.
    Appealed,
}

/// Allowed lifecycle edges, one row per source state.
///
/// States absent from a row's target list are unreachable from that row's
/// source in a single transition. `APPROVED` and `CANCELLED` rows are empty.
pub const ALLOWED_TRANSITIONS: &[(AuthorizationStatus, &[AuthorizationStatus])] = &[
    (
        AuthorizationStatus::Draft,
        &[AuthorizationStatus::Submitted, AuthorizationStatus::Cancelled],
    ),
    (
        AuthorizationStatus::Submitted,
        &[
            AuthorizationStatus::PendingDocuments,
            AuthorizationStatus::UnderReview,
            AuthorizationStatus::Cancelled,
        ],
    ),
    (
        AuthorizationStatus::PendingDocuments,
        &[AuthorizationStatus::UnderReview, AuthorizationStatus::Cancelled],
    ),
    (
        AuthorizationStatus::UnderReview,
        &[
            AuthorizationStatus::Approved,
            AuthorizationStatus::Denied,
            AuthorizationStatus::NeedsInfo,
        ],
    ),
    (
        AuthorizationStatus::NeedsInfo,
        &[AuthorizationStatus::UnderReview, AuthorizationStatus::Cancelled],
    ),
    (AuthorizationStatus::Approved, &[]),
    (AuthorizationStatus::Denied, &[AuthorizationStatus::Appealed]),
    (AuthorizationStatus::Cancelled, &[]),
    (AuthorizationStatus::Appealed, &[AuthorizationStatus::UnderReview]),
];

/// A transition request named an edge that is not in [`ALLOWED_TRANSITIONS`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// The `{from} -> {to}` edge does not exist; the record is unchanged.
    #[error("invalid transition: {from} -> {to} is not an allowed edge")]
    InvalidTransition {
        from: AuthorizationStatus,
        to: AuthorizationStatus,
    },
}

/// A status string did not name any lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown authorization status '{0}'")]
pub struct ParseStatusError(pub String);

impl AuthorizationStatus {
    /// Every lifecycle state, in declaration order.
    pub const ALL: [AuthorizationStatus; 9] = [
        AuthorizationStatus::Draft,
        AuthorizationStatus::Submitted,
        AuthorizationStatus::PendingDocuments,
        AuthorizationStatus::UnderReview,
        AuthorizationStatus::NeedsInfo,
        AuthorizationStatus::Approved,
        AuthorizationStatus::Denied,
        AuthorizationStatus::Cancelled,
        AuthorizationStatus::Appealed,
    ];

    /// Wire/storage name of the state (matches the serde representation).
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorizationStatus::Draft => "DRAFT",
            AuthorizationStatus::Submitted => "SUBMITTED",
            AuthorizationStatus::PendingDocuments => "PENDING_DOCUMENTS",
            AuthorizationStatus::UnderReview => "UNDER_REVIEW",
            AuthorizationStatus::NeedsInfo => "NEEDS_INFO",
            AuthorizationStatus::Approved => "APPROVED",
            AuthorizationStatus::Denied => "DENIED",
            AuthorizationStatus::Cancelled => "CANCELLED",
            AuthorizationStatus::Appealed => "APPEALED",
        }
    }

    /// Targets reachable from this state in a single transition.
    pub fn allowed_targets(&self) -> &'static [AuthorizationStatus] {
        ALLOWED_TRANSITIONS
            .iter()
            .find(|(from, _)| from == self)
            .map(|(_, targets)| *targets)
            .unwrap_or(&[])
    }

    /// Whether `target` is reachable from this state in a single transition.
    pub fn can_transition_to(&self, target: AuthorizationStatus) -> bool {
        self.allowed_targets().contains(&target)
    }

    /// Validate an edge, returning the typed rejection for disallowed pairs.
    pub fn ensure_transition(&self, target: AuthorizationStatus) -> Result<(), TransitionError> {
        if self.can_transition_to(target) {
            Ok(())
        } else {
            Err(TransitionError::InvalidTransition {
                from: *self,
                to: target,
            })
        }
    }

    /// True for states with no outgoing edges (`APPROVED`, `CANCELLED`).
    ///
    /// `DENIED` is deliberately not terminal: the appeal edge keeps the
    /// record live for subscribers and re-review.
    pub fn is_terminal(&self) -> bool {
        self.allowed_targets().is_empty()
    }
}

impl std::fmt::Display for AuthorizationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AuthorizationStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AuthorizationStatus::ALL
            .iter()
            .find(|status| status.as_str() == s)
            .copied()
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // ---- transition table ----

    #[test]
    fn every_state_has_exactly_one_table_row() {
        for status in AuthorizationStatus::ALL {
            let rows = ALLOWED_TRANSITIONS
                .iter()
                .filter(|(from, _)| *from == status)
                .count();
            assert_eq!(rows, 1, "{status} must appear exactly once as a source");
        }
        assert_eq!(ALLOWED_TRANSITIONS.len(), AuthorizationStatus::ALL.len());
    }

    #[test]
    fn draft_can_submit_or_cancel_only() {
        let targets = AuthorizationStatus::Draft.allowed_targets();
        assert_eq!(
            targets,
            &[AuthorizationStatus::Submitted, AuthorizationStatus::Cancelled]
        );
        assert!(!AuthorizationStatus::Draft.can_transition_to(AuthorizationStatus::Approved));
        assert!(!AuthorizationStatus::Draft.can_transition_to(AuthorizationStatus::UnderReview));
    }

    #[test]
    fn review_decides_or_asks_for_more() {
        let from = AuthorizationStatus::UnderReview;
        assert!(from.can_transition_to(AuthorizationStatus::Approved));
        assert!(from.can_transition_to(AuthorizationStatus::Denied));
        assert!(from.can_transition_to(AuthorizationStatus::NeedsInfo));
        // Review cannot be abandoned sideways; cancellation happens earlier.
        assert!(!from.can_transition_to(AuthorizationStatus::Cancelled));
        assert!(!from.can_transition_to(AuthorizationStatus::Draft));
    }

    #[test]
    fn denial_reopens_only_through_appeal() {
        assert_eq!(
            AuthorizationStatus::Denied.allowed_targets(),
            &[AuthorizationStatus::Appealed]
        );
        assert_eq!(
            AuthorizationStatus::Appealed.allowed_targets(),
            &[AuthorizationStatus::UnderReview]
        );
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        assert!(AuthorizationStatus::Approved.is_terminal());
        assert!(AuthorizationStatus::Cancelled.is_terminal());
        assert!(!AuthorizationStatus::Denied.is_terminal());
        for status in AuthorizationStatus::ALL {
            assert_eq!(status.is_terminal(), status.allowed_targets().is_empty());
        }
    }

    #[test]
    fn every_state_is_reachable_from_draft() {
        let mut reached = vec![AuthorizationStatus::Draft];
        let mut frontier = vec![AuthorizationStatus::Draft];
        while let Some(status) = frontier.pop() {
            for target in status.allowed_targets() {
                if !reached.contains(target) {
                    reached.push(*target);
                    frontier.push(*target);
                }
            }
        }
        for status in AuthorizationStatus::ALL {
            assert!(reached.contains(&status), "{status} unreachable from DRAFT");
        }
    }

    #[test]
    fn ensure_transition_reports_the_rejected_edge() {
        let err = AuthorizationStatus::Draft
            .ensure_transition(AuthorizationStatus::Approved)
            .unwrap_err();
        assert_eq!(
            err,
            TransitionError::InvalidTransition {
                from: AuthorizationStatus::Draft,
                to: AuthorizationStatus::Approved,
            }
        );
        assert!(err.to_string().contains("DRAFT -> APPROVED"));
    }

    // ---- naming ----

    #[test]
    fn serde_uses_screaming_snake_case() {
        let json = serde_json::to_string(&AuthorizationStatus::PendingDocuments).unwrap();
        assert_eq!(json, "\"PENDING_DOCUMENTS\"");
        let back: AuthorizationStatus = serde_json::from_str("\"UNDER_REVIEW\"").unwrap();
        assert_eq!(back, AuthorizationStatus::UnderReview);
    }

    #[test]
    fn from_str_accepts_every_wire_name() {
        for status in AuthorizationStatus::ALL {
            assert_eq!(status.as_str().parse::<AuthorizationStatus>(), Ok(status));
        }
        assert!("approved".parse::<AuthorizationStatus>().is_err());
        assert!("REJECTED".parse::<AuthorizationStatus>().is_err());
    }

    // ---- properties ----

    fn any_status() -> impl Strategy<Value = AuthorizationStatus> {
        proptest::sample::select(AuthorizationStatus::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn validation_agrees_with_the_table(from in any_status(), to in any_status()) {
            let in_table = ALLOWED_TRANSITIONS
                .iter()
                .find(|(source, _)| *source == from)
                .map(|(_, targets)| targets.contains(&to))
                .unwrap_or(false);
            prop_assert_eq!(from.ensure_transition(to).is_ok(), in_table);
        }

        #[test]
        fn no_edge_targets_draft(from in any_status()) {
            prop_assert!(!from.can_transition_to(AuthorizationStatus::Draft));
        }
    }
}
