//! # epa-core — Foundational Types for the ePA Stack
//!
//! This crate is the bedrock of the electronic prior-authorization stack. It
//! defines the authorization lifecycle and the domain records that flow
//! through it. Every other crate in the workspace depends on `epa-core`; it
//! depends on nothing internal.
//!
//! ## Key Design Principles
//!
//! 1. **Newtype wrappers for domain primitives.** `AuthorizationId`,
//!    `ActorId`, `DocumentId` — all newtypes over `Uuid`. No bare strings or
//!    naked UUIDs for identifiers.
//!
//! 2. **The transition table is data.** `ALLOWED_TRANSITIONS` is a single
//!    const table of `(from, allowed targets)` rows. Adding a lifecycle edge
//!    is a one-row change reviewed in isolation, not a branch buried in
//!    handler code. All edge checks flow through
//!    [`AuthorizationStatus::can_transition_to`].
//!
//! 3. **Append-only audit history.** `Authorization` mutates only through
//!    [`Authorization::record_transition`], which validates the edge, appends
//!    a `StatusChange`, and flips `status` in one step. The stored status is
//!    always derivable from the last history entry.
//!
//! 4. **UTC-only timestamps.** All temporal fields are `DateTime<Utc>`;
//!    wall-clock local time never enters a record.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `epa-*` crates (this is the leaf of the DAG).
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.
//! - All public types derive `Debug`, `Clone`, and implement
//!   `Serialize`/`Deserialize`.

pub mod authorization;
pub mod domain;
pub mod identity;
pub mod status;

// Re-export primary types for ergonomic imports.
pub use authorization::{
    Authorization, AuditBlock, CoverageSummary, StatusChange, WorkflowEvent,
};
pub use domain::{
    ClinicalInfo, DocumentReference, InsuranceInfo, MedicationInfo, PatientInfo, ValidationError,
};
pub use identity::{ActorId, AuthorizationId, DocumentId};
pub use status::{AuthorizationStatus, ParseStatusError, TransitionError, ALLOWED_TRANSITIONS};
