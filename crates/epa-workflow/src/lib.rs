//! # epa-workflow — The Prior-Authorization Workflow Engine
//!
//! Everything between the HTTP surface and the upstream gateways: loading
//! and saving [`Authorization`](epa_core::Authorization) records, running
//! the gateway side effects a lifecycle edge requires, committing the
//! transition together with its audit entry, and fanning the resulting
//! update event out to subscribers.
//!
//! ## Write Discipline
//!
//! A transition commits through exactly one path,
//! [`WorkflowService::request_transition`]:
//!
//! 1. load the record and validate the requested edge;
//! 2. run the edge's gateway side effects against the in-memory copy;
//! 3. append the status change and flip the status in one step;
//! 4. save under the optimistic version check;
//! 5. publish the update event (failures logged, never rolled back).
//!
//! Any failure before step 4 leaves the stored record untouched. Two
//! concurrent transitions on one record both reach step 4 with the same
//! version; the store accepts one and answers the other with a version
//! conflict, which surfaces as
//! [`WorkflowError::ConcurrentModification`].

pub mod audit;
pub mod events;
pub mod pg;
pub mod publish;
pub mod service;
pub mod store;

pub use audit::{reconcile_status, verify_ledger, AuditViolation};
pub use events::{StatusUpdateEvent, UpdateType};
pub use pg::PgAuthorizationStore;
pub use publish::{BroadcastPublisher, PublishError, UpdatePublisher};
pub use service::{NewAuthorization, TransitionRequest, WorkflowError, WorkflowService};
pub use store::{AuthorizationStore, InMemoryAuthorizationStore, StoreError};
