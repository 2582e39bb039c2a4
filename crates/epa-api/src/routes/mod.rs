//! # API Route Modules
//!
//! - `authorizations` holds the whole `/v1/authorizations` surface:
//!   creation, fetch, list, the reviewer work queue, per-status counts,
//!   lifecycle transitions, the status-change ledger, and the SSE update
//!   stream.

pub mod authorizations;
