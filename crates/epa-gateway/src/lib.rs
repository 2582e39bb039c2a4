//! # epa-gateway — Upstream Integrations for the ePA Stack
//!
//! Gateways to the two rails every prior authorization touches:
//!
//! - **Insurance** ([`InsuranceGateway`]): payer eligibility inquiry,
//!   authorization submission, and status polling over X12-styled JSON
//!   messages.
//! - **Pharmacy** ([`PharmacyGateway`]): prior-authorization initiation and
//!   status inquiry over SCRIPT-styled JSON messages, with authenticated
//!   encryption on patient and medication fields.
//!
//! ## Layering
//!
//! ```text
//! InsuranceGateway / PharmacyGateway    domain operations
//!   |- MessageCodec                     domain <-> wire, pure, no I/O
//!   |- UpstreamPolicy                   breaker + retry + deadline
//!   '- HttpTransport                    bearer-authenticated JSON POST
//! ```
//!
//! Codecs never perform I/O, so every input validation failure is observable
//! with zero side effects. The `Http*` adapters compose a codec with a
//! policy-guarded transport; the `Mock*` adapters answer in-process for
//! tests and local runs. Both sides of each rail are behind a trait, so the
//! workflow service never learns which one it is talking to.

pub mod http;
pub mod idempotency;
pub mod insurance;
pub mod pharmacy;
pub mod script;
pub mod transport;
pub mod wire;
pub mod x12;

pub use http::{
    HttpInsuranceGateway, HttpPharmacyGateway, InsuranceApiConfig, PharmacyApiConfig,
    INSURANCE_ELIGIBILITY_UPSTREAM, INSURANCE_SUBMISSION_UPSTREAM, PHARMACY_UPSTREAM,
};
pub use idempotency::{PendingSubmission, SubmissionKeys};
pub use insurance::{
    map_remote_status, InsuranceError, InsuranceGateway, MockInsuranceGateway, RemoteStatusReport,
    SubmissionReceipt, REMOTE_STATUS_TABLE,
};
pub use pharmacy::{
    MockPharmacyGateway, PaDisposition, PharmacyError, PharmacyGateway, PharmacyReceipt,
    PharmacyStatusReport, STATUS_INQUIRY_TIMEOUT,
};
pub use transport::{HttpTransport, TransportError};
pub use wire::{CodecError, MessageCodec};
