//! # Pharmacy Gateway
//!
//! Pharmacy-rail operations: sending the PA initiation script for a record
//! and polling the rail for its disposition. Protected patient and
//! medication fields are sealed with authenticated encryption before a
//! message leaves the process; a gateway without an encryption key refuses
//! to send, it never downgrades to plaintext.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use epa_core::{Authorization, ValidationError};
use epa_crypto::FieldEncryptor;

use crate::script::{
    PaInitiationReply, PaInitiationRequest, PaStatusRequest, PaStatusResponse, ScriptEnvelope,
};
use crate::wire::{parse_reply, CodecError, MessageCodec};

/// Fixed per-attempt bound for pharmacy status inquiries. Dispositions are
/// poll-driven, so a slow answer is worth less than a timely retry.
pub const STATUS_INQUIRY_TIMEOUT: Duration = Duration::from_secs(30);

/// Disposition the pharmacy rail reports for a PA request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaDisposition {
    Approved,
    Denied,
    Pended,
}

impl PaDisposition {
    /// Interpret a rail disposition code. Single letters and spelled-out
    /// forms are accepted; anything else is `None`.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "A" | "APPROVED" => Some(Self::Approved),
            "D" | "DENIED" => Some(Self::Denied),
            "P" | "PENDED" | "DEFERRED" => Some(Self::Pended),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "APPROVED",
            Self::Denied => "DENIED",
            Self::Pended => "PENDED",
        }
    }
}

impl std::fmt::Display for PaDisposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pharmacy acknowledgement of a PA initiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PharmacyReceipt {
    /// Rail-assigned reference used for all later status inquiries.
    pub pharmacy_reference_id: String,
    pub accepted_at: DateTime<Utc>,
}

/// Outcome of a pharmacy status inquiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PharmacyStatusReport {
    pub disposition: PaDisposition,
    pub note: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Failure on the pharmacy rail.
#[derive(Debug, Error)]
pub enum PharmacyError {
    /// Request rejected before any I/O; nothing was sent.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Missing or unusable field-encryption key. Message building fails
    /// closed; nothing is ever sent in plaintext.
    #[error("pharmacy gateway not configured: {reason}")]
    NotConfigured { reason: String },
    /// The rail could not be reached, kept failing past the retry budget,
    /// or its circuit is open.
    #[error("pharmacy upstream unavailable: {reason}")]
    Unavailable { reason: String },
    /// The rail answered and said no. Not retryable as-is.
    #[error("pharmacy upstream rejected the request: {reason}")]
    Rejected { reason: String },
    /// A wire message could not be built or interpreted.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Pharmacy-rail operations. Implementations are `Send + Sync`; the
/// workflow service holds one behind an `Arc<dyn PharmacyGateway>`.
#[async_trait]
pub trait PharmacyGateway: Send + Sync {
    /// Send the PA initiation script for a record. Protected fields are
    /// encrypted before the message leaves the process.
    async fn send_pa_request(
        &self,
        authorization: &Authorization,
    ) -> Result<PharmacyReceipt, PharmacyError>;

    /// Poll the rail for the PA disposition. Bounded per attempt by
    /// [`STATUS_INQUIRY_TIMEOUT`].
    async fn check_pa_status(
        &self,
        pharmacy_reference_id: &str,
    ) -> Result<PharmacyStatusReport, PharmacyError>;

    /// Implementation name for logs and health reporting.
    fn gateway_name(&self) -> &str;
}

/// Field checks shared by every implementation, run before any I/O.
pub fn validate_pa_inputs(authorization: &Authorization) -> Result<(), ValidationError> {
    authorization.patient.validate()?;
    authorization.insurance.validate()?;
    authorization.medication.validate()?;
    authorization.clinical.validate()?;
    Ok(())
}

// ---- codecs ----

/// Builds sealed PA initiation messages and reads the rail's reply.
pub struct PaInitiationCodec<'a> {
    pub encryptor: &'a dyn FieldEncryptor,
}

impl MessageCodec for PaInitiationCodec<'_> {
    type Domain = Authorization;
    type Wire = ScriptEnvelope<PaInitiationRequest>;
    type Reply = PaInitiationReply;

    fn encode(&self, authorization: &Authorization) -> Result<Self::Wire, CodecError> {
        let body = PaInitiationRequest::seal(authorization, self.encryptor)?;
        Ok(ScriptEnvelope::new("PAInitiationRequest", body))
    }

    fn decode(&self, raw: Value) -> Result<PaInitiationReply, CodecError> {
        parse_reply(&raw)
    }
}

/// Builds PA status requests and interprets disposition codes.
#[derive(Debug, Clone, Default)]
pub struct PaStatusCodec;

impl MessageCodec for PaStatusCodec {
    type Domain = String;
    type Wire = ScriptEnvelope<PaStatusRequest>;
    type Reply = PharmacyStatusReport;

    fn encode(&self, pharmacy_reference_id: &String) -> Result<Self::Wire, CodecError> {
        Ok(ScriptEnvelope::new(
            "PAStatusRequest",
            PaStatusRequest {
                pa_reference_id: pharmacy_reference_id.clone(),
            },
        ))
    }

    fn decode(&self, raw: Value) -> Result<PharmacyStatusReport, CodecError> {
        let reply: PaStatusResponse = parse_reply(&raw)?;
        let disposition = PaDisposition::from_code(&reply.disposition_code).ok_or_else(|| {
            CodecError::Malformed {
                detail: format!(
                    "unrecognized disposition code '{}'",
                    reply.disposition_code
                ),
            }
        })?;
        Ok(PharmacyStatusReport {
            disposition,
            note: reply.note,
            checked_at: Utc::now(),
        })
    }
}

// ---- mock ----

/// Deterministic in-process pharmacy rail for tests and local runs.
/// References starting with `DENY` report denied, `APPROVE` approved,
/// everything else pended. The mock never builds wire messages, so it
/// needs no encryption key.
#[derive(Debug, Default)]
pub struct MockPharmacyGateway;

impl MockPharmacyGateway {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PharmacyGateway for MockPharmacyGateway {
    async fn send_pa_request(
        &self,
        authorization: &Authorization,
    ) -> Result<PharmacyReceipt, PharmacyError> {
        validate_pa_inputs(authorization)?;
        Ok(PharmacyReceipt {
            pharmacy_reference_id: format!("MOCK-RX-{}", authorization.id.as_uuid().simple()),
            accepted_at: Utc::now(),
        })
    }

    async fn check_pa_status(
        &self,
        pharmacy_reference_id: &str,
    ) -> Result<PharmacyStatusReport, PharmacyError> {
        let disposition = if pharmacy_reference_id.starts_with("DENY") {
            PaDisposition::Denied
        } else if pharmacy_reference_id.starts_with("APPROVE") {
            PaDisposition::Approved
        } else {
            PaDisposition::Pended
        };
        Ok(PharmacyStatusReport {
            disposition,
            note: None,
            checked_at: Utc::now(),
        })
    }

    fn gateway_name(&self) -> &str {
        "MockPharmacyGateway"
    }
}
