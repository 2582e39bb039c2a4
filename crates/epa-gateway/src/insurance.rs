//! # Insurance Gateway
//!
//! Payer-rail operations: eligibility inquiry, prior-authorization
//! submission, and status polling. The trait hides the transport entirely;
//! every implementation validates its inputs before any I/O, so a malformed
//! request fails with zero side effects.
//!
//! ## Remote Status Codes
//!
//! Payers answer status inquiries with HCR action codes. The mapping to
//! record statuses is a fixed table, not heuristics. A code the table does
//! not list maps to `NEEDS_INFO` and the reply survives verbatim as
//! evidence for human review; guessing at an approval or denial from an
//! unrecognized code is never acceptable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use epa_core::{
    Authorization, AuthorizationStatus, CoverageSummary, InsuranceInfo, MedicationInfo,
    PatientInfo, ValidationError,
};

use crate::wire::{parse_reply, CodecError, MessageCodec};
use crate::x12::{
    parse_amount_cents, EligibilityInquiry, EligibilityReply, PaReply, PaRequest, PaStatusInquiry,
    PaStatusReply, X12Envelope, SERVICE_TYPE_PHARMACY, X12_ELIGIBILITY_VERSION, X12_PA_VERSION,
};

/// Fixed mapping from payer action codes to record statuses.
pub const REMOTE_STATUS_TABLE: &[(&str, AuthorizationStatus)] = &[
    ("A1", AuthorizationStatus::Approved),
    ("A2", AuthorizationStatus::Approved),
    ("APPROVED", AuthorizationStatus::Approved),
    ("A3", AuthorizationStatus::Denied),
    ("DENIED", AuthorizationStatus::Denied),
    ("A4", AuthorizationStatus::UnderReview),
    ("PENDED", AuthorizationStatus::UnderReview),
    ("IN_REVIEW", AuthorizationStatus::UnderReview),
    ("C", AuthorizationStatus::Cancelled),
    ("CANCELLED", AuthorizationStatus::Cancelled),
];

/// Look up a remote status code in the fixed table. Codes match
/// case-insensitively after trimming; anything unlisted returns `None`.
pub fn map_remote_status(code: &str) -> Option<AuthorizationStatus> {
    let normalized = code.trim().to_ascii_uppercase();
    REMOTE_STATUS_TABLE
        .iter()
        .find(|(known, _)| *known == normalized)
        .map(|(_, status)| *status)
}

/// Payer acknowledgement of a submitted authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReceipt {
    /// Payer-assigned reference used for all later status inquiries.
    pub external_reference_id: String,
    /// The idempotency key the submission travelled under.
    pub idempotency_key: String,
    pub submitted_at: DateTime<Utc>,
}

/// Outcome of a payer status inquiry.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteStatusReport {
    /// Record status after applying the fixed code table.
    pub status: AuthorizationStatus,
    /// The code the payer actually sent.
    pub remote_code: String,
    /// Raw reply, preserved verbatim when the code was not in the table.
    pub evidence: Option<Value>,
    pub checked_at: DateTime<Utc>,
}

impl RemoteStatusReport {
    /// Whether the payer's code was in the fixed table.
    pub fn recognized(&self) -> bool {
        self.evidence.is_none()
    }
}

/// Failure on the payer rail.
#[derive(Debug, Error)]
pub enum InsuranceError {
    /// Request rejected before any I/O; nothing was sent.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The payer could not be reached, kept failing past the retry budget,
    /// or its circuit is open.
    #[error("insurance upstream unavailable: {reason}")]
    Unavailable { reason: String },
    /// The payer answered and said no. Not retryable as-is.
    #[error("insurance upstream rejected the request: {reason}")]
    Rejected { reason: String },
    /// A submission may or may not have reached the payer. The idempotency
    /// key is retained; the next attempt resubmits under the same key so
    /// the payer can deduplicate.
    #[error("submission outcome unknown (idempotency key {idempotency_key} retained): {reason}")]
    Ambiguous {
        idempotency_key: String,
        reason: String,
    },
    /// A wire message could not be built or interpreted.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// The gateway is missing configuration it needs to operate.
    #[error("insurance gateway not configured: {reason}")]
    NotConfigured { reason: String },
}

/// Payer-rail operations. Implementations are `Send + Sync`; the workflow
/// service holds one behind an `Arc<dyn InsuranceGateway>`.
#[async_trait]
pub trait InsuranceGateway: Send + Sync {
    /// Probe coverage for a patient, plan, and medication. Inputs are
    /// validated before any I/O.
    async fn check_eligibility(
        &self,
        patient: &PatientInfo,
        insurance: &InsuranceInfo,
        medication: &MedicationInfo,
    ) -> Result<CoverageSummary, InsuranceError>;

    /// Submit a prior authorization to the payer. At most one payer-side
    /// submission per record across retries: an ambiguous outcome keeps the
    /// idempotency key pending and the next attempt reuses it.
    async fn submit_authorization(
        &self,
        authorization: &Authorization,
    ) -> Result<SubmissionReceipt, InsuranceError>;

    /// Poll the payer for the disposition of a submitted authorization.
    async fn check_status(
        &self,
        external_reference_id: &str,
    ) -> Result<RemoteStatusReport, InsuranceError>;

    /// Implementation name for logs and health reporting.
    fn gateway_name(&self) -> &str;
}

/// Field checks shared by every implementation, run before any I/O.
pub fn validate_eligibility_inputs(
    patient: &PatientInfo,
    insurance: &InsuranceInfo,
    medication: &MedicationInfo,
) -> Result<(), ValidationError> {
    patient.validate()?;
    insurance.validate()?;
    medication.validate()?;
    Ok(())
}

/// Submission requires everything eligibility does plus clinical
/// justification: a valid prescriber NPI and at least one diagnosis code.
pub fn validate_submission_inputs(authorization: &Authorization) -> Result<(), ValidationError> {
    validate_eligibility_inputs(
        &authorization.patient,
        &authorization.insurance,
        &authorization.medication,
    )?;
    authorization.clinical.validate()?;
    if authorization.clinical.diagnosis_codes.is_empty() {
        return Err(ValidationError::MissingField {
            field: "clinical.diagnosis_codes",
        });
    }
    Ok(())
}

// ---- codecs ----

/// Input to an eligibility inquiry.
#[derive(Debug, Clone)]
pub struct EligibilityProbe {
    pub patient: PatientInfo,
    pub insurance: InsuranceInfo,
    pub medication: MedicationInfo,
}

/// Builds 270 inquiries and interprets 271 replies.
#[derive(Debug, Clone)]
pub struct EligibilityCodec {
    pub sender_id: String,
    pub receiver_id: String,
}

impl MessageCodec for EligibilityCodec {
    type Domain = EligibilityProbe;
    type Wire = X12Envelope<EligibilityInquiry>;
    type Reply = CoverageSummary;

    fn encode(&self, probe: &EligibilityProbe) -> Result<Self::Wire, CodecError> {
        Ok(X12Envelope::new(
            "270",
            X12_ELIGIBILITY_VERSION,
            &self.sender_id,
            &self.receiver_id,
            EligibilityInquiry {
                member_id: probe.insurance.member_id.clone(),
                payer_id: probe.insurance.payer_id.clone(),
                plan_id: probe.insurance.plan_id.clone(),
                subscriber_first_name: probe.patient.first_name.clone(),
                subscriber_last_name: probe.patient.last_name.clone(),
                subscriber_dob: probe.patient.date_of_birth,
                service_type_code: SERVICE_TYPE_PHARMACY.to_string(),
                ndc_code: probe.medication.ndc_code.clone(),
            },
        ))
    }

    fn decode(&self, raw: Value) -> Result<CoverageSummary, CodecError> {
        let reply: EligibilityReply = parse_reply(&raw)?;
        if !reply.coverage_active {
            return Ok(CoverageSummary {
                is_covered: false,
                copay_cents: None,
                prior_auth_required: false,
                formulary_tier: None,
                checked_at: Utc::now(),
            });
        }
        let benefit = reply.pharmacy_benefit.ok_or(CodecError::MissingField {
            field: "pharmacy_benefit",
        })?;
        Ok(CoverageSummary {
            is_covered: true,
            copay_cents: benefit
                .copay_amount
                .as_deref()
                .map(parse_amount_cents)
                .transpose()?,
            prior_auth_required: benefit.prior_auth_required,
            formulary_tier: benefit.formulary_tier,
            checked_at: Utc::now(),
        })
    }
}

/// A record paired with the idempotency key its submission travels under.
#[derive(Debug, Clone)]
pub struct KeyedSubmission {
    pub authorization: Authorization,
    pub idempotency_key: String,
}

/// The parts of a 278 acknowledgement the gateway consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaAcknowledgement {
    pub certification_number: String,
    pub action_code: Option<String>,
}

/// Builds 278 requests and interprets payer acknowledgements.
#[derive(Debug, Clone)]
pub struct SubmissionCodec {
    pub sender_id: String,
    pub receiver_id: String,
}

impl MessageCodec for SubmissionCodec {
    type Domain = KeyedSubmission;
    type Wire = X12Envelope<PaRequest>;
    type Reply = PaAcknowledgement;

    fn encode(&self, submission: &KeyedSubmission) -> Result<Self::Wire, CodecError> {
        let auth = &submission.authorization;
        Ok(X12Envelope::new(
            "278",
            X12_PA_VERSION,
            &self.sender_id,
            &self.receiver_id,
            PaRequest {
                idempotency_key: submission.idempotency_key.clone(),
                member_id: auth.insurance.member_id.clone(),
                payer_id: auth.insurance.payer_id.clone(),
                plan_id: auth.insurance.plan_id.clone(),
                patient_first_name: auth.patient.first_name.clone(),
                patient_last_name: auth.patient.last_name.clone(),
                patient_dob: auth.patient.date_of_birth,
                prescriber_npi: auth.clinical.prescriber_npi.clone(),
                ndc_code: auth.medication.ndc_code.clone(),
                drug_name: auth.medication.drug_name.clone(),
                quantity: auth.medication.quantity,
                days_supply: auth.medication.days_supply,
                diagnosis_codes: auth.clinical.diagnosis_codes.clone(),
                clinical_rationale: auth.clinical.clinical_rationale.clone(),
            },
        ))
    }

    fn decode(&self, raw: Value) -> Result<PaAcknowledgement, CodecError> {
        let reply: PaReply = parse_reply(&raw)?;
        let certification_number =
            reply
                .certification_number
                .filter(|c| !c.trim().is_empty())
                .ok_or(CodecError::MissingField {
                    field: "certification_number",
                })?;
        Ok(PaAcknowledgement {
            certification_number,
            action_code: reply.action_code,
        })
    }
}

/// Builds 278 status inquiries and applies the fixed status table to the
/// payer's answer.
#[derive(Debug, Clone)]
pub struct StatusCodec {
    pub sender_id: String,
    pub receiver_id: String,
}

impl MessageCodec for StatusCodec {
    type Domain = String;
    type Wire = X12Envelope<PaStatusInquiry>;
    type Reply = RemoteStatusReport;

    fn encode(&self, external_reference_id: &String) -> Result<Self::Wire, CodecError> {
        Ok(X12Envelope::new(
            "278",
            X12_PA_VERSION,
            &self.sender_id,
            &self.receiver_id,
            PaStatusInquiry {
                certification_number: external_reference_id.clone(),
            },
        ))
    }

    fn decode(&self, raw: Value) -> Result<RemoteStatusReport, CodecError> {
        let reply: PaStatusReply = parse_reply(&raw)?;
        let report = match map_remote_status(&reply.action_code) {
            Some(status) => RemoteStatusReport {
                status,
                remote_code: reply.action_code,
                evidence: None,
                checked_at: Utc::now(),
            },
            // Unknown code: never guess. Park the record for human review
            // with the payer's reply attached.
            None => RemoteStatusReport {
                status: AuthorizationStatus::NeedsInfo,
                remote_code: reply.action_code,
                evidence: Some(raw),
                checked_at: Utc::now(),
            },
        };
        Ok(report)
    }
}

// ---- mock ----

/// Deterministic in-process payer for tests and local runs. Scenarios key
/// off well-known prefixes, so no payer sandbox is needed:
///
/// - member ids starting with `UNCOVERED` probe as not covered;
/// - external references starting with `DENY` report `A3`, `APPROVE`
///   report `A1`, `UNKNOWN` report an unlisted code;
/// - everything else is covered, accepted, and pended (`A4`).
#[derive(Debug, Default)]
pub struct MockInsuranceGateway;

impl MockInsuranceGateway {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl InsuranceGateway for MockInsuranceGateway {
    async fn check_eligibility(
        &self,
        patient: &PatientInfo,
        insurance: &InsuranceInfo,
        medication: &MedicationInfo,
    ) -> Result<CoverageSummary, InsuranceError> {
        validate_eligibility_inputs(patient, insurance, medication)?;
        if insurance.member_id.starts_with("UNCOVERED") {
            return Ok(CoverageSummary {
                is_covered: false,
                copay_cents: None,
                prior_auth_required: false,
                formulary_tier: None,
                checked_at: Utc::now(),
            });
        }
        Ok(CoverageSummary {
            is_covered: true,
            copay_cents: Some(2500),
            prior_auth_required: true,
            formulary_tier: Some(3),
            checked_at: Utc::now(),
        })
    }

    async fn submit_authorization(
        &self,
        authorization: &Authorization,
    ) -> Result<SubmissionReceipt, InsuranceError> {
        validate_submission_inputs(authorization)?;
        Ok(SubmissionReceipt {
            external_reference_id: format!("MOCK-{}", authorization.id.as_uuid().simple()),
            idempotency_key: Uuid::new_v4().simple().to_string(),
            submitted_at: Utc::now(),
        })
    }

    async fn check_status(
        &self,
        external_reference_id: &str,
    ) -> Result<RemoteStatusReport, InsuranceError> {
        let code = if external_reference_id.starts_with("DENY") {
            "A3"
        } else if external_reference_id.starts_with("APPROVE") {
            "A1"
        } else if external_reference_id.starts_with("UNKNOWN") {
            "ZZ"
        } else {
            "A4"
        };
        let report = match map_remote_status(code) {
            Some(status) => RemoteStatusReport {
                status,
                remote_code: code.to_string(),
                evidence: None,
                checked_at: Utc::now(),
            },
            None => RemoteStatusReport {
                status: AuthorizationStatus::NeedsInfo,
                remote_code: code.to_string(),
                evidence: Some(serde_json::json!({
                    "certification_number": external_reference_id,
                    "action_code": code,
                })),
                checked_at: Utc::now(),
            },
        };
        Ok(report)
    }

    fn gateway_name(&self) -> &str {
        "MockInsuranceGateway"
    }
}
