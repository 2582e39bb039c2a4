//! # HTTP Gateway Adapters
//!
//! The live implementations of [`InsuranceGateway`] and [`PharmacyGateway`]:
//! a pure codec composed with the policy-guarded transport. Both adapters
//! fetch their upstream policy from the shared
//! [`PolicyRegistry`](epa_resilience::PolicyRegistry), so every instance
//! talking to the same integration shares one circuit breaker.
//!
//! ## Submission Idempotency
//!
//! The insurance adapter pins an idempotency key per record before the
//! first send. Outcomes drive the key lifecycle:
//!
//! - acknowledged: key released, receipt returned;
//! - definitively rejected (4xx): key abandoned, so a corrected
//!   resubmission is not deduplicated away;
//! - ambiguous (a timeout that may have delivered the request): key kept
//!   pending and surfaced in [`InsuranceError::Ambiguous`]; the next
//!   attempt resends under the same key;
//! - cleanly failed (the request never reached the payer): key kept
//!   pending and reused, which the payer cannot distinguish from a first
//!   send.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use epa_core::{
    Authorization, CoverageSummary, InsuranceInfo, MedicationInfo, PatientInfo, ValidationError,
};
use epa_crypto::AesGcmFieldEncryptor;
use epa_resilience::{BreakerConfig, CallError, PolicyRegistry, RetryConfig, UpstreamPolicy};

use crate::idempotency::SubmissionKeys;
use crate::insurance::{
    validate_eligibility_inputs, validate_submission_inputs, EligibilityCodec, EligibilityProbe,
    InsuranceError, InsuranceGateway, KeyedSubmission, RemoteStatusReport, StatusCodec,
    SubmissionCodec, SubmissionReceipt,
};
use crate::pharmacy::{
    validate_pa_inputs, PaInitiationCodec, PaStatusCodec, PharmacyError, PharmacyGateway,
    PharmacyReceipt, PharmacyStatusReport, STATUS_INQUIRY_TIMEOUT,
};
use crate::transport::{HttpTransport, TransportError};
use crate::wire::{CodecError, MessageCodec};

/// Registry key for payer eligibility inquiries.
pub const INSURANCE_ELIGIBILITY_UPSTREAM: &str = "insurance-eligibility";
/// Registry key for the payer 278 rail. Submissions and status inquiries
/// share it: they hit the same adjudication service, so an outage of one is
/// an outage of both.
pub const INSURANCE_SUBMISSION_UPSTREAM: &str = "insurance-submission";
/// Registry key for the pharmacy integration.
pub const PHARMACY_UPSTREAM: &str = "pharmacy";

/// Connection settings for the payer API.
#[derive(Debug, Clone)]
pub struct InsuranceApiConfig {
    pub base_url: String,
    pub api_key: String,
    /// Submitter identifier carried in X12 envelopes.
    pub sender_id: String,
    /// Interchange partner identifier carried in X12 envelopes.
    pub receiver_id: String,
    /// Default per-attempt timeout.
    pub timeout: Duration,
    /// Overall deadline for one gateway operation, retries included.
    pub operation_deadline: Duration,
    pub breaker: BreakerConfig,
    pub retry: RetryConfig,
}

impl InsuranceApiConfig {
    /// Configuration with default timeouts and resilience tuning.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            sender_id: "EPA-STACK".to_string(),
            receiver_id: "CLEARINGHOUSE".to_string(),
            timeout: Duration::from_secs(15),
            operation_deadline: Duration::from_secs(45),
            breaker: BreakerConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

/// Live payer adapter speaking X12-styled JSON.
///
/// Eligibility and the 278 rail run under separate upstream policies, so a
/// broken eligibility endpoint cannot trip submissions offline.
pub struct HttpInsuranceGateway {
    transport: HttpTransport,
    eligibility_policy: Arc<UpstreamPolicy>,
    submission_policy: Arc<UpstreamPolicy>,
    keys: SubmissionKeys,
    sender_id: String,
    receiver_id: String,
    operation_deadline: Duration,
}

impl HttpInsuranceGateway {
    pub fn new(
        config: InsuranceApiConfig,
        registry: &PolicyRegistry,
    ) -> Result<Self, InsuranceError> {
        let transport = HttpTransport::new(&config.base_url, &config.api_key, config.timeout)
            .map_err(|err| InsuranceError::NotConfigured {
                reason: err.to_string(),
            })?;
        let eligibility_policy = registry.get_or_configure(
            INSURANCE_ELIGIBILITY_UPSTREAM,
            config.breaker.clone(),
            config.retry.clone(),
        );
        let submission_policy = registry.get_or_configure(
            INSURANCE_SUBMISSION_UPSTREAM,
            config.breaker.clone(),
            config.retry.clone(),
        );
        Ok(Self {
            transport,
            eligibility_policy,
            submission_policy,
            keys: SubmissionKeys::new(),
            sender_id: config.sender_id,
            receiver_id: config.receiver_id,
            operation_deadline: config.operation_deadline,
        })
    }

    async fn post<W>(
        &self,
        policy: &UpstreamPolicy,
        operation: &'static str,
        path: &'static str,
        wire: W,
    ) -> Result<serde_json::Value, CallError<TransportError>>
    where
        W: serde::Serialize + Clone,
    {
        let deadline = Some(Instant::now() + self.operation_deadline);
        let transport = self.transport.clone();
        policy
            .call(deadline, || {
                let transport = transport.clone();
                let wire = wire.clone();
                async move {
                    let request_id = Uuid::new_v4().simple().to_string();
                    transport
                        .post_json(operation, path, &wire, None, &request_id)
                        .await
                }
            })
            .await
    }
}

/// Whether a failed submission may nevertheless have reached the payer.
fn submission_in_doubt(error: &CallError<TransportError>) -> bool {
    match error {
        // The deadline cut an attempt mid-flight, or the last completed
        // attempt was a timeout.
        CallError::DeadlineExceeded { attempts, last, .. } => {
            *attempts > 0
                && last
                    .as_ref()
                    .map(|err| matches!(err, TransportError::Timeout { .. }))
                    .unwrap_or(true)
        }
        CallError::RetriesExhausted { last, .. } => {
            matches!(last, TransportError::Timeout { .. })
        }
        _ => false,
    }
}

fn map_insurance_call_error(error: CallError<TransportError>) -> InsuranceError {
    match error {
        CallError::Fatal(TransportError::RemoteRejected { status, body, .. }) => {
            InsuranceError::Rejected {
                reason: format!("HTTP {status}: {body}"),
            }
        }
        CallError::Fatal(TransportError::Deserialize { detail, .. }) => {
            InsuranceError::Codec(CodecError::Malformed { detail })
        }
        other => InsuranceError::Unavailable {
            reason: other.to_string(),
        },
    }
}

#[async_trait]
impl InsuranceGateway for HttpInsuranceGateway {
    async fn check_eligibility(
        &self,
        patient: &PatientInfo,
        insurance: &InsuranceInfo,
        medication: &MedicationInfo,
    ) -> Result<CoverageSummary, InsuranceError> {
        validate_eligibility_inputs(patient, insurance, medication)?;
        let codec = EligibilityCodec {
            sender_id: self.sender_id.clone(),
            receiver_id: self.receiver_id.clone(),
        };
        let wire = codec.encode(&EligibilityProbe {
            patient: patient.clone(),
            insurance: insurance.clone(),
            medication: medication.clone(),
        })?;
        let raw = self
            .post(
                &self.eligibility_policy,
                "eligibility-inquiry",
                "eligibility/inquiries",
                wire,
            )
            .await
            .map_err(map_insurance_call_error)?;
        let summary = codec.decode(raw)?;
        tracing::debug!(
            member = %insurance.member_id,
            covered = summary.is_covered,
            prior_auth_required = summary.prior_auth_required,
            "eligibility inquiry answered"
        );
        Ok(summary)
    }

    async fn submit_authorization(
        &self,
        authorization: &Authorization,
    ) -> Result<SubmissionReceipt, InsuranceError> {
        validate_submission_inputs(authorization)?;
        let idempotency_key = self
            .keys
            .begin(&authorization.id, INSURANCE_SUBMISSION_UPSTREAM);
        let codec = SubmissionCodec {
            sender_id: self.sender_id.clone(),
            receiver_id: self.receiver_id.clone(),
        };
        let wire = codec.encode(&KeyedSubmission {
            authorization: authorization.clone(),
            idempotency_key: idempotency_key.clone(),
        })?;

        match self
            .post(
                &self.submission_policy,
                "pa-submission",
                "pa/submissions",
                wire,
            )
            .await
        {
            Ok(raw) => {
                // Key stays pending if the acknowledgement is unreadable:
                // the payer may have recorded the submission anyway.
                let ack = codec.decode(raw)?;
                self.keys
                    .confirm(&authorization.id, INSURANCE_SUBMISSION_UPSTREAM);
                tracing::info!(
                    authorization = %authorization.id,
                    certification = %ack.certification_number,
                    action = ack.action_code.as_deref().unwrap_or("none"),
                    "authorization submitted to payer"
                );
                Ok(SubmissionReceipt {
                    external_reference_id: ack.certification_number,
                    idempotency_key,
                    submitted_at: Utc::now(),
                })
            }
            Err(error) => {
                if let CallError::Fatal(TransportError::RemoteRejected { status, body, .. }) =
                    &error
                {
                    // A definitive no: free the key so a corrected
                    // resubmission is not deduplicated away.
                    self.keys
                        .abandon(&authorization.id, INSURANCE_SUBMISSION_UPSTREAM);
                    return Err(InsuranceError::Rejected {
                        reason: format!("HTTP {status}: {body}"),
                    });
                }
                if submission_in_doubt(&error) {
                    tracing::warn!(
                        authorization = %authorization.id,
                        idempotency_key = %idempotency_key,
                        error = %error,
                        "submission outcome unknown; key retained for resend"
                    );
                    return Err(InsuranceError::Ambiguous {
                        idempotency_key,
                        reason: error.to_string(),
                    });
                }
                Err(map_insurance_call_error(error))
            }
        }
    }

    async fn check_status(
        &self,
        external_reference_id: &str,
    ) -> Result<RemoteStatusReport, InsuranceError> {
        if external_reference_id.trim().is_empty() {
            return Err(InsuranceError::Validation(ValidationError::MissingField {
                field: "external_reference_id",
            }));
        }
        let codec = StatusCodec {
            sender_id: self.sender_id.clone(),
            receiver_id: self.receiver_id.clone(),
        };
        let wire = codec.encode(&external_reference_id.to_string())?;
        let raw = self
            .post(
                &self.submission_policy,
                "pa-status",
                "pa/status-inquiries",
                wire,
            )
            .await
            .map_err(map_insurance_call_error)?;
        let report = codec.decode(raw)?;
        if !report.recognized() {
            tracing::warn!(
                reference = external_reference_id,
                code = %report.remote_code,
                "payer sent an unlisted status code; parking the record for review"
            );
        }
        Ok(report)
    }

    fn gateway_name(&self) -> &str {
        "InsuranceX12HttpV1"
    }
}

/// Connection settings for the pharmacy rail.
#[derive(Debug, Clone)]
pub struct PharmacyApiConfig {
    pub base_url: String,
    pub api_key: String,
    /// Hex-encoded AES-256 key for protected SCRIPT fields. Optional here;
    /// sending a PA without it fails closed.
    pub field_key_hex: Option<String>,
    /// Default per-attempt timeout.
    pub timeout: Duration,
    /// Overall deadline for one gateway operation, retries included.
    pub operation_deadline: Duration,
    pub breaker: BreakerConfig,
    pub retry: RetryConfig,
}

impl PharmacyApiConfig {
    /// Configuration with default timeouts and resilience tuning, and no
    /// field-encryption key.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            field_key_hex: None,
            timeout: Duration::from_secs(45),
            operation_deadline: Duration::from_secs(120),
            breaker: BreakerConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

/// Live pharmacy adapter speaking SCRIPT-styled JSON.
#[derive(Debug)]
pub struct HttpPharmacyGateway {
    transport: HttpTransport,
    policy: Arc<UpstreamPolicy>,
    encryptor: Option<AesGcmFieldEncryptor>,
    operation_deadline: Duration,
}

impl HttpPharmacyGateway {
    /// Build the adapter. A present-but-malformed encryption key is refused
    /// here; an absent key defers the failure to the first send.
    pub fn new(config: PharmacyApiConfig, registry: &PolicyRegistry) -> Result<Self, PharmacyError> {
        let transport = HttpTransport::new(&config.base_url, &config.api_key, config.timeout)
            .map_err(|err| PharmacyError::NotConfigured {
                reason: err.to_string(),
            })?;
        let encryptor = match &config.field_key_hex {
            Some(hex) => Some(AesGcmFieldEncryptor::from_hex_key(hex).map_err(|err| {
                PharmacyError::NotConfigured {
                    reason: err.to_string(),
                }
            })?),
            None => None,
        };
        let policy = registry.get_or_configure(
            PHARMACY_UPSTREAM,
            config.breaker.clone(),
            config.retry.clone(),
        );
        Ok(Self {
            transport,
            policy,
            encryptor,
            operation_deadline: config.operation_deadline,
        })
    }

    async fn post<W>(
        &self,
        operation: &'static str,
        path: &'static str,
        wire: W,
        timeout_override: Option<Duration>,
    ) -> Result<serde_json::Value, CallError<TransportError>>
    where
        W: serde::Serialize + Clone,
    {
        let deadline = Some(Instant::now() + self.operation_deadline);
        let transport = self.transport.clone();
        self.policy
            .call(deadline, || {
                let transport = transport.clone();
                let wire = wire.clone();
                async move {
                    let request_id = Uuid::new_v4().simple().to_string();
                    transport
                        .post_json(operation, path, &wire, timeout_override, &request_id)
                        .await
                }
            })
            .await
    }
}

fn map_pharmacy_call_error(error: CallError<TransportError>) -> PharmacyError {
    match error {
        CallError::Fatal(TransportError::RemoteRejected { status, body, .. }) => {
            PharmacyError::Rejected {
                reason: format!("HTTP {status}: {body}"),
            }
        }
        CallError::Fatal(TransportError::Deserialize { detail, .. }) => {
            PharmacyError::Codec(CodecError::Malformed { detail })
        }
        other => PharmacyError::Unavailable {
            reason: other.to_string(),
        },
    }
}

#[async_trait]
impl PharmacyGateway for HttpPharmacyGateway {
    async fn send_pa_request(
        &self,
        authorization: &Authorization,
    ) -> Result<PharmacyReceipt, PharmacyError> {
        validate_pa_inputs(authorization)?;
        let encryptor = self.encryptor.as_ref().ok_or_else(|| {
            PharmacyError::NotConfigured {
                reason: "field encryption key is not configured; protected fields cannot be sent"
                    .to_string(),
            }
        })?;
        let codec = PaInitiationCodec { encryptor };
        let wire = codec.encode(authorization)?;

        let raw = self
            .post("pa-initiation", "script/pa-initiations", wire, None)
            .await
            .map_err(map_pharmacy_call_error)?;
        let reply = codec.decode(raw)?;
        if !reply.accepted {
            return Err(PharmacyError::Rejected {
                reason: reply
                    .note
                    .unwrap_or_else(|| "PA initiation not accepted".to_string()),
            });
        }
        let pharmacy_reference_id = reply.pa_reference_id.ok_or(CodecError::MissingField {
            field: "pa_reference_id",
        })?;
        tracing::info!(
            authorization = %authorization.id,
            reference = %pharmacy_reference_id,
            "PA initiation accepted by pharmacy rail"
        );
        Ok(PharmacyReceipt {
            pharmacy_reference_id,
            accepted_at: Utc::now(),
        })
    }

    async fn check_pa_status(
        &self,
        pharmacy_reference_id: &str,
    ) -> Result<PharmacyStatusReport, PharmacyError> {
        if pharmacy_reference_id.trim().is_empty() {
            return Err(PharmacyError::Validation(ValidationError::MissingField {
                field: "pharmacy_reference_id",
            }));
        }
        let codec = PaStatusCodec;
        let wire = codec.encode(&pharmacy_reference_id.to_string())?;
        let raw = self
            .post(
                "pa-status-inquiry",
                "script/pa-status-inquiries",
                wire,
                Some(STATUS_INQUIRY_TIMEOUT),
            )
            .await
            .map_err(map_pharmacy_call_error)?;
        Ok(codec.decode(raw)?)
    }

    fn gateway_name(&self) -> &str {
        "PharmacyScriptHttpV1"
    }
}
