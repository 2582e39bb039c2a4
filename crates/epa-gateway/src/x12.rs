//! # X12-Styled Payer Messages
//!
//! JSON renditions of the X12 transactions the payer rail speaks: 270/271
//! eligibility inquiry and response, and 278 prior-authorization request,
//! response, and status inquiry. The shapes carry the segments this
//! subsystem reads; anything else a payer sends survives in the raw reply
//! the codecs keep for evidence.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::wire::CodecError;

/// Implementation guide version for 270/271 eligibility transactions.
pub const X12_ELIGIBILITY_VERSION: &str = "005010X279A1";
/// Implementation guide version for 278 prior-authorization transactions.
pub const X12_PA_VERSION: &str = "005010X217";
/// EQ01 service type code for pharmacy benefits.
pub const SERVICE_TYPE_PHARMACY: &str = "88";

/// Interchange wrapper carried by every outbound payer message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct X12Envelope<T> {
    pub transaction_set: String,
    pub version: String,
    pub sender_id: String,
    pub receiver_id: String,
    /// Interchange control number, nine digits (ISA13).
    pub control_number: String,
    pub created_at: DateTime<Utc>,
    pub payload: T,
}

impl<T> X12Envelope<T> {
    pub fn new(
        transaction_set: &str,
        version: &str,
        sender_id: &str,
        receiver_id: &str,
        payload: T,
    ) -> Self {
        Self {
            transaction_set: transaction_set.to_string(),
            version: version.to_string(),
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            control_number: next_control_number(),
            created_at: Utc::now(),
            payload,
        }
    }
}

/// Nine-digit interchange control number derived from a fresh UUID.
fn next_control_number() -> String {
    let n = u128::from_le_bytes(*Uuid::new_v4().as_bytes()) % 1_000_000_000;
    format!("{n:09}")
}

/// 270 eligibility inquiry payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EligibilityInquiry {
    pub member_id: String,
    pub payer_id: String,
    pub plan_id: String,
    pub subscriber_first_name: String,
    pub subscriber_last_name: String,
    pub subscriber_dob: NaiveDate,
    /// EQ01 service type; always pharmacy for this subsystem.
    pub service_type_code: String,
    pub ndc_code: String,
}

/// 271 eligibility response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EligibilityReply {
    pub coverage_active: bool,
    #[serde(default)]
    pub pharmacy_benefit: Option<PharmacyBenefit>,
}

/// Pharmacy benefit block inside a 271.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PharmacyBenefit {
    /// Member cost share as the payer's decimal string, e.g. "25.00".
    #[serde(default)]
    pub copay_amount: Option<String>,
    pub prior_auth_required: bool,
    #[serde(default)]
    pub formulary_tier: Option<u8>,
}

/// 278 prior-authorization request payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaRequest {
    /// Submitter's transaction key; the payer deduplicates repeats of it.
    pub idempotency_key: String,
    pub member_id: String,
    pub payer_id: String,
    pub plan_id: String,
    pub patient_first_name: String,
    pub patient_last_name: String,
    pub patient_dob: NaiveDate,
    pub prescriber_npi: String,
    pub ndc_code: String,
    pub drug_name: String,
    pub quantity: u32,
    pub days_supply: u32,
    pub diagnosis_codes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clinical_rationale: Option<String>,
}

/// 278 response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaReply {
    /// Payer-assigned certification number (HCR02); becomes the record's
    /// external reference.
    #[serde(default)]
    pub certification_number: Option<String>,
    /// HCR01 action code.
    #[serde(default)]
    pub action_code: Option<String>,
}

/// 278 status inquiry payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaStatusInquiry {
    pub certification_number: String,
}

/// 278 status response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaStatusReply {
    pub certification_number: String,
    /// HCR01 action code, interpreted through the fixed status table.
    pub action_code: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Parse a payer decimal amount ("25", "25.5", "25.00") into integer cents.
/// Anything else, negative amounts included, is malformed.
pub fn parse_amount_cents(raw: &str) -> Result<i64, CodecError> {
    let malformed = || CodecError::Malformed {
        detail: format!("'{raw}' is not a monetary amount"),
    };
    let trimmed = raw.trim();
    let (dollars, cents) = match trimmed.split_once('.') {
        Some((_, "")) => return Err(malformed()),
        Some((d, c)) => (d, c),
        None => (trimmed, ""),
    };
    if dollars.is_empty() || !dollars.chars().all(|c| c.is_ascii_digit()) {
        return Err(malformed());
    }
    let dollar_part: i64 = dollars.parse().map_err(|_| malformed())?;
    let cent_part: i64 = match cents.len() {
        0 => 0,
        1 | 2 if cents.chars().all(|c| c.is_ascii_digit()) => {
            let parsed: i64 = cents.parse().map_err(|_| malformed())?;
            if cents.len() == 1 {
                parsed * 10
            } else {
                parsed
            }
        }
        _ => return Err(malformed()),
    };
    dollar_part
        .checked_mul(100)
        .and_then(|v| v.checked_add(cent_part))
        .ok_or_else(malformed)
}
