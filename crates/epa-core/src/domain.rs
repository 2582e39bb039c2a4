//! # Clinical Domain Records
//!
//! The structured patient, insurance, medication, and clinical blocks carried
//! by every prior-authorization record, plus their field validators.
//!
//! Validation is pure and runs before any I/O: gateways call these validators
//! first so a malformed request fails with zero side effects and never
//! reaches a wire codec or the network.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::identity::DocumentId;

/// A required field is missing or carries a malformed value.
///
/// Raised before any side effect; the caller's record is untouched and the
/// request must be corrected, not retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },
    #[error("invalid value for {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Patient demographics as supplied by the intake collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PatientInfo {
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_phone: Option<String>,
}

/// The patient's plan and membership with the payer being asked to cover
/// the medication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct InsuranceInfo {
    pub payer_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payer_name: Option<String>,
    pub plan_id: String,
    pub member_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_number: Option<String>,
}

/// The medication the authorization is for, identified by NDC code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MedicationInfo {
    /// National Drug Code, 10 or 11 digits, dashes permitted.
    pub ndc_code: String,
    pub drug_name: String,
    pub quantity: u32,
    pub days_supply: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directions: Option<String>,
}

/// Clinical justification: prescriber identity plus the diagnosis codes and
/// rationale the payer reviews.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ClinicalInfo {
    /// National Provider Identifier of the prescriber, 10 digits.
    pub prescriber_npi: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prescriber_name: Option<String>,
    /// ICD-10 diagnosis codes. May be empty while the record is in DRAFT;
    /// payer submission requires at least one.
    #[serde(default)]
    pub diagnosis_codes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clinical_rationale: Option<String>,
}

/// Pointer to a supporting document held by the document-storage
/// collaborator. The bytes never pass through this subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DocumentReference {
    pub id: DocumentId,
    pub file_name: String,
    pub content_type: String,
    pub uploaded_at: DateTime<Utc>,
}

fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

fn digits_only(value: &str) -> String {
    value.chars().filter(|c| c.is_ascii_digit()).collect()
}

impl PatientInfo {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if is_blank(&self.first_name) {
            return Err(ValidationError::MissingField {
                field: "patient.first_name",
            });
        }
        if is_blank(&self.last_name) {
            return Err(ValidationError::MissingField {
                field: "patient.last_name",
            });
        }
        if self.date_of_birth > Utc::now().date_naive() {
            return Err(ValidationError::InvalidField {
                field: "patient.date_of_birth",
                reason: format!("{} is in the future", self.date_of_birth),
            });
        }
        Ok(())
    }
}

impl InsuranceInfo {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if is_blank(&self.payer_id) {
            return Err(ValidationError::MissingField {
                field: "insurance.payer_id",
            });
        }
        if is_blank(&self.plan_id) {
            return Err(ValidationError::MissingField {
                field: "insurance.plan_id",
            });
        }
        if is_blank(&self.member_id) {
            return Err(ValidationError::MissingField {
                field: "insurance.member_id",
            });
        }
        Ok(())
    }
}

impl MedicationInfo {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_ndc(&self.ndc_code)?;
        if is_blank(&self.drug_name) {
            return Err(ValidationError::MissingField {
                field: "medication.drug_name",
            });
        }
        if self.quantity == 0 {
            return Err(ValidationError::InvalidField {
                field: "medication.quantity",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.days_supply == 0 || self.days_supply > 365 {
            return Err(ValidationError::InvalidField {
                field: "medication.days_supply",
                reason: format!("{} is outside 1..=365", self.days_supply),
            });
        }
        Ok(())
    }
}

impl ClinicalInfo {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_npi(&self.prescriber_npi)?;
        for code in &self.diagnosis_codes {
            if is_blank(code) || code.len() > 8 {
                return Err(ValidationError::InvalidField {
                    field: "clinical.diagnosis_codes",
                    reason: format!("'{code}' is not a plausible ICD-10 code"),
                });
            }
        }
        Ok(())
    }
}

/// Validate an NDC code: 10 or 11 digits once dashes are stripped, and no
/// characters other than digits and dashes.
pub fn validate_ndc(ndc: &str) -> Result<(), ValidationError> {
    if is_blank(ndc) {
        return Err(ValidationError::MissingField {
            field: "medication.ndc_code",
        });
    }
    if !ndc.chars().all(|c| c.is_ascii_digit() || c == '-') {
        return Err(ValidationError::InvalidField {
            field: "medication.ndc_code",
            reason: format!("'{ndc}' contains characters other than digits and dashes"),
        });
    }
    let digits = digits_only(ndc);
    if digits.len() != 10 && digits.len() != 11 {
        return Err(ValidationError::InvalidField {
            field: "medication.ndc_code",
            reason: format!("'{ndc}' has {} digits, expected 10 or 11", digits.len()),
        });
    }
    Ok(())
}

/// Validate a prescriber NPI: exactly 10 ASCII digits.
pub fn validate_npi(npi: &str) -> Result<(), ValidationError> {
    if is_blank(npi) {
        return Err(ValidationError::MissingField {
            field: "clinical.prescriber_npi",
        });
    }
    if npi.len() != 10 || !npi.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::InvalidField {
            field: "clinical.prescriber_npi",
            reason: format!("'{npi}' is not a 10-digit NPI"),
        });
    }
    Ok(())
}
