//! # SCRIPT-Styled Pharmacy Messages
//!
//! JSON renditions of the pharmacy rail's prior-authorization transactions:
//! PA initiation request/response and PA status request/response. Patient
//! identifiers and medication details travel only as authenticated-encrypted
//! fields; building a message without an encryption key configured is an
//! error, never a plaintext fallback. Routing fields (payer id, prescriber
//! NPI, our own record id) stay in the clear.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use epa_core::{Authorization, MedicationInfo, PatientInfo};
use epa_crypto::{EncryptedField, FieldEncryptor};

use crate::wire::CodecError;

/// NCPDP SCRIPT standard version the rail speaks.
pub const SCRIPT_VERSION: &str = "2017071";

/// Message wrapper carried by every outbound pharmacy transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptEnvelope<T> {
    pub message_type: String,
    pub version: String,
    pub message_id: String,
    pub sent_at: DateTime<Utc>,
    pub body: T,
}

impl<T> ScriptEnvelope<T> {
    pub fn new(message_type: &str, body: T) -> Self {
        Self {
            message_type: message_type.to_string(),
            version: SCRIPT_VERSION.to_string(),
            message_id: Uuid::new_v4().to_string(),
            sent_at: Utc::now(),
            body,
        }
    }
}

/// Patient block of a PA initiation, sealed field by field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectedPatient {
    pub first_name: EncryptedField,
    pub last_name: EncryptedField,
    /// ISO date, e.g. "1987-03-14", sealed like the names.
    pub date_of_birth: EncryptedField,
    pub member_id: EncryptedField,
}

impl ProtectedPatient {
    pub fn seal(
        patient: &PatientInfo,
        member_id: &str,
        encryptor: &dyn FieldEncryptor,
    ) -> Result<Self, CodecError> {
        Ok(Self {
            first_name: encryptor.encrypt_field(&patient.first_name)?,
            last_name: encryptor.encrypt_field(&patient.last_name)?,
            date_of_birth: encryptor.encrypt_field(&patient.date_of_birth.to_string())?,
            member_id: encryptor.encrypt_field(member_id)?,
        })
    }
}

/// Medication block of a PA initiation, sealed field by field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectedMedication {
    pub ndc_code: EncryptedField,
    pub drug_name: EncryptedField,
    /// Decimal string, sealed.
    pub quantity: EncryptedField,
    /// Decimal string, sealed.
    pub days_supply: EncryptedField,
}

impl ProtectedMedication {
    pub fn seal(
        medication: &MedicationInfo,
        encryptor: &dyn FieldEncryptor,
    ) -> Result<Self, CodecError> {
        Ok(Self {
            ndc_code: encryptor.encrypt_field(&medication.ndc_code)?,
            drug_name: encryptor.encrypt_field(&medication.drug_name)?,
            quantity: encryptor.encrypt_field(&medication.quantity.to_string())?,
            days_supply: encryptor.encrypt_field(&medication.days_supply.to_string())?,
        })
    }
}

/// PA initiation request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaInitiationRequest {
    /// Our record id, carried in the clear for correlation; it is an opaque
    /// UUID and identifies nobody.
    pub authorization_id: String,
    /// NPIs are public directory data.
    pub prescriber_npi: String,
    pub payer_id: String,
    pub patient: ProtectedPatient,
    pub medication: ProtectedMedication,
}

impl PaInitiationRequest {
    /// Build the initiation body for a record, sealing every protected
    /// field. Fails if any field cannot be encrypted; nothing is ever
    /// downgraded to plaintext.
    pub fn seal(
        authorization: &Authorization,
        encryptor: &dyn FieldEncryptor,
    ) -> Result<Self, CodecError> {
        Ok(Self {
            authorization_id: authorization.id.as_uuid().to_string(),
            prescriber_npi: authorization.clinical.prescriber_npi.clone(),
            payer_id: authorization.insurance.payer_id.clone(),
            patient: ProtectedPatient::seal(
                &authorization.patient,
                &authorization.insurance.member_id,
                encryptor,
            )?,
            medication: ProtectedMedication::seal(&authorization.medication, encryptor)?,
        })
    }
}

/// PA initiation response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaInitiationReply {
    pub accepted: bool,
    #[serde(default)]
    pub pa_reference_id: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

/// PA status request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaStatusRequest {
    pub pa_reference_id: String,
}

/// PA status response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaStatusResponse {
    pub pa_reference_id: String,
    /// Disposition code: "A", "D", "P" or their spelled-out forms.
    pub disposition_code: String,
    #[serde(default)]
    pub note: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use epa_core::{ActorId, ClinicalInfo, InsuranceInfo};
    use epa_crypto::AesGcmFieldEncryptor;

    fn record() -> Authorization {
        Authorization::new(
            PatientInfo {
                first_name: "Maria".to_string(),
                last_name: "Santos".to_string(),
                date_of_birth: NaiveDate::from_ymd_opt(1987, 3, 14).unwrap(),
                gender: None,
                contact_phone: None,
            },
            InsuranceInfo {
                payer_id: "60054".to_string(),
                payer_name: None,
                plan_id: "PPO-2400".to_string(),
                member_id: "W882341207".to_string(),
                group_number: None,
            },
            MedicationInfo {
                ndc_code: "0074-3799-13".to_string(),
                drug_name: "Adalimumab".to_string(),
                quantity: 2,
                days_supply: 28,
                directions: None,
            },
            ClinicalInfo {
                prescriber_npi: "1234567893".to_string(),
                prescriber_name: None,
                diagnosis_codes: vec!["M05.79".to_string()],
                clinical_rationale: None,
            },
            ActorId::new(),
        )
    }

    fn encryptor() -> AesGcmFieldEncryptor {
        AesGcmFieldEncryptor::new([7u8; 32])
    }

    #[test]
    fn sealed_request_round_trips_every_protected_field() {
        let auth = record();
        let enc = encryptor();
        let request = PaInitiationRequest::seal(&auth, &enc).unwrap();

        assert_eq!(enc.decrypt_field(&request.patient.first_name).unwrap(), "Maria");
        assert_eq!(enc.decrypt_field(&request.patient.last_name).unwrap(), "Santos");
        assert_eq!(
            enc.decrypt_field(&request.patient.date_of_birth).unwrap(),
            "1987-03-14"
        );
        assert_eq!(
            enc.decrypt_field(&request.patient.member_id).unwrap(),
            "W882341207"
        );
        assert_eq!(
            enc.decrypt_field(&request.medication.ndc_code).unwrap(),
            "0074-3799-13"
        );
        assert_eq!(enc.decrypt_field(&request.medication.quantity).unwrap(), "2");
        assert_eq!(enc.decrypt_field(&request.medication.days_supply).unwrap(), "28");
    }

    #[test]
    fn serialized_request_exposes_no_plaintext_identifiers() {
        let auth = record();
        let request = PaInitiationRequest::seal(&auth, &encryptor()).unwrap();
        let json = serde_json::to_string(&ScriptEnvelope::new("PAInitiationRequest", request))
            .unwrap();

        for secret in ["Maria", "Santos", "1987-03-14", "W882341207", "Adalimumab"] {
            assert!(!json.contains(secret), "{secret} leaked into the wire form");
        }
        // Routing fields stay readable.
        assert!(json.contains("1234567893"));
        assert!(json.contains("60054"));
        assert!(json.contains(SCRIPT_VERSION));
    }

    #[test]
    fn sealing_twice_never_reuses_a_nonce() {
        let auth = record();
        let enc = encryptor();
        let first = PaInitiationRequest::seal(&auth, &enc).unwrap();
        let second = PaInitiationRequest::seal(&auth, &enc).unwrap();
        assert_ne!(first.patient.member_id.nonce, second.patient.member_id.nonce);
        assert_ne!(
            first.patient.member_id.ciphertext,
            second.patient.member_id.ciphertext
        );
    }

    #[test]
    fn envelope_identifies_the_transaction() {
        let env = ScriptEnvelope::new(
            "PAStatusRequest",
            PaStatusRequest {
                pa_reference_id: "RX-77".to_string(),
            },
        );
        assert_eq!(env.message_type, "PAStatusRequest");
        assert_eq!(env.version, SCRIPT_VERSION);
        assert!(Uuid::parse_str(&env.message_id).is_ok());
    }
}
