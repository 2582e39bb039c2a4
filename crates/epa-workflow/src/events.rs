//! Status update events fanned out to subscribers after a commit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use epa_core::{ActorId, Authorization, AuthorizationId, AuthorizationStatus, StatusChange};

/// What kind of change an update event announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateType {
    Created,
    StatusChanged,
}

/// One committed change to an authorization, as seen by subscribers.
///
/// Events describe changes that have already been persisted; an event is
/// never emitted for a transition that failed or was rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StatusUpdateEvent {
    pub authorization_id: AuthorizationId,
    pub status: AuthorizationStatus,
    pub update_type: UpdateType,
    pub reason: String,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

impl StatusUpdateEvent {
    /// Announce a freshly created record.
    pub fn created(authorization: &Authorization) -> Self {
        Self {
            authorization_id: authorization.id.clone(),
            status: authorization.status,
            update_type: UpdateType::Created,
            reason: "authorization created".to_string(),
            actor: authorization.created_by.clone(),
            occurred_at: authorization.created_at,
        }
    }

    /// Announce a committed lifecycle transition.
    pub fn status_changed(id: &AuthorizationId, change: &StatusChange) -> Self {
        Self {
            authorization_id: id.clone(),
            status: change.to_status,
            update_type: UpdateType::StatusChanged,
            reason: change.reason.clone(),
            actor: change.changed_by.clone(),
            occurred_at: change.changed_at,
        }
    }

    /// Whether the announced status ends the record's lifecycle.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_event_mirrors_the_fresh_record() {
        let auth = Authorization::new(
            epa_core::PatientInfo {
                first_name: "Maria".to_string(),
                last_name: "Santos".to_string(),
                date_of_birth: chrono::NaiveDate::from_ymd_opt(1987, 3, 14).unwrap(),
                gender: None,
                contact_phone: None,
            },
            epa_core::InsuranceInfo {
                payer_id: "60054".to_string(),
                payer_name: None,
                plan_id: "PPO-2400".to_string(),
                member_id: "W882341207".to_string(),
                group_number: None,
            },
            epa_core::MedicationInfo {
                ndc_code: "0074-3799-13".to_string(),
                drug_name: "Adalimumab".to_string(),
                quantity: 2,
                days_supply: 28,
                directions: None,
            },
            epa_core::ClinicalInfo {
                prescriber_npi: "1234567893".to_string(),
                prescriber_name: None,
                diagnosis_codes: vec![],
                clinical_rationale: None,
            },
            ActorId::new(),
        );

        let event = StatusUpdateEvent::created(&auth);
        assert_eq!(event.authorization_id, auth.id);
        assert_eq!(event.status, AuthorizationStatus::Draft);
        assert_eq!(event.update_type, UpdateType::Created);
        assert_eq!(event.actor, auth.created_by);
        assert!(!event.is_terminal());
    }

    #[test]
    fn status_changed_event_carries_the_ledger_entry() {
        let id = AuthorizationId::new();
        let actor = ActorId::new();
        let now = Utc::now();
        let change = StatusChange {
            from_status: AuthorizationStatus::UnderReview,
            to_status: AuthorizationStatus::Approved,
            changed_by: actor.clone(),
            reason: "criteria met".to_string(),
            changed_at: now,
        };

        let event = StatusUpdateEvent::status_changed(&id, &change);
        assert_eq!(event.status, AuthorizationStatus::Approved);
        assert_eq!(event.update_type, UpdateType::StatusChanged);
        assert_eq!(event.reason, "criteria met");
        assert_eq!(event.actor, actor);
        assert_eq!(event.occurred_at, now);
        assert!(event.is_terminal());
    }

    #[test]
    fn events_serialize_with_screaming_snake_case_discriminants() {
        let json = serde_json::to_string(&UpdateType::StatusChanged).unwrap();
        assert_eq!(json, "\"STATUS_CHANGED\"");
        let back: UpdateType = serde_json::from_str("\"CREATED\"").unwrap();
        assert_eq!(back, UpdateType::Created);
    }
}
