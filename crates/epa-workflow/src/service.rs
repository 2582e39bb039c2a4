//! # The Workflow Service
//!
//! The single write path for authorization records. Reads are plain store
//! lookups with an audit-ledger check; writes travel through
//! [`WorkflowService::request_transition`], which validates the edge, runs
//! the gateway side effects it requires, and commits status, ledger entry,
//! and enrichment in one optimistic save.
//!
//! ## Gateway Side Effects
//!
//! | Edge                          | Before commit                          |
//! |-------------------------------|----------------------------------------|
//! | `DRAFT -> SUBMITTED`          | pharmacy PA intake                     |
//! | `SUBMITTED -> UNDER_REVIEW`   | payer submission, then eligibility     |
//! | re-entry to `UNDER_REVIEW`    | eligibility refresh, best effort       |
//!
//! A failing mandatory side effect aborts the transition before anything
//! is persisted: the stored record keeps its status, ledger, and version.
//! The best-effort eligibility refresh on re-entry edges records a skip
//! marker instead of failing, so an appeal can proceed while the payer's
//! eligibility endpoint is down.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use thiserror::Error;

use epa_core::{
    ActorId, Authorization, AuthorizationId, AuthorizationStatus, ClinicalInfo, InsuranceInfo,
    MedicationInfo, PatientInfo, TransitionError, ValidationError,
};
use epa_gateway::{InsuranceError, InsuranceGateway, PharmacyError, PharmacyGateway};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::audit::reconcile_status;
use crate::events::StatusUpdateEvent;
use crate::publish::UpdatePublisher;
use crate::store::{AuthorizationStore, StoreError};

/// Failure of a workflow operation, named by what the caller should do
/// about it: validation and invalid-transition errors are final,
/// concurrent modification wants a re-read and retry, integration
/// unavailability wants a later retry, and an ambiguous upstream failure
/// means the next attempt will reuse the retained idempotency key.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("authorization {id} not found")]
    NotFound { id: AuthorizationId },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),
    #[error("authorization {id} was modified concurrently; re-read and retry")]
    ConcurrentModification { id: AuthorizationId },
    #[error("{upstream} integration unavailable: {reason}")]
    IntegrationUnavailable {
        upstream: &'static str,
        reason: String,
    },
    #[error("{upstream} rejected the request: {reason}")]
    UpstreamRejected {
        upstream: &'static str,
        reason: String,
    },
    #[error("{upstream} submission outcome unknown (idempotency key {idempotency_key} retained): {reason}")]
    AmbiguousUpstreamFailure {
        upstream: &'static str,
        idempotency_key: String,
        reason: String,
    },
    #[error("workflow not configured: {reason}")]
    NotConfigured { reason: String },
    #[error("storage failure: {reason}")]
    Storage { reason: String },
}

fn map_store_error(id: &AuthorizationId, error: StoreError) -> WorkflowError {
    match error {
        StoreError::NotFound { id } => WorkflowError::NotFound { id },
        StoreError::VersionConflict { .. } => WorkflowError::ConcurrentModification {
            id: id.clone(),
        },
        other => WorkflowError::Storage {
            reason: other.to_string(),
        },
    }
}

fn map_insurance_error(error: InsuranceError) -> WorkflowError {
    match error {
        InsuranceError::Validation(err) => WorkflowError::Validation(err),
        InsuranceError::Unavailable { reason } => WorkflowError::IntegrationUnavailable {
            upstream: "insurance",
            reason,
        },
        InsuranceError::Rejected { reason } => WorkflowError::UpstreamRejected {
            upstream: "insurance",
            reason,
        },
        InsuranceError::Ambiguous {
            idempotency_key,
            reason,
        } => WorkflowError::AmbiguousUpstreamFailure {
            upstream: "insurance",
            idempotency_key,
            reason,
        },
        InsuranceError::Codec(err) => WorkflowError::IntegrationUnavailable {
            upstream: "insurance",
            reason: format!("unreadable payer reply: {err}"),
        },
        InsuranceError::NotConfigured { reason } => WorkflowError::NotConfigured { reason },
    }
}

fn map_pharmacy_error(error: PharmacyError) -> WorkflowError {
    match error {
        PharmacyError::Validation(err) => WorkflowError::Validation(err),
        PharmacyError::NotConfigured { reason } => WorkflowError::NotConfigured { reason },
        PharmacyError::Unavailable { reason } => WorkflowError::IntegrationUnavailable {
            upstream: "pharmacy",
            reason,
        },
        PharmacyError::Rejected { reason } => WorkflowError::UpstreamRejected {
            upstream: "pharmacy",
            reason,
        },
        PharmacyError::Codec(err) => WorkflowError::IntegrationUnavailable {
            upstream: "pharmacy",
            reason: format!("unreadable pharmacy reply: {err}"),
        },
    }
}

/// Input for creating a record. All four blocks are validated before the
/// record exists anywhere.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewAuthorization {
    pub patient: PatientInfo,
    pub insurance: InsuranceInfo,
    pub medication: MedicationInfo,
    pub clinical: ClinicalInfo,
    pub created_by: ActorId,
}

/// A requested lifecycle transition.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransitionRequest {
    pub target_status: AuthorizationStatus,
    pub reason: String,
    pub actor: ActorId,
}

/// Orchestrates the authorization lifecycle over a store, the two upstream
/// gateways, and the update publisher.
#[derive(Clone)]
pub struct WorkflowService {
    store: Arc<dyn AuthorizationStore>,
    insurance: Arc<dyn InsuranceGateway>,
    pharmacy: Arc<dyn PharmacyGateway>,
    publisher: Arc<dyn UpdatePublisher>,
}

impl WorkflowService {
    pub fn new(
        store: Arc<dyn AuthorizationStore>,
        insurance: Arc<dyn InsuranceGateway>,
        pharmacy: Arc<dyn PharmacyGateway>,
        publisher: Arc<dyn UpdatePublisher>,
    ) -> Self {
        Self {
            store,
            insurance,
            pharmacy,
            publisher,
        }
    }

    /// Validate and store a fresh `DRAFT` record, announcing it to
    /// subscribers.
    pub async fn create_authorization(
        &self,
        new: NewAuthorization,
    ) -> Result<Authorization, WorkflowError> {
        new.patient.validate()?;
        new.insurance.validate()?;
        new.medication.validate()?;
        new.clinical.validate()?;

        let authorization = Authorization::new(
            new.patient,
            new.insurance,
            new.medication,
            new.clinical,
            new.created_by,
        );
        let stored = self
            .store
            .insert(authorization)
            .await
            .map_err(|err| WorkflowError::Storage {
                reason: err.to_string(),
            })?;
        counter!("epa_authorizations_created_total").increment(1);
        tracing::info!(authorization = %stored.id, "authorization created");
        self.emit(StatusUpdateEvent::created(&stored)).await;
        Ok(stored)
    }

    /// Fetch a record, repairing a drifted status field from the ledger.
    pub async fn get_authorization(
        &self,
        id: &AuthorizationId,
    ) -> Result<Authorization, WorkflowError> {
        let mut authorization = self
            .store
            .load(id)
            .await
            .map_err(|err| map_store_error(id, err))?;
        reconcile_status(&mut authorization);
        Ok(authorization)
    }

    /// Records in `status` (or all), newest first.
    pub async fn list_authorizations(
        &self,
        status: Option<AuthorizationStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Authorization>, WorkflowError> {
        self.store
            .list_by_status(status, limit, offset)
            .await
            .map_err(|err| WorkflowError::Storage {
                reason: err.to_string(),
            })
    }

    /// The reviewer work queue, oldest first.
    pub async fn pending_queue(&self) -> Result<Vec<Authorization>, WorkflowError> {
        self.store
            .list_pending()
            .await
            .map_err(|err| WorkflowError::Storage {
                reason: err.to_string(),
            })
    }

    /// Record counts per lifecycle status.
    pub async fn stats(&self) -> Result<HashMap<AuthorizationStatus, i64>, WorkflowError> {
        self.store
            .count_by_status()
            .await
            .map_err(|err| WorkflowError::Storage {
                reason: err.to_string(),
            })
    }

    /// Records touched at or after `since`, most recent first.
    pub async fn recently_updated(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<Authorization>, WorkflowError> {
        self.store
            .list_recently_updated(since)
            .await
            .map_err(|err| WorkflowError::Storage {
                reason: err.to_string(),
            })
    }

    /// Run one lifecycle transition end to end.
    ///
    /// The edge is validated before any side effect, so a disallowed
    /// request makes zero gateway calls. A mandatory side-effect failure
    /// aborts before the save; a save-time version conflict surfaces as
    /// [`WorkflowError::ConcurrentModification`] with nothing persisted by
    /// this caller.
    pub async fn request_transition(
        &self,
        id: &AuthorizationId,
        request: TransitionRequest,
    ) -> Result<Authorization, WorkflowError> {
        let mut authorization = self
            .store
            .load(id)
            .await
            .map_err(|err| map_store_error(id, err))?;
        reconcile_status(&mut authorization);
        authorization
            .status
            .ensure_transition(request.target_status)?;

        self.run_side_effects(&mut authorization, request.target_status)
            .await?;

        authorization.record_transition(
            request.target_status,
            request.actor,
            request.reason,
            Utc::now(),
        )?;
        let saved = self
            .store
            .save(authorization)
            .await
            .map_err(|err| map_store_error(id, err))?;

        counter!("epa_transitions_total", "to" => saved.status.as_str()).increment(1);
        tracing::info!(
            authorization = %saved.id,
            status = %saved.status,
            version = saved.version,
            "transition committed"
        );
        if let Some(change) = saved.audit.status_history.last() {
            self.emit(StatusUpdateEvent::status_changed(&saved.id, change))
                .await;
        }
        Ok(saved)
    }

    /// Gateway work a transition requires, applied to the in-memory copy
    /// only. Nothing here touches the store.
    async fn run_side_effects(
        &self,
        authorization: &mut Authorization,
        target: AuthorizationStatus,
    ) -> Result<(), WorkflowError> {
        match (authorization.status, target) {
            (AuthorizationStatus::Draft, AuthorizationStatus::Submitted) => {
                let receipt = self
                    .pharmacy
                    .send_pa_request(authorization)
                    .await
                    .map_err(map_pharmacy_error)?;
                authorization.record_event(
                    format!(
                        "pharmacy PA intake accepted, ref {}",
                        receipt.pharmacy_reference_id
                    ),
                    receipt.accepted_at,
                );
                authorization.pharmacy_reference_id = Some(receipt.pharmacy_reference_id);
            }
            (AuthorizationStatus::Submitted, AuthorizationStatus::UnderReview) => {
                let receipt = self
                    .insurance
                    .submit_authorization(authorization)
                    .await
                    .map_err(map_insurance_error)?;
                authorization.record_event(
                    format!(
                        "insurance submission accepted, ref {}",
                        receipt.external_reference_id
                    ),
                    receipt.submitted_at,
                );
                authorization.external_reference_id = Some(receipt.external_reference_id);

                let coverage = self
                    .insurance
                    .check_eligibility(
                        &authorization.patient,
                        &authorization.insurance,
                        &authorization.medication,
                    )
                    .await
                    .map_err(map_insurance_error)?;
                authorization.record_event(
                    format!(
                        "eligibility: covered={}, prior_auth_required={}",
                        coverage.is_covered, coverage.prior_auth_required
                    ),
                    coverage.checked_at,
                );
                authorization.coverage = Some(coverage);
            }
            (_, AuthorizationStatus::UnderReview) => {
                // Re-entry into review after documents, new info, or an
                // appeal: refresh coverage if the payer answers, continue
                // without it if not.
                match self
                    .insurance
                    .check_eligibility(
                        &authorization.patient,
                        &authorization.insurance,
                        &authorization.medication,
                    )
                    .await
                {
                    Ok(coverage) => {
                        authorization.record_event(
                            format!(
                                "eligibility refreshed: covered={}, prior_auth_required={}",
                                coverage.is_covered, coverage.prior_auth_required
                            ),
                            coverage.checked_at,
                        );
                        authorization.coverage = Some(coverage);
                    }
                    Err(err) => {
                        tracing::warn!(
                            authorization = %authorization.id,
                            error = %err,
                            "eligibility refresh failed; proceeding without it"
                        );
                        authorization.record_event(
                            format!("eligibility enrichment skipped: {err}"),
                            Utc::now(),
                        );
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Fire-and-forget publication. The change is already committed;
    /// notification problems are logged, counted, and dropped.
    async fn emit(&self, event: StatusUpdateEvent) {
        if let Err(err) = self.publisher.publish(event).await {
            counter!("epa_update_publish_failures_total").increment(1);
            tracing::warn!(error = %err, "update publish failed; change is already committed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use epa_core::CoverageSummary;
    use epa_gateway::{
        MockInsuranceGateway, MockPharmacyGateway, PharmacyReceipt, RemoteStatusReport,
        SubmissionReceipt,
    };
    use tokio::sync::broadcast::error::TryRecvError;

    use crate::events::UpdateType;
    use crate::publish::{BroadcastPublisher, PublishError};
    use crate::store::InMemoryAuthorizationStore;

    fn new_authorization() -> NewAuthorization {
        NewAuthorization {
            patient: PatientInfo {
                first_name: "Maria".to_string(),
                last_name: "Santos".to_string(),
                date_of_birth: chrono::NaiveDate::from_ymd_opt(1987, 3, 14).unwrap(),
                gender: None,
                contact_phone: None,
            },
            insurance: InsuranceInfo {
                payer_id: "60054".to_string(),
                payer_name: None,
                plan_id: "PPO-2400".to_string(),
                member_id: "W882341207".to_string(),
                group_number: None,
            },
            medication: MedicationInfo {
                ndc_code: "0074-3799-13".to_string(),
                drug_name: "Adalimumab".to_string(),
                quantity: 2,
                days_supply: 28,
                directions: None,
            },
            clinical: ClinicalInfo {
                prescriber_npi: "1234567893".to_string(),
                prescriber_name: None,
                diagnosis_codes: vec!["M05.79".to_string()],
                clinical_rationale: Some("anti-TNF failure, escalation required".to_string()),
            },
            created_by: ActorId::new(),
        }
    }

    fn transition(target: AuthorizationStatus, reason: &str) -> TransitionRequest {
        TransitionRequest {
            target_status: target,
            reason: reason.to_string(),
            actor: ActorId::new(),
        }
    }

    fn mock_service(
        store: Arc<dyn AuthorizationStore>,
        publisher: Arc<dyn UpdatePublisher>,
    ) -> WorkflowService {
        WorkflowService::new(
            store,
            Arc::new(MockInsuranceGateway::new()),
            Arc::new(MockPharmacyGateway::new()),
            publisher,
        )
    }

    // ---- rigged collaborators ----

    #[derive(Clone, Copy)]
    enum InsuranceMode {
        Healthy,
        SubmissionDown,
        SubmissionAmbiguous,
        EligibilityDown,
    }

    struct RiggedInsurance {
        mode: InsuranceMode,
    }

    #[async_trait]
    impl InsuranceGateway for RiggedInsurance {
        async fn check_eligibility(
            &self,
            _patient: &PatientInfo,
            _insurance: &InsuranceInfo,
            _medication: &MedicationInfo,
        ) -> Result<CoverageSummary, InsuranceError> {
            if matches!(self.mode, InsuranceMode::EligibilityDown) {
                return Err(InsuranceError::Unavailable {
                    reason: "eligibility endpoint down".to_string(),
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
            _authorization: &Authorization,
        ) -> Result<SubmissionReceipt, InsuranceError> {
            match self.mode {
                InsuranceMode::SubmissionDown => Err(InsuranceError::Unavailable {
                    reason: "submission endpoint down".to_string(),
                }),
                InsuranceMode::SubmissionAmbiguous => Err(InsuranceError::Ambiguous {
                    idempotency_key: "5f9a1c0e".to_string(),
                    reason: "timed out with the request possibly delivered".to_string(),
                }),
                _ => Ok(SubmissionReceipt {
                    external_reference_id: "PA-2024-0881".to_string(),
                    idempotency_key: "5f9a1c0e".to_string(),
                    submitted_at: Utc::now(),
                }),
            }
        }

        async fn check_status(
            &self,
            external_reference_id: &str,
        ) -> Result<RemoteStatusReport, InsuranceError> {
            let _ = external_reference_id;
            Ok(RemoteStatusReport {
                status: AuthorizationStatus::UnderReview,
                remote_code: "A4".to_string(),
                evidence: None,
                checked_at: Utc::now(),
            })
        }

        fn gateway_name(&self) -> &str {
            "RiggedInsurance"
        }
    }

    struct BrokenPharmacy;

    #[async_trait]
    impl PharmacyGateway for BrokenPharmacy {
        async fn send_pa_request(
            &self,
            _authorization: &Authorization,
        ) -> Result<PharmacyReceipt, PharmacyError> {
            Err(PharmacyError::Unavailable {
                reason: "pharmacy rail offline".to_string(),
            })
        }

        async fn check_pa_status(
            &self,
            _pharmacy_reference_id: &str,
        ) -> Result<epa_gateway::PharmacyStatusReport, PharmacyError> {
            Err(PharmacyError::Unavailable {
                reason: "pharmacy rail offline".to_string(),
            })
        }

        fn gateway_name(&self) -> &str {
            "BrokenPharmacy"
        }
    }

    struct FailingPublisher;

    #[async_trait]
    impl UpdatePublisher for FailingPublisher {
        async fn publish(&self, _event: StatusUpdateEvent) -> Result<(), PublishError> {
            Err(PublishError {
                reason: "bus offline".to_string(),
            })
        }
    }

    /// Store wrapper that holds every loader at a barrier until all racers
    /// have loaded, forcing the version conflict the race is about.
    struct BarrierStore {
        inner: Arc<InMemoryAuthorizationStore>,
        barrier: tokio::sync::Barrier,
    }

    #[async_trait]
    impl AuthorizationStore for BarrierStore {
        async fn insert(&self, authorization: Authorization) -> Result<Authorization, StoreError> {
            self.inner.insert(authorization).await
        }

        async fn load(&self, id: &AuthorizationId) -> Result<Authorization, StoreError> {
            let record = self.inner.load(id).await?;
            self.barrier.wait().await;
            Ok(record)
        }

        async fn save(&self, authorization: Authorization) -> Result<Authorization, StoreError> {
            self.inner.save(authorization).await
        }

        async fn list_by_status(
            &self,
            status: Option<AuthorizationStatus>,
            limit: i64,
            offset: i64,
        ) -> Result<Vec<Authorization>, StoreError> {
            self.inner.list_by_status(status, limit, offset).await
        }

        async fn list_pending(&self) -> Result<Vec<Authorization>, StoreError> {
            self.inner.list_pending().await
        }

        async fn count_by_status(
            &self,
        ) -> Result<HashMap<AuthorizationStatus, i64>, StoreError> {
            self.inner.count_by_status().await
        }

        async fn list_recently_updated(
            &self,
            since: DateTime<Utc>,
        ) -> Result<Vec<Authorization>, StoreError> {
            self.inner.list_recently_updated(since).await
        }
    }

    // ---- create ----

    #[tokio::test]
    async fn create_stores_a_draft_and_announces_it() {
        let store = Arc::new(InMemoryAuthorizationStore::new());
        let publisher = Arc::new(BroadcastPublisher::new(8));
        let mut updates = publisher.subscribe();
        let service = mock_service(store.clone(), publisher);

        let created = service
            .create_authorization(new_authorization())
            .await
            .unwrap();
        assert_eq!(created.status, AuthorizationStatus::Draft);
        assert_eq!(created.version, 0);

        let event = updates.recv().await.unwrap();
        assert_eq!(event.update_type, UpdateType::Created);
        assert_eq!(event.authorization_id, created.id);
        assert_eq!(event.status, AuthorizationStatus::Draft);
    }

    #[tokio::test]
    async fn invalid_input_never_reaches_the_store() {
        let store = Arc::new(InMemoryAuthorizationStore::new());
        let service = mock_service(store.clone(), Arc::new(BroadcastPublisher::new(8)));

        let mut input = new_authorization();
        input.insurance.member_id = "  ".to_string();
        let err = service.create_authorization(input).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)));
        assert!(store.is_empty());
    }

    // ---- transitions ----

    #[tokio::test]
    async fn approval_walk_commits_and_publishes_every_step() {
        let store = Arc::new(InMemoryAuthorizationStore::new());
        let publisher = Arc::new(BroadcastPublisher::new(16));
        let mut updates = publisher.subscribe();
        let service = mock_service(store.clone(), publisher);

        let created = service
            .create_authorization(new_authorization())
            .await
            .unwrap();
        for (target, reason) in [
            (AuthorizationStatus::Submitted, "sent to pharmacy"),
            (AuthorizationStatus::UnderReview, "payer accepted"),
            (AuthorizationStatus::Approved, "criteria met"),
        ] {
            service
                .request_transition(&created.id, transition(target, reason))
                .await
                .unwrap();
        }

        let settled = service.get_authorization(&created.id).await.unwrap();
        assert_eq!(settled.status, AuthorizationStatus::Approved);
        assert_eq!(settled.version, 3, "one bump per committed transition");
        assert_eq!(settled.audit.status_history.len(), 3);
        assert!(settled.audit_consistent());
        assert!(settled.pharmacy_reference_id.is_some(), "set on submission");
        assert!(settled.external_reference_id.is_some(), "set on review entry");
        assert!(settled.coverage.is_some(), "eligibility enrichment merged");

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(updates.recv().await.unwrap());
        }
        assert_eq!(seen[0].update_type, UpdateType::Created);
        assert_eq!(
            seen.iter().skip(1).map(|e| e.status).collect::<Vec<_>>(),
            vec![
                AuthorizationStatus::Submitted,
                AuthorizationStatus::UnderReview,
                AuthorizationStatus::Approved,
            ]
        );
        assert_eq!(seen[3].reason, "criteria met");
    }

    #[tokio::test]
    async fn disallowed_edge_changes_nothing_and_stays_silent() {
        let store = Arc::new(InMemoryAuthorizationStore::new());
        let publisher = Arc::new(BroadcastPublisher::new(8));
        let mut updates = publisher.subscribe();
        let service = mock_service(store.clone(), publisher);

        let created = service
            .create_authorization(new_authorization())
            .await
            .unwrap();
        let err = service
            .request_transition(
                &created.id,
                transition(AuthorizationStatus::Approved, "skip the queue"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidTransition(_)));

        let reloaded = service.get_authorization(&created.id).await.unwrap();
        assert_eq!(reloaded.status, AuthorizationStatus::Draft);
        assert!(reloaded.audit.status_history.is_empty());
        assert_eq!(reloaded.version, 0);

        // Only the creation announcement; the rejected request emits nothing.
        updates.recv().await.unwrap();
        assert!(matches!(updates.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn transition_on_a_missing_record_is_not_found() {
        let service = mock_service(
            Arc::new(InMemoryAuthorizationStore::new()),
            Arc::new(BroadcastPublisher::new(8)),
        );
        let id = AuthorizationId::new();
        let err = service
            .request_transition(&id, transition(AuthorizationStatus::Submitted, "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound { .. }));
    }

    // ---- gateway side effects ----

    #[tokio::test]
    async fn pharmacy_outage_aborts_the_submission_edge() {
        let store = Arc::new(InMemoryAuthorizationStore::new());
        let publisher = Arc::new(BroadcastPublisher::new(8));
        let mut updates = publisher.subscribe();
        let service = WorkflowService::new(
            store.clone(),
            Arc::new(MockInsuranceGateway::new()),
            Arc::new(BrokenPharmacy),
            publisher,
        );

        let created = service
            .create_authorization(new_authorization())
            .await
            .unwrap();
        let err = service
            .request_transition(
                &created.id,
                transition(AuthorizationStatus::Submitted, "send it"),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::IntegrationUnavailable {
                upstream: "pharmacy",
                ..
            }
        ));

        let reloaded = service.get_authorization(&created.id).await.unwrap();
        assert_eq!(reloaded.status, AuthorizationStatus::Draft);
        assert!(reloaded.pharmacy_reference_id.is_none());
        assert!(reloaded.audit.workflow_events.is_empty(), "nothing persisted");

        updates.recv().await.unwrap();
        assert!(matches!(updates.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn insurance_outage_aborts_the_review_edge() {
        let store = Arc::new(InMemoryAuthorizationStore::new());
        let service = mock_service(store.clone(), Arc::new(BroadcastPublisher::new(8)));
        let created = service
            .create_authorization(new_authorization())
            .await
            .unwrap();
        service
            .request_transition(
                &created.id,
                transition(AuthorizationStatus::Submitted, "sent"),
            )
            .await
            .unwrap();

        let rigged = WorkflowService::new(
            store.clone(),
            Arc::new(RiggedInsurance {
                mode: InsuranceMode::SubmissionDown,
            }),
            Arc::new(MockPharmacyGateway::new()),
            Arc::new(BroadcastPublisher::new(8)),
        );
        let err = rigged
            .request_transition(
                &created.id,
                transition(AuthorizationStatus::UnderReview, "triage"),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::IntegrationUnavailable {
                upstream: "insurance",
                ..
            }
        ));

        let reloaded = rigged.get_authorization(&created.id).await.unwrap();
        assert_eq!(reloaded.status, AuthorizationStatus::Submitted);
        assert!(reloaded.external_reference_id.is_none());
    }

    #[tokio::test]
    async fn ambiguous_submission_failure_keeps_its_key_visible() {
        let store = Arc::new(InMemoryAuthorizationStore::new());
        let service = mock_service(store.clone(), Arc::new(BroadcastPublisher::new(8)));
        let created = service
            .create_authorization(new_authorization())
            .await
            .unwrap();
        service
            .request_transition(
                &created.id,
                transition(AuthorizationStatus::Submitted, "sent"),
            )
            .await
            .unwrap();

        let rigged = WorkflowService::new(
            store,
            Arc::new(RiggedInsurance {
                mode: InsuranceMode::SubmissionAmbiguous,
            }),
            Arc::new(MockPharmacyGateway::new()),
            Arc::new(BroadcastPublisher::new(8)),
        );
        let err = rigged
            .request_transition(
                &created.id,
                transition(AuthorizationStatus::UnderReview, "triage"),
            )
            .await
            .unwrap_err();
        match err {
            WorkflowError::AmbiguousUpstreamFailure {
                upstream,
                idempotency_key,
                ..
            } => {
                assert_eq!(upstream, "insurance");
                assert_eq!(idempotency_key, "5f9a1c0e");
            }
            other => panic!("expected AmbiguousUpstreamFailure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn review_reentry_survives_an_eligibility_outage() {
        let store = Arc::new(InMemoryAuthorizationStore::new());
        let service = mock_service(store.clone(), Arc::new(BroadcastPublisher::new(16)));
        let created = service
            .create_authorization(new_authorization())
            .await
            .unwrap();
        for (target, reason) in [
            (AuthorizationStatus::Submitted, "sent"),
            (AuthorizationStatus::UnderReview, "payer accepted"),
            (AuthorizationStatus::NeedsInfo, "missing chart notes"),
        ] {
            service
                .request_transition(&created.id, transition(target, reason))
                .await
                .unwrap();
        }

        let rigged = WorkflowService::new(
            store,
            Arc::new(RiggedInsurance {
                mode: InsuranceMode::EligibilityDown,
            }),
            Arc::new(MockPharmacyGateway::new()),
            Arc::new(BroadcastPublisher::new(8)),
        );
        let updated = rigged
            .request_transition(
                &created.id,
                transition(AuthorizationStatus::UnderReview, "notes supplied"),
            )
            .await
            .unwrap();

        assert_eq!(updated.status, AuthorizationStatus::UnderReview);
        let marker = updated
            .audit
            .workflow_events
            .last()
            .expect("skip marker recorded");
        assert!(marker.note.contains("eligibility enrichment skipped"));
    }

    // ---- publisher ----

    #[tokio::test]
    async fn publish_failure_never_rolls_back_a_commit() {
        let store = Arc::new(InMemoryAuthorizationStore::new());
        let service = WorkflowService::new(
            store.clone(),
            Arc::new(MockInsuranceGateway::new()),
            Arc::new(MockPharmacyGateway::new()),
            Arc::new(FailingPublisher),
        );

        let created = service
            .create_authorization(new_authorization())
            .await
            .unwrap();
        service
            .request_transition(
                &created.id,
                transition(AuthorizationStatus::Submitted, "sent"),
            )
            .await
            .unwrap();

        let reloaded = service.get_authorization(&created.id).await.unwrap();
        assert_eq!(reloaded.status, AuthorizationStatus::Submitted);
        assert_eq!(reloaded.version, 1);
    }

    // ---- concurrency ----

    #[tokio::test]
    async fn concurrent_decisions_let_exactly_one_writer_win() {
        let inner = Arc::new(InMemoryAuthorizationStore::new());
        let seed = mock_service(inner.clone(), Arc::new(BroadcastPublisher::new(16)));
        let created = seed.create_authorization(new_authorization()).await.unwrap();
        for (target, reason) in [
            (AuthorizationStatus::Submitted, "sent"),
            (AuthorizationStatus::UnderReview, "payer accepted"),
        ] {
            seed.request_transition(&created.id, transition(target, reason))
                .await
                .unwrap();
        }

        let racing = Arc::new(mock_service(
            Arc::new(BarrierStore {
                inner: inner.clone(),
                barrier: tokio::sync::Barrier::new(2),
            }),
            Arc::new(BroadcastPublisher::new(16)),
        ));

        let approve = tokio::spawn({
            let service = racing.clone();
            let id = created.id.clone();
            async move {
                service
                    .request_transition(
                        &id,
                        transition(AuthorizationStatus::Approved, "criteria met"),
                    )
                    .await
            }
        });
        let deny = tokio::spawn({
            let service = racing.clone();
            let id = created.id.clone();
            async move {
                service
                    .request_transition(
                        &id,
                        transition(AuthorizationStatus::Denied, "criteria not met"),
                    )
                    .await
            }
        });

        let outcomes = [approve.await.unwrap(), deny.await.unwrap()];
        let winners = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
        assert_eq!(winners, 1, "exactly one decision may commit");
        let loser = outcomes
            .iter()
            .find(|outcome| outcome.is_err())
            .and_then(|outcome| outcome.as_ref().err())
            .expect("one loser");
        assert!(matches!(
            loser,
            WorkflowError::ConcurrentModification { .. }
        ));

        let settled = inner.load(&created.id).await.unwrap();
        assert!(
            settled.status == AuthorizationStatus::Approved
                || settled.status == AuthorizationStatus::Denied
        );
        assert_eq!(settled.audit.status_history.len(), 3, "one decision entry");
        assert!(settled.audit_consistent());
    }
}
