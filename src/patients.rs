// Copyright (c) 2025 - Cowboy AI, Inc.
//! Patient records (owning service)
//!
//! The patient service owns the record and is the only producer of patient
//! events. Every change follows the same order:
//!
//! 1. Commit the change to the [`PatientStore`]
//! 2. Publish the matching event (after commit, never before)
//! 3. For creations, optionally call billing synchronously
//!
//! Steps 2 and 3 never undo step 1. Their results are returned in a
//! [`PropagationReport`] so the caller can see what happened on each path.
//!
//! | Mode        | Publish `CREATED` | Sync call |
//! |-------------|-------------------|-----------|
//! | `EventOnly` | yes               | no        |
//! | `SyncOnly`  | no                | yes       |
//! | `Both`      | yes               | yes       |
//!
//! Updates and deletions are always published when a publisher is configured.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::broker::PublishAck;
use crate::events::{DomainEvent, EventType, SubjectId, ValidationError};
use crate::fallback::{FallbackClient, FallbackError, ProvisionReceipt, ProvisionRequest};
use crate::publisher::{EventPublisher, PublishError, RetryPolicy};

/// Attribute carrying the patient's postal address
pub const ADDRESS_ATTRIBUTE: &str = "address";

/// Attribute carrying the patient's date of birth (ISO 8601)
pub const DATE_OF_BIRTH_ATTRIBUTE: &str = "date_of_birth";

/// Errors raised by the patient service
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PatientError {
    #[error("A patient with this email already exists: {0}")]
    EmailAlreadyExists(String),

    #[error("Patient not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid patient: {0}")]
    Invalid(#[from] ValidationError),

    #[error("Patient store error: {0}")]
    Storage(String),
}

/// Stored patient record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub address: String,
    pub date_of_birth: NaiveDate,
    pub registered_date: NaiveDate,
}

impl Patient {
    pub fn subject_id(&self) -> Result<SubjectId, ValidationError> {
        SubjectId::new(self.id.to_string())
    }

    /// Event describing this record
    pub fn to_event(&self, event_type: EventType) -> Result<DomainEvent, ValidationError> {
        let event = DomainEvent::new(
            event_type,
            self.subject_id()?,
            self.name.clone(),
            self.email.clone(),
            Utc::now(),
        )
        .with_attribute(ADDRESS_ATTRIBUTE, self.address.clone())
        .with_attribute(DATE_OF_BIRTH_ATTRIBUTE, self.date_of_birth.to_string());

        event.validate()?;
        Ok(event)
    }
}

/// Fields supplied when creating or updating a patient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPatient {
    pub name: String,
    pub email: String,
    pub address: String,
    pub date_of_birth: NaiveDate,
}

/// Durable store of patient records
///
/// `insert` and `update` must enforce email uniqueness atomically.
#[async_trait]
pub trait PatientStore: Send + Sync {
    async fn insert(&self, patient: Patient) -> Result<Patient, PatientError>;
    async fn update(&self, id: Uuid, fields: NewPatient) -> Result<Patient, PatientError>;
    async fn delete(&self, id: Uuid) -> Result<Patient, PatientError>;
    async fn get(&self, id: Uuid) -> Result<Option<Patient>, PatientError>;
    async fn list(&self) -> Result<Vec<Patient>, PatientError>;
}

/// Process-local patient store
#[derive(Debug, Clone, Default)]
pub struct InMemoryPatientStore {
    patients: Arc<RwLock<HashMap<Uuid, Patient>>>,
}

impl InMemoryPatientStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PatientStore for InMemoryPatientStore {
    async fn insert(&self, patient: Patient) -> Result<Patient, PatientError> {
        let mut patients = self.patients.write().await;
        if patients.values().any(|p| p.email == patient.email) {
            return Err(PatientError::EmailAlreadyExists(patient.email));
        }
        patients.insert(patient.id, patient.clone());
        Ok(patient)
    }

    async fn update(&self, id: Uuid, fields: NewPatient) -> Result<Patient, PatientError> {
        let mut patients = self.patients.write().await;
        if patients
            .values()
            .any(|p| p.email == fields.email && p.id != id)
        {
            return Err(PatientError::EmailAlreadyExists(fields.email));
        }

        let patient = patients.get_mut(&id).ok_or(PatientError::NotFound(id))?;
        patient.name = fields.name;
        patient.email = fields.email;
        patient.address = fields.address;
        patient.date_of_birth = fields.date_of_birth;
        Ok(patient.clone())
    }

    async fn delete(&self, id: Uuid) -> Result<Patient, PatientError> {
        self.patients
            .write()
            .await
            .remove(&id)
            .ok_or(PatientError::NotFound(id))
    }

    async fn get(&self, id: Uuid) -> Result<Option<Patient>, PatientError> {
        Ok(self.patients.read().await.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Patient>, PatientError> {
        let mut patients: Vec<_> = self.patients.read().await.values().cloned().collect();
        patients.sort_by_key(|p| p.id);
        Ok(patients)
    }
}

/// Paths used to propagate a patient creation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropagationMode {
    #[default]
    EventOnly,
    SyncOnly,
    Both,
}

impl PropagationMode {
    pub fn publishes_creation(&self) -> bool {
        matches!(self, PropagationMode::EventOnly | PropagationMode::Both)
    }

    pub fn calls_sync(&self) -> bool {
        matches!(self, PropagationMode::SyncOnly | PropagationMode::Both)
    }
}

/// What happened on the event path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPropagation {
    Published(PublishAck),
    /// Committed change was not advertised; the failure has been logged
    Failed(PublishError),
    Skipped,
}

/// What happened on the synchronous path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncPropagation {
    Provisioned(ProvisionReceipt),
    /// Dependent service unavailable; the published event will provision later
    DeferredToEvents(FallbackError),
    Failed(FallbackError),
    Skipped,
}

/// Outcome of propagating one committed change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropagationReport {
    pub event: EventPropagation,
    pub sync: SyncPropagation,
}

impl PropagationReport {
    /// At least one path is known to deliver the change
    pub fn is_propagated(&self) -> bool {
        matches!(self.event, EventPropagation::Published(_))
            || matches!(self.sync, SyncPropagation::Provisioned(_))
    }
}

/// A committed record plus its propagation report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientChange {
    pub patient: Patient,
    pub propagation: PropagationReport,
}

/// Owning service for patient records
pub struct PatientService {
    store: Arc<dyn PatientStore>,
    publisher: Option<EventPublisher>,
    fallback: Option<Arc<dyn FallbackClient>>,
    mode: PropagationMode,
    retry: RetryPolicy,
}

impl PatientService {
    pub fn new(store: Arc<dyn PatientStore>) -> Self {
        Self {
            store,
            publisher: None,
            fallback: None,
            mode: PropagationMode::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_publisher(mut self, publisher: EventPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn FallbackClient>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_mode(mut self, mode: PropagationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn mode(&self) -> PropagationMode {
        self.mode
    }

    /// Register a patient and propagate the creation
    pub async fn create_patient(&self, fields: NewPatient) -> Result<PatientChange, PatientError> {
        let patient = Patient {
            id: Uuid::now_v7(),
            name: fields.name,
            email: fields.email,
            address: fields.address,
            date_of_birth: fields.date_of_birth,
            registered_date: Utc::now().date_naive(),
        };
        patient.to_event(EventType::Created)?;

        let patient = self.store.insert(patient).await?;
        info!(patient_id = %patient.id, "Patient created");

        let event = patient.to_event(EventType::Created)?;

        let event_path = if self.mode.publishes_creation() {
            self.publish(&event).await
        } else {
            EventPropagation::Skipped
        };

        let sync = if self.mode.calls_sync() {
            self.call_sync(&event, &event_path).await
        } else {
            SyncPropagation::Skipped
        };

        Ok(PatientChange {
            patient,
            propagation: PropagationReport {
                event: event_path,
                sync,
            },
        })
    }

    /// Change a patient's details and publish the update
    pub async fn update_patient(
        &self,
        id: Uuid,
        fields: NewPatient,
    ) -> Result<PatientChange, PatientError> {
        if self.store.get(id).await?.is_none() {
            return Err(PatientError::NotFound(id));
        }

        let candidate = Patient {
            id,
            name: fields.name.clone(),
            email: fields.email.clone(),
            address: fields.address.clone(),
            date_of_birth: fields.date_of_birth,
            registered_date: Utc::now().date_naive(),
        };
        candidate.to_event(EventType::Updated)?;

        let patient = self.store.update(id, fields).await?;
        info!(patient_id = %patient.id, "Patient updated");

        let event = patient.to_event(EventType::Updated)?;
        let event_path = self.publish(&event).await;

        Ok(PatientChange {
            patient,
            propagation: PropagationReport {
                event: event_path,
                sync: SyncPropagation::Skipped,
            },
        })
    }

    /// Remove a patient and publish the deletion
    pub async fn delete_patient(&self, id: Uuid) -> Result<PatientChange, PatientError> {
        let patient = self.store.delete(id).await?;
        info!(patient_id = %patient.id, "Patient deleted");

        let event_path = match patient.to_event(EventType::Deleted) {
            Ok(event) => self.publish(&event).await,
            Err(e) => EventPropagation::Failed(PublishError::Invalid(e)),
        };

        Ok(PatientChange {
            patient,
            propagation: PropagationReport {
                event: event_path,
                sync: SyncPropagation::Skipped,
            },
        })
    }

    pub async fn patient(&self, id: Uuid) -> Result<Patient, PatientError> {
        self.store.get(id).await?.ok_or(PatientError::NotFound(id))
    }

    pub async fn patients(&self) -> Result<Vec<Patient>, PatientError> {
        self.store.list().await
    }

    async fn publish(&self, event: &DomainEvent) -> EventPropagation {
        let Some(publisher) = &self.publisher else {
            return EventPropagation::Skipped;
        };

        match publisher.publish_with_retry(event, self.retry).await {
            Ok(ack) => EventPropagation::Published(ack),
            Err(e) => {
                warn!(
                    subject_id = %event.subject_id,
                    event_type = %event.event_type,
                    error = %e,
                    "Committed change was not published"
                );
                EventPropagation::Failed(e)
            }
        }
    }

    /// Deferral to the event path only holds when that event was published
    async fn call_sync(
        &self,
        event: &DomainEvent,
        event_path: &EventPropagation,
    ) -> SyncPropagation {
        let Some(fallback) = &self.fallback else {
            return SyncPropagation::Skipped;
        };

        match fallback.provision(&ProvisionRequest::from(event)).await {
            Ok(receipt) => SyncPropagation::Provisioned(receipt),
            Err(e)
                if e.defers_to_events() && matches!(event_path, EventPropagation::Published(_)) =>
            {
                warn!(
                    subject_id = %event.subject_id,
                    error = %e,
                    "Billing unavailable, relying on the patient event"
                );
                SyncPropagation::DeferredToEvents(e)
            }
            Err(e) => {
                warn!(subject_id = %event.subject_id, error = %e, "Sync provisioning failed");
                SyncPropagation::Failed(e)
            }
        }
    }
}
