// Copyright (c) 2025 - Cowboy AI, Inc.
//! Synchronous provisioning fallback
//!
//! The owning service may ask a dependent service to provision a patient
//! directly instead of (or in addition to) publishing an event. The dependent
//! service answers with the same [`Provisioner`] the event consumer uses, so
//! the two paths converge on one idempotent operation:
//!
//! ```text
//! PatientService ──FallbackClient──> ProvisioningResponder ──> Provisioner (SYNC_CALL)
//!        │                                                        ▲
//!        └──publish──> broker ──> EventConsumer ──────────────────┘ (EVENT)
//! ```
//!
//! For the caller, a resource that already exists is success. Failures fall
//! into two groups: the service (or its store) is unavailable, in which case
//! the caller can rely on the event path alone, or the request itself is bad.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::events::{DomainEvent, SubjectId, ValidationError};
use crate::provisioning::{
    ProvisionError, ProvisionOutcome, Provisioned, Provisioner, ProvisioningSource,
};

pub mod local;
pub mod nats;

pub use local::LocalFallbackClient;
pub use nats::{NatsFallbackClient, ProvisioningResponder};

/// Request to provision one patient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionRequest {
    pub subject_id: String,
    pub name: String,
    pub email: String,
}

impl ProvisionRequest {
    pub fn new(
        subject_id: impl Into<String>,
        name: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            name: name.into(),
            email: email.into(),
        }
    }

    /// Creation event equivalent to this request
    pub fn to_event(&self) -> Result<DomainEvent, ValidationError> {
        let subject_id = SubjectId::new(self.subject_id.clone())?;
        let event = DomainEvent::created(subject_id, self.name.clone(), self.email.clone());
        event.validate()?;
        Ok(event)
    }
}

impl From<&DomainEvent> for ProvisionRequest {
    fn from(event: &DomainEvent) -> Self {
        Self::new(
            event.subject_id.as_str(),
            event.name().unwrap_or_default(),
            event.email().unwrap_or_default(),
        )
    }
}

/// Reply sent back by the dependent service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProvisionReply {
    /// This request created the resource
    Provisioned { resource_id: Uuid, status: String },
    /// Resource existed already (created by either path)
    AlreadyExists { resource_id: Uuid, status: String },
    /// Service is up but its store is not
    Unavailable { reason: String },
    /// Request cannot be served
    Rejected { reason: String },
}

/// Successful answer as seen by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionReceipt {
    pub resource_id: Uuid,
    pub status: String,
    /// Whether this call created the resource
    pub created: bool,
}

/// Errors seen by a fallback caller
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FallbackError {
    /// Dependent service could not be reached
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Dependent service reached, but its store is down
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Request was refused
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// Reply could not be understood
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl FallbackError {
    /// The event path can still deliver this provisioning later
    pub fn defers_to_events(&self) -> bool {
        matches!(
            self,
            FallbackError::ServiceUnavailable(_) | FallbackError::StorageUnavailable(_)
        )
    }
}

impl ProvisionReply {
    pub fn into_receipt(self) -> Result<ProvisionReceipt, FallbackError> {
        match self {
            ProvisionReply::Provisioned {
                resource_id,
                status,
            } => Ok(ProvisionReceipt {
                resource_id,
                status,
                created: true,
            }),
            ProvisionReply::AlreadyExists {
                resource_id,
                status,
            } => Ok(ProvisionReceipt {
                resource_id,
                status,
                created: false,
            }),
            ProvisionReply::Unavailable { reason } => Err(FallbackError::StorageUnavailable(reason)),
            ProvisionReply::Rejected { reason } => Err(FallbackError::Rejected(reason)),
        }
    }
}

/// Caller side of the synchronous path
#[async_trait]
pub trait FallbackClient: Send + Sync {
    async fn provision(&self, request: &ProvisionRequest) -> Result<ProvisionReceipt, FallbackError>;
}

/// Serve one request with the shared provisioner
pub async fn handle_request<P>(provisioner: &P, request: &ProvisionRequest) -> ProvisionReply
where
    P: Provisioner + ?Sized,
{
    let event = match request.to_event() {
        Ok(event) => event,
        Err(e) => {
            warn!(subject_id = %request.subject_id, error = %e, "Rejecting provisioning request");
            return ProvisionReply::Rejected {
                reason: e.to_string(),
            };
        }
    };

    match provisioner
        .provision(&event, ProvisioningSource::SyncCall)
        .await
    {
        Ok(ProvisionOutcome::Created(resource)) => {
            info!(
                service = provisioner.service(),
                subject_id = %event.subject_id,
                resource_id = %resource.resource_id(),
                "Provisioned from sync call"
            );
            ProvisionReply::Provisioned {
                resource_id: resource.resource_id(),
                status: resource.status().to_string(),
            }
        }
        Ok(ProvisionOutcome::AlreadyProvisioned(resource)) => {
            info!(
                service = provisioner.service(),
                subject_id = %event.subject_id,
                source = %resource.source(),
                "Already provisioned, sync call is a no-op"
            );
            ProvisionReply::AlreadyExists {
                resource_id: resource.resource_id(),
                status: resource.status().to_string(),
            }
        }
        Ok(ProvisionOutcome::NotApplicable) => ProvisionReply::Rejected {
            reason: format!("{} does not provision on request", provisioner.service()),
        },
        Err(ProvisionError::Invalid(e)) => ProvisionReply::Rejected {
            reason: e.to_string(),
        },
        Err(ProvisionError::Storage(e)) => {
            warn!(
                service = provisioner.service(),
                subject_id = %event.subject_id,
                error = %e,
                "Store failed while serving sync call"
            );
            ProvisionReply::Unavailable {
                reason: e.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provisioning::{AccountStatus, BillingAccount, BillingProvisioner};
    use crate::store::InMemoryStore;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn billing() -> (BillingProvisioner, InMemoryStore<BillingAccount>) {
        let store = InMemoryStore::<BillingAccount>::new();
        (BillingProvisioner::new(Arc::new(store.clone())), store)
    }

    #[tokio::test]
    async fn test_first_call_provisions_second_already_exists() {
        let (billing, store) = billing();
        let request = ProvisionRequest::new("p2", "Jane", "jane@x.com");

        let first = handle_request(&billing, &request).await;
        let second = handle_request(&billing, &request).await;

        let ProvisionReply::Provisioned { resource_id, status } = first else {
            panic!("expected a new account");
        };
        assert_eq!(status, AccountStatus::Active.as_str());
        assert_eq!(
            second,
            ProvisionReply::AlreadyExists {
                resource_id,
                status
            }
        );
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_invalid_request_rejected() {
        let (billing, store) = billing();

        let reply = handle_request(&billing, &ProvisionRequest::new("", "Jane", "jane@x.com")).await;

        assert!(matches!(reply, ProvisionReply::Rejected { .. }));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_store_down_reports_unavailable() {
        let (billing, store) = billing();
        store.set_available(false);

        let reply = handle_request(&billing, &ProvisionRequest::new("p1", "Jane", "jane@x.com")).await;

        let err = reply.into_receipt().unwrap_err();
        assert!(matches!(err, FallbackError::StorageUnavailable(_)));
        assert!(err.defers_to_events());
    }

    #[test]
    fn test_already_exists_is_success() {
        let reply = ProvisionReply::AlreadyExists {
            resource_id: Uuid::nil(),
            status: "ACTIVE".into(),
        };

        let receipt = reply.into_receipt().unwrap();

        assert!(!receipt.created);
    }

    #[test]
    fn test_reply_wire_format() {
        let reply = ProvisionReply::Rejected {
            reason: "bad".into(),
        };

        let json = serde_json::to_value(&reply).unwrap();

        assert_eq!(json, serde_json::json!({"outcome": "rejected", "reason": "bad"}));
    }

    #[test]
    fn test_rejected_does_not_defer() {
        assert!(!FallbackError::Rejected("bad".into()).defers_to_events());
        assert!(!FallbackError::Protocol("garbled".into()).defers_to_events());
        assert!(FallbackError::ServiceUnavailable("down".into()).defers_to_events());
    }
}
