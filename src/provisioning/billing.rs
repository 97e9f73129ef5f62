// Copyright (c) 2025 - Cowboy AI, Inc.
//! Billing account provisioning
//!
//! Every patient gets exactly one billing account, opened with a zero balance
//! in `ACTIVE` status. The account is keyed by subject id; the first of the
//! event path and the synchronous path to arrive opens it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use super::{
    bounded, create_once, ProvisionError, ProvisionOutcome, Provisioned, Provisioner,
    ProvisioningSource, DEFAULT_STORAGE_TIMEOUT,
};
use crate::events::{DomainEvent, EventType, SubjectId};
use crate::store::{ResourceStore, StoreResult};
use crate::subjects::ConsumerGroup;

/// Status of a billing account; accounts are opened active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    Active,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "ACTIVE",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Billing account of one patient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingAccount {
    pub id: Uuid,
    pub subject_id: SubjectId,
    pub patient_name: String,
    pub patient_email: String,
    pub balance: Decimal,
    pub status: AccountStatus,
    pub provisioning_source: ProvisioningSource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BillingAccount {
    /// New active account with a zero balance
    pub fn open(event: &DomainEvent, source: ProvisioningSource) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            subject_id: event.subject_id.clone(),
            patient_name: event.name().unwrap_or_default().to_string(),
            patient_email: event.email().unwrap_or_default().to_string(),
            balance: Decimal::ZERO,
            status: AccountStatus::Active,
            provisioning_source: source,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Provisioned for BillingAccount {
    fn resource_id(&self) -> Uuid {
        self.id
    }

    fn subject_id(&self) -> &SubjectId {
        &self.subject_id
    }

    fn status(&self) -> &str {
        self.status.as_str()
    }

    fn source(&self) -> ProvisioningSource {
        self.provisioning_source
    }
}

/// Opens one billing account per patient
#[derive(Clone)]
pub struct BillingProvisioner {
    store: Arc<dyn ResourceStore<BillingAccount>>,
    storage_timeout: Duration,
}

impl BillingProvisioner {
    pub fn new(store: Arc<dyn ResourceStore<BillingAccount>>) -> Self {
        Self {
            store,
            storage_timeout: DEFAULT_STORAGE_TIMEOUT,
        }
    }

    /// Bound every store call by `timeout`
    pub fn with_storage_timeout(mut self, timeout: Duration) -> Self {
        self.storage_timeout = timeout;
        self
    }

    /// Account of a patient, if provisioned
    pub async fn account(&self, subject_id: &SubjectId) -> StoreResult<Option<BillingAccount>> {
        bounded(self.storage_timeout, self.store.find(subject_id.as_str())).await
    }

    /// Every provisioned account
    pub async fn accounts(&self) -> StoreResult<Vec<BillingAccount>> {
        bounded(self.storage_timeout, self.store.list()).await
    }
}

#[async_trait]
impl Provisioner for BillingProvisioner {
    type Resource = BillingAccount;

    fn service(&self) -> &str {
        ConsumerGroup::Billing.as_str()
    }

    async fn provision(
        &self,
        event: &DomainEvent,
        source: ProvisioningSource,
    ) -> Result<ProvisionOutcome<BillingAccount>, ProvisionError> {
        event.validate()?;

        if event.event_type != EventType::Created {
            return Ok(ProvisionOutcome::NotApplicable);
        }

        let outcome = create_once(
            self.store.as_ref(),
            event.subject_id.as_str(),
            self.storage_timeout,
            || BillingAccount::open(event, source),
        )
        .await?;

        if let ProvisionOutcome::Created(account) = &outcome {
            info!(
                subject_id = %account.subject_id,
                account_id = %account.id,
                source = %account.provisioning_source,
                "Opened billing account"
            );
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use pretty_assertions::assert_eq;

    fn provisioner() -> (BillingProvisioner, InMemoryStore<BillingAccount>) {
        let store = InMemoryStore::<BillingAccount>::new();
        (BillingProvisioner::new(Arc::new(store.clone())), store)
    }

    fn created(id: &str) -> DomainEvent {
        DomainEvent::created(SubjectId::new(id).unwrap(), "Jane", "jane@x.com")
    }

    #[tokio::test]
    async fn test_opens_account_on_created() {
        let (billing, _) = provisioner();

        let outcome = billing
            .provision(&created("p1"), ProvisioningSource::Event)
            .await
            .unwrap();

        let ProvisionOutcome::Created(account) = outcome else {
            panic!("expected a new account");
        };
        assert_eq!(account.subject_id.as_str(), "p1");
        assert_eq!(account.patient_name, "Jane");
        assert_eq!(account.balance, Decimal::ZERO);
        assert_eq!(account.status, AccountStatus::Active);
        assert_eq!(account.provisioning_source, ProvisioningSource::Event);
    }

    #[tokio::test]
    async fn test_second_request_keeps_first_source() {
        let (billing, store) = provisioner();
        let event = created("p2");

        let first = billing
            .provision(&event, ProvisioningSource::SyncCall)
            .await
            .unwrap();
        let second = billing
            .provision(&event, ProvisioningSource::Event)
            .await
            .unwrap();

        assert!(first.is_created());
        let ProvisionOutcome::AlreadyProvisioned(account) = second else {
            panic!("expected the existing account");
        };
        assert_eq!(account.provisioning_source, ProvisioningSource::SyncCall);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_updates_and_deletes_are_not_applicable() {
        let (billing, store) = provisioner();

        for event_type in [EventType::Updated, EventType::Deleted] {
            let mut event = created("p1");
            event.event_type = event_type;

            let outcome = billing
                .provision(&event, ProvisioningSource::Event)
                .await
                .unwrap();

            assert_eq!(outcome, ProvisionOutcome::NotApplicable);
        }
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_invalid_event_rejected() {
        let (billing, store) = provisioner();
        let event = DomainEvent::created(SubjectId::new("p1").unwrap(), "Jane", "not-an-email");

        let err = billing
            .provision(&event, ProvisioningSource::Event)
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::Invalid(_)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_read_api() {
        let (billing, _) = provisioner();
        billing
            .provision(&created("p1"), ProvisioningSource::Event)
            .await
            .unwrap();

        let subject = SubjectId::new("p1").unwrap();
        assert!(billing.account(&subject).await.unwrap().is_some());
        assert_eq!(billing.accounts().await.unwrap().len(), 1);
    }
}
