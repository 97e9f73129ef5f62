// Copyright (c) 2025 - Cowboy AI, Inc.
//! Property-Based Tests for Idempotent Provisioning
//!
//! However often and in whatever interleaving events are delivered, each
//! patient ends up with exactly one billing account and each logical event
//! with exactly one analytics record.

use chrono::{DateTime, Duration, Utc};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_test::block_on;

use pms_pipeline::events::{DomainEvent, EventType, SubjectId};
use pms_pipeline::provisioning::{
    AnalyticsProvisioner, BillingAccount, BillingProvisioner, PatientActivity, Provisioner,
    ProvisioningSource,
};
use pms_pipeline::store::InMemoryStore;

// ============================================================================
// Strategies
// ============================================================================

fn base_time() -> DateTime<Utc> {
    DateTime::from_timestamp(1_768_824_000, 0).unwrap()
}

/// (subject index, event kind, minute offset, delivered via sync call)
fn delivery() -> impl Strategy<Value = (u8, u8, u8, bool)> {
    (0u8..6, 0u8..3, 0u8..4, any::<bool>())
}

fn to_event((subject, kind, minute, _): (u8, u8, u8, bool)) -> DomainEvent {
    let event_type = match kind {
        0 => EventType::Created,
        1 => EventType::Updated,
        _ => EventType::Deleted,
    };
    DomainEvent::new(
        event_type,
        SubjectId::new(format!("p{subject}")).unwrap(),
        "Jane",
        "jane@x.com",
        base_time() + Duration::minutes(i64::from(minute)),
    )
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    /// Property: One billing account per subject that was ever created
    #[test]
    fn prop_billing_one_account_per_created_subject(
        deliveries in prop::collection::vec(delivery(), 1..60)
    ) {
        let store = InMemoryStore::<BillingAccount>::new();
        let billing = BillingProvisioner::new(Arc::new(store.clone()));

        let expected: BTreeSet<String> = deliveries
            .iter()
            .filter(|(_, kind, _, _)| *kind == 0)
            .map(|(subject, _, _, _)| format!("p{subject}"))
            .collect();

        let accounts = block_on(async {
            for d in &deliveries {
                let source = if d.3 { ProvisioningSource::SyncCall } else { ProvisioningSource::Event };
                billing.provision(&to_event(*d), source).await.unwrap();
            }
            billing.accounts().await.unwrap()
        });

        let provisioned: BTreeSet<String> =
            accounts.iter().map(|a| a.subject_id.to_string()).collect();
        prop_assert_eq!(accounts.len(), provisioned.len());
        prop_assert_eq!(provisioned, expected);
        prop_assert_eq!(store.insert_count() as usize, accounts.len());
    }

    /// Property: Replaying the whole history changes nothing
    #[test]
    fn prop_replay_is_noop(deliveries in prop::collection::vec(delivery(), 1..40)) {
        let store = InMemoryStore::<PatientActivity>::new();
        let analytics = AnalyticsProvisioner::new(Arc::new(store.clone()));

        let (first, second) = block_on(async {
            for d in &deliveries {
                analytics.provision(&to_event(*d), ProvisioningSource::Event).await.unwrap();
            }
            let first = analytics.total_events().await.unwrap();

            for d in &deliveries {
                let outcome = analytics
                    .provision(&to_event(*d), ProvisioningSource::Event)
                    .await
                    .unwrap();
                assert!(!outcome.is_created());
            }
            (first, analytics.total_events().await.unwrap())
        });

        prop_assert_eq!(first, second);
        prop_assert_eq!(store.insert_count() as usize, first);
    }

    /// Property: Analytics keeps one record per distinct logical event
    #[test]
    fn prop_analytics_counts_distinct_events(
        deliveries in prop::collection::vec(delivery(), 1..60)
    ) {
        let store = InMemoryStore::<PatientActivity>::new();
        let analytics = AnalyticsProvisioner::new(Arc::new(store.clone()));

        let distinct: BTreeSet<String> = deliveries
            .iter()
            .map(|d| PatientActivity::key_for(&to_event(*d)))
            .collect();

        let total = block_on(async {
            for d in &deliveries {
                analytics.provision(&to_event(*d), ProvisioningSource::Event).await.unwrap();
            }
            analytics.total_events().await.unwrap()
        });

        prop_assert_eq!(total, distinct.len());
    }
}
