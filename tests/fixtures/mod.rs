// Copyright (c) 2025 - Cowboy AI, Inc.
//! Test Fixtures for pms-pipeline
//!
//! Provides deterministic patient events and ready-wired in-memory pipelines.
//! Event timestamps are fixed constants so encoded payloads and analytics keys
//! are reproducible.
//!
//! # Design Principles
//! - Events are built here, with fixed timestamps
//! - Pipelines use the in-memory broker and store; no NATS server needed
//! - Timeouts are short so tests that wait for "nothing" finish quickly

#![allow(dead_code)]

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;

use pms_pipeline::broker::{Broker, InMemoryBroker, PartitionStream};
use pms_pipeline::consumer::{ConsumerConfig, Disposition, EventConsumer};
use pms_pipeline::events::{DomainEvent, EventType, SubjectId};
use pms_pipeline::provisioning::{BillingAccount, BillingProvisioner, Provisioner};
use pms_pipeline::publisher::EventPublisher;
use pms_pipeline::store::InMemoryStore;
use pms_pipeline::subjects::{ConsumerGroup, PATIENT_TOPIC};

pub const SUBJECT_P1: &str = "p1";
pub const SUBJECT_P2: &str = "p2";
pub const SUBJECT_UUID: &str = "01934f4a-1000-7000-8000-000000001000";

pub const PATIENT_NAME: &str = "Jane";
pub const PATIENT_EMAIL: &str = "jane@x.com";

// Fixed test timestamp (2026-01-19T12:00:00Z)
pub const FIXED_TIMESTAMP: &str = "2026-01-19T12:00:00Z";

pub const POLL_TIMEOUT: Duration = Duration::from_millis(25);

/// Parse the fixed timestamp
pub fn fixed_timestamp() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(FIXED_TIMESTAMP)
        .expect("Invalid timestamp in test fixture")
        .with_timezone(&Utc)
}

pub fn subject(id: &str) -> SubjectId {
    SubjectId::new(id).expect("Invalid subject id in test fixture")
}

/// CREATED event for Jane at the fixed timestamp
pub fn created_event(id: &str) -> DomainEvent {
    DomainEvent::new(
        EventType::Created,
        subject(id),
        PATIENT_NAME,
        PATIENT_EMAIL,
        fixed_timestamp(),
    )
}

/// UPDATED event `minutes` after the fixed timestamp
pub fn updated_event(id: &str, minutes: i64) -> DomainEvent {
    DomainEvent::new(
        EventType::Updated,
        subject(id),
        PATIENT_NAME,
        "jane.doe@x.com",
        fixed_timestamp() + ChronoDuration::minutes(minutes),
    )
}

/// Consumer settings with short waits
pub fn fast_config(group: ConsumerGroup) -> ConsumerConfig {
    ConsumerConfig::for_group(group)
        .with_poll_timeout(POLL_TIMEOUT)
        .with_retry_backoff(Duration::from_millis(5))
}

/// Billing service wired to an in-memory broker and store
pub struct BillingPipeline {
    pub broker: InMemoryBroker,
    pub store: InMemoryStore<BillingAccount>,
    pub provisioner: Arc<BillingProvisioner>,
    pub consumer: EventConsumer<BillingProvisioner>,
    pub publisher: EventPublisher,
}

impl BillingPipeline {
    pub fn new(partitions: u32) -> Self {
        let broker = InMemoryBroker::new(partitions);
        let store = InMemoryStore::<BillingAccount>::new();
        let provisioner = Arc::new(BillingProvisioner::new(Arc::new(store.clone())));
        let shared: Arc<dyn Broker> = Arc::new(broker.clone());
        let consumer = EventConsumer::new(
            Arc::clone(&shared),
            Arc::clone(&provisioner),
            fast_config(ConsumerGroup::Billing),
        );
        let publisher = EventPublisher::new(shared);

        Self {
            broker,
            store,
            provisioner,
            consumer,
            publisher,
        }
    }

    /// Join the billing group on the partition that owns `key`
    pub async fn stream_for(&self, key: &str) -> Box<dyn PartitionStream> {
        self.broker
            .subscribe(
                PATIENT_TOPIC,
                ConsumerGroup::Billing.as_str(),
                self.broker.partition_of(key),
            )
            .await
            .expect("Failed to subscribe")
    }
}

/// Poll and handle until the partition is idle
pub async fn drain<P>(
    consumer: &EventConsumer<P>,
    stream: &mut dyn PartitionStream,
) -> Vec<Disposition>
where
    P: Provisioner + 'static,
{
    let mut dispositions = Vec::new();
    while let Some(disposition) = consumer.poll_once(stream).await.expect("Broker failed") {
        dispositions.push(disposition);
    }
    dispositions
}
