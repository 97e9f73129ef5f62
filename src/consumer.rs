// Copyright (c) 2025 - Cowboy AI, Inc.
//! Event consumer
//!
//! Runs one worker per partition for a dependent service's consumer group.
//! Each worker handles its partition strictly one message at a time:
//!
//! ```text
//! poll ──> decode ──> validate ──> provision ──> settle
//!            │           │             │
//!         Poisoned    Rejected     Deferred (store down)
//!         Discard     Discard      Redeliver
//! ```
//!
//! | Disposition          | Settlement  | Log level |
//! |----------------------|-------------|-----------|
//! | `Provisioned`        | `Commit`    | info      |
//! | `AlreadyProvisioned` | `Commit`    | info      |
//! | `NotApplicable`      | `Commit`    | debug     |
//! | `Poisoned`           | `Discard`   | error     |
//! | `Rejected`           | `Discard`   | warn      |
//! | `Deferred`           | `Redeliver` | warn      |
//!
//! The offset only moves once processing is finished. Shutting down between
//! poll and settle leaves the message unsettled, and the broker hands it out
//! again; the provisioner's uniqueness check makes that second pass a no-op.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, BrokerResult, Delivery, PartitionStream, Settlement};
use crate::errors::InfrastructureResult;
use crate::events::codec;
use crate::provisioning::{
    ProvisionError, ProvisionOutcome, Provisioned, Provisioner, ProvisioningSource,
};
use crate::subjects::{ConsumerGroup, PATIENT_TOPIC};

/// Consumer group settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Topic to consume
    pub topic: String,
    /// Consumer group name
    pub group: String,
    /// Longest single wait for a message
    pub poll_timeout: Duration,
    /// Pause after a deferred message or a broker error
    pub retry_backoff: Duration,
    /// Log statistics every this many messages (0 = never)
    pub stats_interval: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self::for_group(ConsumerGroup::Billing)
    }
}

impl ConsumerConfig {
    /// Settings for one of the dependent services
    pub fn for_group(group: ConsumerGroup) -> Self {
        Self {
            topic: PATIENT_TOPIC.to_string(),
            group: group.as_str().to_string(),
            poll_timeout: Duration::from_secs(1),
            retry_backoff: Duration::from_millis(500),
            stats_interval: 100,
        }
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }
}

/// What processing decided about one delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Side effect performed
    Provisioned,
    /// Side effect existed already
    AlreadyProvisioned,
    /// Event needs no side effect in this service
    NotApplicable,
    /// Payload could not be decoded
    Poisoned,
    /// Event breaks a business rule
    Rejected,
    /// Processing could not finish; try again later
    Deferred,
}

impl Disposition {
    pub fn settlement(&self) -> Settlement {
        match self {
            Disposition::Provisioned
            | Disposition::AlreadyProvisioned
            | Disposition::NotApplicable => Settlement::Commit,
            Disposition::Poisoned | Disposition::Rejected => Settlement::Discard,
            Disposition::Deferred => Settlement::Redeliver,
        }
    }
}

/// Running counters of a consumer
#[derive(Debug, Default)]
pub struct ConsumerStats {
    provisioned: AtomicU64,
    already_provisioned: AtomicU64,
    not_applicable: AtomicU64,
    poisoned: AtomicU64,
    rejected: AtomicU64,
    deferred: AtomicU64,
    broker_errors: AtomicU64,
}

/// Point-in-time copy of [`ConsumerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStatsSnapshot {
    pub provisioned: u64,
    pub already_provisioned: u64,
    pub not_applicable: u64,
    pub poisoned: u64,
    pub rejected: u64,
    pub deferred: u64,
    pub broker_errors: u64,
}

impl ConsumerStatsSnapshot {
    /// Messages that reached a disposition
    pub fn processed(&self) -> u64 {
        self.provisioned
            + self.already_provisioned
            + self.not_applicable
            + self.poisoned
            + self.rejected
            + self.deferred
    }
}

impl ConsumerStats {
    fn record(&self, disposition: Disposition) -> u64 {
        let counter = match disposition {
            Disposition::Provisioned => &self.provisioned,
            Disposition::AlreadyProvisioned => &self.already_provisioned,
            Disposition::NotApplicable => &self.not_applicable,
            Disposition::Poisoned => &self.poisoned,
            Disposition::Rejected => &self.rejected,
            Disposition::Deferred => &self.deferred,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.snapshot().processed()
    }

    fn broker_error(&self) {
        self.broker_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ConsumerStatsSnapshot {
        ConsumerStatsSnapshot {
            provisioned: self.provisioned.load(Ordering::Relaxed),
            already_provisioned: self.already_provisioned.load(Ordering::Relaxed),
            not_applicable: self.not_applicable.load(Ordering::Relaxed),
            poisoned: self.poisoned.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
            broker_errors: self.broker_errors.load(Ordering::Relaxed),
        }
    }
}

/// Consumer group member driving one provisioner
pub struct EventConsumer<P> {
    broker: Arc<dyn Broker>,
    provisioner: Arc<P>,
    config: ConsumerConfig,
    stats: Arc<ConsumerStats>,
}

impl<P> EventConsumer<P>
where
    P: Provisioner + 'static,
{
    pub fn new(broker: Arc<dyn Broker>, provisioner: Arc<P>, config: ConsumerConfig) -> Self {
        Self {
            broker,
            provisioner,
            config,
            stats: Arc::new(ConsumerStats::default()),
        }
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    pub fn stats(&self) -> Arc<ConsumerStats> {
        Arc::clone(&self.stats)
    }

    /// Decide what to do with one delivery
    ///
    /// Never fails: every outcome, including storage trouble, is a
    /// [`Disposition`] the caller turns into a settlement.
    pub async fn process(&self, delivery: &Delivery) -> Disposition {
        let service = self.provisioner.service();

        let event = match codec::decode(&delivery.payload) {
            Ok(event) => event,
            Err(e) => {
                error!(
                    service,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    key = ?delivery.key,
                    error = %e,
                    "Dropping undecodable message"
                );
                return Disposition::Poisoned;
            }
        };

        match self
            .provisioner
            .provision(&event, ProvisioningSource::Event)
            .await
        {
            Ok(ProvisionOutcome::Created(resource)) => {
                info!(
                    service,
                    subject_id = %event.subject_id,
                    resource_id = %resource.resource_id(),
                    partition = delivery.partition,
                    offset = delivery.offset,
                    "Provisioned from event"
                );
                Disposition::Provisioned
            }
            Ok(ProvisionOutcome::AlreadyProvisioned(resource)) => {
                info!(
                    service,
                    subject_id = %event.subject_id,
                    resource_id = %resource.resource_id(),
                    source = %resource.source(),
                    redelivery = delivery.is_redelivery(),
                    "Already provisioned, skipping"
                );
                Disposition::AlreadyProvisioned
            }
            Ok(ProvisionOutcome::NotApplicable) => {
                debug!(
                    service,
                    subject_id = %event.subject_id,
                    event_type = %event.event_type,
                    "Event not applicable"
                );
                Disposition::NotApplicable
            }
            Err(ProvisionError::Invalid(e)) => {
                warn!(
                    service,
                    subject_id = %event.subject_id,
                    error = %e,
                    "Dropping event that breaks a business rule"
                );
                Disposition::Rejected
            }
            Err(ProvisionError::Storage(e)) => {
                if e.is_retryable() {
                    warn!(
                        service,
                        subject_id = %event.subject_id,
                        error = %e,
                        attempt = delivery.delivery_count,
                        "Store unavailable, leaving message for redelivery"
                    );
                } else {
                    error!(
                        service,
                        subject_id = %event.subject_id,
                        error = %e,
                        attempt = delivery.delivery_count,
                        "Store failed, leaving message for redelivery"
                    );
                }
                Disposition::Deferred
            }
        }
    }

    /// Process and settle a delivery
    pub async fn handle(
        &self,
        stream: &mut dyn PartitionStream,
        delivery: &Delivery,
    ) -> BrokerResult<Disposition> {
        let disposition = self.process(delivery).await;
        stream.settle(delivery, disposition.settlement()).await?;

        let processed = self.stats.record(disposition);
        if self.config.stats_interval > 0 && processed % self.config.stats_interval == 0 {
            let stats = self.stats.snapshot();
            info!(
                service = self.provisioner.service(),
                provisioned = stats.provisioned,
                already_provisioned = stats.already_provisioned,
                poisoned = stats.poisoned,
                rejected = stats.rejected,
                deferred = stats.deferred,
                "Consumer statistics"
            );
        }

        Ok(disposition)
    }

    /// Poll one message and handle it; `None` when the poll timed out
    pub async fn poll_once(
        &self,
        stream: &mut dyn PartitionStream,
    ) -> BrokerResult<Option<Disposition>> {
        match stream.poll(self.config.poll_timeout).await? {
            Some(delivery) => self.handle(stream, &delivery).await.map(Some),
            None => Ok(None),
        }
    }

    /// Consume one partition until `shutdown` flips to true
    pub async fn run_partition(&self, partition: u32, mut shutdown: watch::Receiver<bool>) {
        let service = self.provisioner.service();

        let mut stream = loop {
            if *shutdown.borrow() {
                return;
            }
            match self
                .broker
                .subscribe(&self.config.topic, &self.config.group, partition)
                .await
            {
                Ok(stream) => break stream,
                Err(e) => {
                    self.stats.broker_error();
                    warn!(service, partition, error = %e, "Subscribe failed, retrying");
                    if self.pause(&mut shutdown).await {
                        return;
                    }
                }
            }
        };

        info!(service, group = %self.config.group, partition, "Partition worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            // Only the wait is cancellable; once a message is in hand it is
            // processed and settled
            let polled = tokio::select! {
                _ = shutdown.changed() => break,
                polled = stream.poll(self.config.poll_timeout) => polled,
            };

            let delivery = match polled {
                Ok(Some(delivery)) => delivery,
                Ok(None) => continue,
                Err(e) => {
                    self.stats.broker_error();
                    warn!(service, partition, error = %e, "Poll failed");
                    if self.pause(&mut shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            match self.handle(stream.as_mut(), &delivery).await {
                Ok(Disposition::Deferred) => {
                    if self.pause(&mut shutdown).await {
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    self.stats.broker_error();
                    error!(
                        service,
                        partition,
                        offset = delivery.offset,
                        error = %e,
                        "Failed to settle message"
                    );
                }
            }
        }

        info!(service, partition, "Partition worker stopped");
    }

    /// Sleep for the retry backoff; true when shutdown was requested meanwhile
    async fn pause(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = shutdown.changed() => true,
            _ = tokio::time::sleep(self.config.retry_backoff) => *shutdown.borrow(),
        }
    }

    /// Run a worker for every partition and wait for all of them
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> InfrastructureResult<()> {
        let mut workers = JoinSet::new();

        for partition in 0..self.broker.partitions() {
            let consumer = Arc::clone(&self);
            let shutdown = shutdown.clone();
            workers.spawn(async move { consumer.run_partition(partition, shutdown).await });
        }

        info!(
            service = self.provisioner.service(),
            partitions = self.broker.partitions(),
            "Consumer running"
        );

        while let Some(joined) = workers.join_next().await {
            joined?;
        }

        Ok(())
    }
}
