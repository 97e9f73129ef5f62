// Copyright (c) 2025 - Cowboy AI, Inc.
//! In-memory broker
//!
//! A partitioned log with consumer-group offsets held in process memory. It
//! follows the same delivery rules as the JetStream broker, which makes it the
//! broker of choice for tests and for embedding the pipeline in one process:
//!
//! - Offsets advance only on `Commit` or `Discard`
//! - `Redeliver` rewinds the stream to the last committed offset
//! - A fresh subscription resumes from the last committed offset, so anything
//!   a crashed member left unsettled is delivered again
//!
//! `set_available(false)` simulates an outage for both producers and consumers.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, trace};

use super::{
    Broker, BrokerError, BrokerResult, Delivery, PartitionStream, PublishAck, Settlement,
};
use crate::subjects::partition_for;

#[derive(Debug, Clone)]
struct Record {
    key: String,
    payload: Bytes,
}

/// (topic, group, partition)
type GroupPartition = (String, String, u32);

#[derive(Debug)]
struct LogState {
    topics: HashMap<String, Vec<Vec<Record>>>,
    committed: HashMap<GroupPartition, u64>,
    /// Delivery counts by offset, only for offsets not yet committed
    delivered: HashMap<GroupPartition, BTreeMap<u64, u32>>,
    available: bool,
}

/// In-process partitioned log
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    partitions: u32,
    state: Arc<Mutex<LogState>>,
    appended: Arc<Notify>,
}

impl InMemoryBroker {
    /// Create a broker with the given number of partitions per topic
    pub fn new(partitions: u32) -> Self {
        Self {
            partitions: partitions.max(1),
            state: Arc::new(Mutex::new(LogState {
                topics: HashMap::new(),
                committed: HashMap::new(),
                delivered: HashMap::new(),
                available: true,
            })),
            appended: Arc::new(Notify::new()),
        }
    }

    /// Toggle simulated availability
    pub async fn set_available(&self, available: bool) {
        self.state.lock().await.available = available;
    }

    /// Partition a key is routed to
    pub fn partition_of(&self, key: &str) -> u32 {
        partition_for(key, self.partitions)
    }

    /// Number of messages on a partition
    pub async fn len(&self, topic: &str, partition: u32) -> u64 {
        let state = self.state.lock().await;
        state
            .topics
            .get(topic)
            .and_then(|partitions| partitions.get(partition as usize))
            .map(|log| log.len() as u64)
            .unwrap_or(0)
    }

    /// Offset the group will resume from on this partition
    pub async fn committed_offset(&self, topic: &str, group: &str, partition: u32) -> u64 {
        let state = self.state.lock().await;
        state
            .committed
            .get(&(topic.to_string(), group.to_string(), partition))
            .copied()
            .unwrap_or(0)
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(1)
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    fn partitions(&self) -> u32 {
        self.partitions
    }

    async fn append(&self, topic: &str, key: &str, payload: Bytes) -> BrokerResult<PublishAck> {
        let partition = self.partition_of(key);

        let offset = {
            let mut state = self.state.lock().await;
            if !state.available {
                return Err(BrokerError::Unavailable("in-memory broker offline".into()));
            }

            let partitions = self.partitions as usize;
            let log = &mut state
                .topics
                .entry(topic.to_string())
                .or_insert_with(|| vec![Vec::new(); partitions])[partition as usize];

            log.push(Record {
                key: key.to_string(),
                payload,
            });
            (log.len() - 1) as u64
        };

        self.appended.notify_waiters();

        trace!(topic, key, partition, offset, "Appended record");

        Ok(PublishAck {
            topic: topic.to_string(),
            partition,
            offset,
        })
    }

    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        partition: u32,
    ) -> BrokerResult<Box<dyn PartitionStream>> {
        if partition >= self.partitions {
            return Err(BrokerError::InvalidPartition {
                partition,
                partitions: self.partitions,
            });
        }

        let cursor = self.committed_offset(topic, group, partition).await;

        debug!(topic, group, partition, cursor, "Joined consumer group");

        Ok(Box::new(InMemoryPartitionStream {
            state: Arc::clone(&self.state),
            appended: Arc::clone(&self.appended),
            key: (topic.to_string(), group.to_string(), partition),
            cursor,
            in_flight: None,
        }))
    }
}

struct InMemoryPartitionStream {
    state: Arc<Mutex<LogState>>,
    appended: Arc<Notify>,
    key: GroupPartition,
    cursor: u64,
    in_flight: Option<u64>,
}

impl InMemoryPartitionStream {
    async fn try_next(&mut self) -> BrokerResult<Option<Delivery>> {
        let mut state = self.state.lock().await;
        if !state.available {
            return Err(BrokerError::Unavailable("in-memory broker offline".into()));
        }

        let (topic, _, partition) = &self.key;
        let record = state
            .topics
            .get(topic)
            .and_then(|partitions| partitions.get(*partition as usize))
            .and_then(|log| log.get(self.cursor as usize))
            .cloned();

        let Some(record) = record else {
            return Ok(None);
        };

        let offset = self.cursor;
        let count = state
            .delivered
            .entry(self.key.clone())
            .or_default()
            .entry(offset)
            .or_insert(0);
        *count += 1;

        let delivery = Delivery {
            topic: topic.clone(),
            partition: *partition,
            offset,
            key: Some(record.key),
            payload: record.payload,
            delivery_count: *count,
        };

        self.cursor += 1;
        self.in_flight = Some(offset);

        Ok(Some(delivery))
    }
}

#[async_trait]
impl PartitionStream for InMemoryPartitionStream {
    fn partition(&self) -> u32 {
        self.key.2
    }

    async fn poll(&mut self, timeout: Duration) -> BrokerResult<Option<Delivery>> {
        let deadline = Instant::now() + timeout;

        loop {
            // Registered before the check so an append in between is not missed
            let appended = Arc::clone(&self.appended);
            let notified = appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(delivery) = self.try_next().await? {
                return Ok(Some(delivery));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            if tokio::time::timeout(remaining, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn settle(&mut self, delivery: &Delivery, settlement: Settlement) -> BrokerResult<()> {
        if delivery.partition != self.key.2 || self.in_flight != Some(delivery.offset) {
            return Err(BrokerError::UnknownDelivery {
                partition: delivery.partition,
                offset: delivery.offset,
            });
        }

        let mut state = self.state.lock().await;
        match settlement {
            Settlement::Commit | Settlement::Discard => {
                let committed = state.committed.entry(self.key.clone()).or_insert(0);
                *committed = (*committed).max(delivery.offset + 1);
                let committed = *committed;

                if let Some(counts) = state.delivered.get_mut(&self.key) {
                    *counts = counts.split_off(&committed);
                }
            }
            Settlement::Redeliver => {
                self.cursor = state.committed.get(&self.key).copied().unwrap_or(0);
            }
        }
        self.in_flight = None;

        trace!(
            partition = delivery.partition,
            offset = delivery.offset,
            ?settlement,
            "Settled delivery"
        );

        Ok(())
    }
}
