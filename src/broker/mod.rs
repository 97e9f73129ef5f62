// Copyright (c) 2025 - Cowboy AI, Inc.
//! Broker Abstraction
//!
//! The pipeline is written against a durable, partitioned log rather than a
//! particular client library. Whatever sits behind [`Broker`] must provide:
//!
//! 1. **At-least-once delivery**: anything not committed is delivered again
//! 2. **Per-partition order**: messages on one partition arrive in append order
//! 3. **Independent groups**: every consumer group tracks its own offsets
//! 4. **Bounded waits**: `poll` returns `None` once its timeout elapses
//!
//! # Architecture
//!
//! ```text
//! Publisher ──append(key)──> [p0][p1]..[pN] ──subscribe(group, p)──> PartitionStream
//!                                                                       │
//!                                            settle(Commit | Redeliver | Discard)
//! ```
//!
//! Nothing here provides ordering across partitions or across groups.

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

pub mod jetstream;
pub mod memory;

pub use jetstream::{JetStreamBroker, StreamConfig};
pub use memory::InMemoryBroker;

/// Errors raised by a broker implementation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Broker could not be reached or refused the operation for now
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    /// Operation did not complete in time
    #[error("Broker operation timed out: {0}")]
    Timeout(String),

    /// Settlement for a delivery this stream does not hold
    #[error("Unknown delivery at offset {offset} on partition {partition}")]
    UnknownDelivery { partition: u32, offset: u64 },

    /// Partition outside the configured range
    #[error("Partition {partition} out of range (partitions: {partitions})")]
    InvalidPartition { partition: u32, partitions: u32 },

    /// Broker replied with something that cannot be interpreted
    #[error("Broker protocol error: {0}")]
    Protocol(String),
}

impl BrokerError {
    /// Whether trying again later can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, BrokerError::Unavailable(_) | BrokerError::Timeout(_))
    }
}

/// Result type for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Acknowledgement of a durable append
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishAck {
    pub topic: String,
    pub partition: u32,
    /// Position in the log; informational only
    pub offset: u64,
}

/// A message handed to a consumer group member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub partition: u32,
    /// Position in the log; never used for idempotency
    pub offset: u64,
    pub key: Option<String>,
    pub payload: Bytes,
    /// How many times this message has been handed to the group (1 = first time)
    pub delivery_count: u32,
}

impl Delivery {
    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }
}

/// What to do with a delivery once processing finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Processing completed; advance the group offset past this message
    Commit,
    /// Processing could not complete; deliver the message again
    Redeliver,
    /// Message can never be processed; advance past it without retrying
    Discard,
}

/// Durable, partitioned, ordered-per-key log
#[async_trait]
pub trait Broker: Send + Sync {
    /// Number of partitions per topic
    fn partitions(&self) -> u32;

    /// Append a payload; the key selects the partition
    async fn append(&self, topic: &str, key: &str, payload: Bytes) -> BrokerResult<PublishAck>;

    /// Join a consumer group on one partition
    ///
    /// Consumption resumes from the group's last committed offset.
    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        partition: u32,
    ) -> BrokerResult<Box<dyn PartitionStream>>;
}

/// Sequential reader of one partition for one consumer group
#[async_trait]
pub trait PartitionStream: Send {
    fn partition(&self) -> u32;

    /// Wait up to `timeout` for the next message
    async fn poll(&mut self, timeout: Duration) -> BrokerResult<Option<Delivery>>;

    /// Finish a delivery previously returned by `poll`
    async fn settle(&mut self, delivery: &Delivery, settlement: Settlement) -> BrokerResult<()>;
}
