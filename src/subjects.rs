// Copyright (c) 2025 - Cowboy AI, Inc.
//! Subject hierarchy and partitioning for patient events
//!
//! Subject pattern: `{prefix}.{topic}.p{partition}`
//!
//! # Examples
//!
//! - `pms.patient.p0`
//! - `pms.patient.p3`
//! - `pms.patient.>` (every partition, used as the stream filter)
//!
//! Events are keyed by subject id. The key decides the partition, so every
//! event about one patient lands on one subject and is delivered in order.

use std::fmt;

/// Default subject prefix for pipeline streams
pub const PMS_ROOT: &str = "pms";

/// Logical topic carrying patient lifecycle events
pub const PATIENT_TOPIC: &str = "patient";

/// Default request subject for synchronous billing provisioning
pub const BILLING_PROVISION_SUBJECT: &str = "billing.accounts.provision";

/// Consumer group names of the dependent services
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsumerGroup {
    /// Billing account provisioning
    Billing,
    /// Analytics aggregation
    Analytics,
}

impl ConsumerGroup {
    /// Group name as registered with the broker
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsumerGroup::Billing => "billing-service",
            ConsumerGroup::Analytics => "analytics-service",
        }
    }
}

impl fmt::Display for ConsumerGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable partition for a key
///
/// FNV-1a over the key bytes. The value must not change between releases or
/// processes, otherwise events for one subject would be split across partitions.
pub fn partition_for(key: &str, partitions: u32) -> u32 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let partitions = partitions.max(1);
    let hash = key.bytes().fold(OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(PRIME)
    });

    (hash % u64::from(partitions)) as u32
}

/// Builder for partitioned NATS subjects
#[derive(Debug, Clone)]
pub struct SubjectBuilder {
    prefix: String,
    topic: String,
}

impl SubjectBuilder {
    /// Create a builder for a topic under the default prefix
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            prefix: PMS_ROOT.to_string(),
            topic: topic.into(),
        }
    }

    /// Override the subject prefix
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Subject of a single partition
    ///
    /// Returns: `{prefix}.{topic}.p{partition}`
    pub fn partition(&self, partition: u32) -> String {
        format!("{}.{}.p{}", self.prefix, self.topic, partition)
    }

    /// Wildcard covering every partition of the topic
    ///
    /// Returns: `{prefix}.{topic}.>`
    pub fn all_partitions(&self) -> String {
        format!("{}.{}.>", self.prefix, self.topic)
    }
}

/// Durable consumer name for one group on one partition
///
/// Returns: `{group}-{topic}-p{partition}`
pub fn durable_name(group: &str, topic: &str, partition: u32) -> String {
    format!("{}-{}-p{}", group, topic, partition)
}
