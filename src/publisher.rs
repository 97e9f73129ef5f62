// Copyright (c) 2025 - Cowboy AI, Inc.
//! Event publisher for patient events
//!
//! Publishes a committed patient change to the broker with:
//! - Validation before anything leaves the process
//! - Binary encoding through the event codec
//! - The subject id as partition key, so one patient's events stay in order
//! - Counted and logged failures; nothing is dropped silently
//!
//! Call [`EventPublisher::publish`] only after the owning store has durably
//! committed the change the event describes.

use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, BrokerError, PublishAck};
use crate::events::{codec, DomainEvent, ValidationError};
use crate::subjects::PATIENT_TOPIC;

/// Error types for event publishing
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// Event breaks a business rule and was not sent
    #[error("Invalid event: {0}")]
    Invalid(#[from] ValidationError),

    /// Broker refused or failed the append
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),
}

impl PublishError {
    /// Whether publishing the same event again can succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            PublishError::Invalid(_) => false,
            PublishError::Broker(err) => err.is_retryable(),
        }
    }
}

/// Inline retry applied by the owning service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    /// Pause between attempts
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retry
    pub fn none() -> Self {
        Self {
            attempts: 1,
            backoff: Duration::ZERO,
        }
    }
}

/// Publish counters
#[derive(Debug, Default)]
pub struct PublisherStats {
    published: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
}

impl PublisherStats {
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn retried(&self) -> u64 {
        self.retried.load(Ordering::Relaxed)
    }
}

/// Publishes patient events onto the broker
#[derive(Clone)]
pub struct EventPublisher {
    broker: Arc<dyn Broker>,
    topic: String,
    stats: Arc<PublisherStats>,
}

impl EventPublisher {
    /// Create a publisher for the `patient` topic
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            topic: PATIENT_TOPIC.to_string(),
            stats: Arc::new(PublisherStats::default()),
        }
    }

    /// Publish to another topic
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn stats(&self) -> Arc<PublisherStats> {
        Arc::clone(&self.stats)
    }

    /// Publish a single event
    pub async fn publish(&self, event: &DomainEvent) -> Result<PublishAck, PublishError> {
        if let Err(e) = event.validate() {
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
            error!(
                subject_id = %event.subject_id,
                error = %e,
                "Refusing to publish invalid event"
            );
            return Err(e.into());
        }

        let payload = Bytes::from(codec::encode(event));

        debug!(
            topic = %self.topic,
            subject_id = %event.subject_id,
            event_type = %event.event_type,
            bytes = payload.len(),
            "Publishing patient event"
        );

        match self
            .broker
            .append(&self.topic, event.subject_id.as_str(), payload)
            .await
        {
            Ok(ack) => {
                self.stats.published.fetch_add(1, Ordering::Relaxed);
                info!(
                    topic = %ack.topic,
                    subject_id = %event.subject_id,
                    event_type = %event.event_type,
                    partition = ack.partition,
                    offset = ack.offset,
                    "Event published successfully"
                );
                Ok(ack)
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    topic = %self.topic,
                    subject_id = %event.subject_id,
                    error = %e,
                    retryable = e.is_retryable(),
                    "Failed to publish event"
                );
                Err(e.into())
            }
        }
    }

    /// Publish, retrying retryable failures according to `policy`
    pub async fn publish_with_retry(
        &self,
        event: &DomainEvent,
        policy: RetryPolicy,
    ) -> Result<PublishAck, PublishError> {
        let attempts = policy.attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.publish(event).await {
                Err(e) if e.is_retryable() && attempt < attempts => {
                    self.stats.retried.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        subject_id = %event.subject_id,
                        attempt,
                        attempts,
                        error = %e,
                        "Retrying publish"
                    );
                    tokio::time::sleep(policy.backoff).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}
