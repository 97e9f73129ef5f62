// Copyright (c) 2025 - Cowboy AI, Inc.
//! JetStream broker
//!
//! Maps the partitioned log onto a single JetStream stream:
//!
//! ```text
//! topic "patient", partition N  ──>  subject {prefix}.patient.pN
//! group G reading partition N   ──>  durable pull consumer "G-patient-pN"
//!                                     filter {prefix}.patient.pN
//!                                     ack explicit, max_ack_pending = 1
//! ```
//!
//! With one outstanding message per durable consumer a partition is handed out
//! strictly in order. Settlements map onto JetStream acknowledgements:
//!
//! | Settlement  | Ack        |
//! |-------------|------------|
//! | `Commit`    | `ack`      |
//! | `Redeliver` | `Nak`      |
//! | `Discard`   | `Term`     |

use async_nats::jetstream::{self, consumer::pull, stream::Stream, AckKind};
use async_nats::HeaderMap;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, info};

use super::{
    Broker, BrokerError, BrokerResult, Delivery, PartitionStream, PublishAck, Settlement,
};
use crate::errors::{InfrastructureError, InfrastructureResult};
use crate::subjects::{durable_name, partition_for, SubjectBuilder, PMS_ROOT};

/// Header carrying the partition key of a message
pub const KEY_HEADER: &str = "Pms-Key";

/// Stream and consumer settings for the JetStream log
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Stream name
    pub name: String,

    /// Subject prefix; the stream captures `{prefix}.>`
    pub prefix: String,

    /// Partitions per topic
    pub partitions: u32,

    /// Maximum age of messages (default: 7 days)
    pub max_age: Duration,

    /// How long a delivery may stay unsettled before JetStream redelivers it
    pub ack_wait: Duration,

    /// Maximum deliveries per message (-1 = unlimited)
    pub max_deliver: i64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            name: "PMS_EVENTS".to_string(),
            prefix: PMS_ROOT.to_string(),
            partitions: 4,
            max_age: Duration::from_secs(7 * 24 * 60 * 60),
            ack_wait: Duration::from_secs(30),
            max_deliver: -1,
        }
    }
}

impl StreamConfig {
    /// Create or fetch the stream
    ///
    /// Idempotent: an existing stream with the same name is returned as is.
    pub async fn ensure_stream(&self, context: &jetstream::Context) -> InfrastructureResult<Stream> {
        let config = jetstream::stream::Config {
            name: self.name.clone(),
            subjects: vec![format!("{}.>", self.prefix)],
            max_age: self.max_age,
            storage: jetstream::stream::StorageType::File,
            retention: jetstream::stream::RetentionPolicy::Limits,
            ..Default::default()
        };

        let stream = context
            .get_or_create_stream(config)
            .await
            .map_err(|e| InfrastructureError::JetStream(e.to_string()))?;

        info!(stream = %self.name, prefix = %self.prefix, "JetStream stream ready");

        Ok(stream)
    }
}

/// Partitioned log on a JetStream stream
#[derive(Clone)]
pub struct JetStreamBroker {
    context: jetstream::Context,
    config: StreamConfig,
}

impl JetStreamBroker {
    /// Wrap a context whose stream already exists
    pub fn new(context: jetstream::Context, config: StreamConfig) -> Self {
        Self { context, config }
    }

    /// Ensure the stream exists, then wrap the context
    pub async fn connect(
        context: jetstream::Context,
        config: StreamConfig,
    ) -> InfrastructureResult<Self> {
        config.ensure_stream(&context).await?;
        Ok(Self::new(context, config))
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    fn subjects(&self, topic: &str) -> SubjectBuilder {
        SubjectBuilder::new(topic).prefix(self.config.prefix.clone())
    }

    async fn consumer(
        &self,
        topic: &str,
        group: &str,
        partition: u32,
    ) -> BrokerResult<jetstream::consumer::Consumer<pull::Config>> {
        let stream = self
            .context
            .get_stream(&self.config.name)
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;

        let name = durable_name(group, topic, partition);

        if let Ok(consumer) = stream.get_consumer::<pull::Config>(&name).await {
            return Ok(consumer);
        }

        let config = pull::Config {
            durable_name: Some(name.clone()),
            filter_subject: self.subjects(topic).partition(partition),
            ack_policy: jetstream::consumer::AckPolicy::Explicit,
            ack_wait: self.config.ack_wait,
            max_deliver: self.config.max_deliver,
            max_ack_pending: 1,
            ..Default::default()
        };

        let consumer = stream
            .create_consumer(config)
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;

        info!(consumer = %name, group, partition, "Created durable consumer");

        Ok(consumer)
    }
}

#[async_trait]
impl Broker for JetStreamBroker {
    fn partitions(&self) -> u32 {
        self.config.partitions.max(1)
    }

    async fn append(&self, topic: &str, key: &str, payload: Bytes) -> BrokerResult<PublishAck> {
        let partition = partition_for(key, self.partitions());
        let subject = self.subjects(topic).partition(partition);

        let mut headers = HeaderMap::new();
        headers.insert(KEY_HEADER, key);

        let ack = self
            .context
            .publish_with_headers(subject.clone(), headers, payload)
            .await
            .map_err(publish_error)?
            .await
            .map_err(publish_error)?;

        debug!(subject = %subject, sequence = ack.sequence, "Published to JetStream");

        Ok(PublishAck {
            topic: topic.to_string(),
            partition,
            offset: ack.sequence,
        })
    }

    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        partition: u32,
    ) -> BrokerResult<Box<dyn PartitionStream>> {
        if partition >= self.partitions() {
            return Err(BrokerError::InvalidPartition {
                partition,
                partitions: self.partitions(),
            });
        }

        let consumer = self.consumer(topic, group, partition).await?;

        Ok(Box::new(JetStreamPartitionStream {
            consumer,
            topic: topic.to_string(),
            partition,
            pending: None,
        }))
    }
}

fn publish_error(err: jetstream::context::PublishError) -> BrokerError {
    match err.kind() {
        jetstream::context::PublishErrorKind::TimedOut => BrokerError::Timeout(err.to_string()),
        _ => BrokerError::Unavailable(err.to_string()),
    }
}

struct JetStreamPartitionStream {
    consumer: jetstream::consumer::Consumer<pull::Config>,
    topic: String,
    partition: u32,
    pending: Option<(u64, jetstream::Message)>,
}

#[async_trait]
impl PartitionStream for JetStreamPartitionStream {
    fn partition(&self) -> u32 {
        self.partition
    }

    async fn poll(&mut self, timeout: Duration) -> BrokerResult<Option<Delivery>> {
        let mut batch = self
            .consumer
            .batch()
            .max_messages(1)
            .expires(timeout)
            .messages()
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;

        let message = match batch.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => return Err(BrokerError::Unavailable(e.to_string())),
            None => return Ok(None),
        };

        let (offset, delivery_count) = {
            let info = message
                .info()
                .map_err(|e| BrokerError::Protocol(e.to_string()))?;
            (info.stream_sequence, u32::try_from(info.delivered).unwrap_or(u32::MAX))
        };

        let key = message
            .headers
            .as_ref()
            .and_then(|headers| headers.get(KEY_HEADER))
            .map(|value| value.to_string());

        let delivery = Delivery {
            topic: self.topic.clone(),
            partition: self.partition,
            offset,
            key,
            payload: message.payload.clone(),
            delivery_count,
        };

        self.pending = Some((offset, message));

        Ok(Some(delivery))
    }

    async fn settle(&mut self, delivery: &Delivery, settlement: Settlement) -> BrokerResult<()> {
        let message = match self.pending.take() {
            Some((offset, message)) if offset == delivery.offset => message,
            other => {
                self.pending = other;
                return Err(BrokerError::UnknownDelivery {
                    partition: delivery.partition,
                    offset: delivery.offset,
                });
            }
        };

        let result = match settlement {
            Settlement::Commit => message.ack().await,
            Settlement::Redeliver => message.ack_with(AckKind::Nak(None)).await,
            Settlement::Discard => message.ack_with(AckKind::Term).await,
        };

        result.map_err(|e| BrokerError::Unavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_config_defaults() {
        let config = StreamConfig::default();

        assert_eq!(config.name, "PMS_EVENTS");
        assert_eq!(config.prefix, "pms");
        assert_eq!(config.partitions, 4);
        assert_eq!(config.max_deliver, -1);
    }
}
