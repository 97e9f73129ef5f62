// Copyright (c) 2025 - Cowboy AI, Inc.
//! Pipeline configuration from environment variables
//!
//! | Variable                  | Default                      |
//! |---------------------------|------------------------------|
//! | `NATS_URL`                | `nats://localhost:4222`      |
//! | `PMS_STREAM`              | `PMS_EVENTS`                 |
//! | `PMS_SUBJECT_PREFIX`      | `pms`                        |
//! | `PMS_PARTITIONS`          | `4`                          |
//! | `PMS_TOPIC`               | `patient`                    |
//! | `PMS_SERVICE`             | `billing`                    |
//! | `PMS_CONSUMER_GROUP`      | service's group name         |
//! | `PMS_POLL_TIMEOUT_MS`     | `1000`                       |
//! | `PMS_RETRY_BACKOFF_MS`    | `500`                        |
//! | `PMS_STORAGE_TIMEOUT_MS`  | `5000`                       |
//! | `PMS_FALLBACK_SUBJECT`    | `billing.accounts.provision` |

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use crate::broker::StreamConfig;
use crate::consumer::ConsumerConfig;
use crate::errors::{InfrastructureError, InfrastructureResult};
use crate::nats::NatsConfig;
use crate::subjects::{ConsumerGroup, BILLING_PROVISION_SUBJECT, PATIENT_TOPIC, PMS_ROOT};

/// Dependent service a provisioner process runs as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    Billing,
    Analytics,
}

impl ServiceKind {
    pub fn group(&self) -> ConsumerGroup {
        match self {
            ServiceKind::Billing => ConsumerGroup::Billing,
            ServiceKind::Analytics => ConsumerGroup::Analytics,
        }
    }

    /// Key/value bucket holding this service's resources
    pub fn bucket(&self) -> &'static str {
        match self {
            ServiceKind::Billing => "pms_billing_accounts",
            ServiceKind::Analytics => "pms_patient_activity",
        }
    }
}

impl FromStr for ServiceKind {
    type Err = InfrastructureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "billing" | "billing-service" => Ok(ServiceKind::Billing),
            "analytics" | "analytics-service" => Ok(ServiceKind::Analytics),
            other => Err(InfrastructureError::Configuration(format!(
                "unknown service {other:?} (expected billing or analytics)"
            ))),
        }
    }
}

/// Everything a pipeline process needs to start
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub nats: NatsConfig,
    pub stream: StreamConfig,
    pub service: ServiceKind,
    pub consumer: ConsumerConfig,
    pub storage_timeout: Duration,
    pub fallback_subject: String,
}

impl PipelineConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> InfrastructureResult<Self> {
        Self::from_vars(std::env::vars().collect())
    }

    /// Load configuration from an explicit variable map
    pub fn from_vars(vars: HashMap<String, String>) -> InfrastructureResult<Self> {
        let get = |name: &str| vars.get(name).filter(|v| !v.trim().is_empty()).cloned();

        let millis = |name: &str, default: u64| -> InfrastructureResult<Duration> {
            match get(name) {
                Some(raw) => raw.trim().parse::<u64>().map(Duration::from_millis).map_err(|e| {
                    InfrastructureError::Configuration(format!("{name}={raw:?}: {e}"))
                }),
                None => Ok(Duration::from_millis(default)),
            }
        };

        let service = match get("PMS_SERVICE") {
            Some(raw) => raw.parse()?,
            None => ServiceKind::Billing,
        };

        let partitions = match get("PMS_PARTITIONS") {
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(InfrastructureError::Configuration(format!(
                        "PMS_PARTITIONS={raw:?}: expected a positive integer"
                    )))
                }
            },
            None => 4,
        };

        let nats = NatsConfig {
            servers: get("NATS_URL")
                .map(|urls| urls.split(',').map(|u| u.trim().to_string()).collect())
                .unwrap_or_else(|| NatsConfig::default().servers),
            name: format!("pms-{}", service.group()),
            ..NatsConfig::default()
        };

        let stream = StreamConfig {
            name: get("PMS_STREAM").unwrap_or_else(|| StreamConfig::default().name),
            prefix: get("PMS_SUBJECT_PREFIX").unwrap_or_else(|| PMS_ROOT.to_string()),
            partitions,
            ..StreamConfig::default()
        };

        let mut consumer = ConsumerConfig::for_group(service.group())
            .with_poll_timeout(millis("PMS_POLL_TIMEOUT_MS", 1000)?)
            .with_retry_backoff(millis("PMS_RETRY_BACKOFF_MS", 500)?);
        consumer.topic = get("PMS_TOPIC").unwrap_or_else(|| PATIENT_TOPIC.to_string());
        if let Some(group) = get("PMS_CONSUMER_GROUP") {
            consumer.group = group;
        }

        Ok(Self {
            nats,
            stream,
            service,
            consumer,
            storage_timeout: millis("PMS_STORAGE_TIMEOUT_MS", 5000)?,
            fallback_subject: get("PMS_FALLBACK_SUBJECT")
                .unwrap_or_else(|| BILLING_PROVISION_SUBJECT.to_string()),
        })
    }
}
