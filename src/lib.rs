// Copyright (c) 2025 - Cowboy AI, Inc.
//! Patient event propagation and idempotent provisioning
//!
//! The patient service commits a record, then publishes a patient event on a
//! durable partitioned log. Billing and analytics each consume the log in their
//! own consumer group and turn every event into exactly one local side effect,
//! however often it is delivered. Billing can also be asked synchronously; both
//! paths converge on the same idempotent provisioner.
//!
//! ```text
//! PatientService ──publish──> Broker (patient, keyed by subject id)
//!       │                       ├──> billing-service   ──> BillingProvisioner   ──> store
//!       │                       └──> analytics-service ──> AnalyticsProvisioner ──> store
//!       └──sync call──> ProvisioningResponder ──> BillingProvisioner
//! ```

pub mod broker;
pub mod config;
pub mod consumer;
pub mod errors;
pub mod events;
pub mod fallback;
pub mod nats;
pub mod patients;
pub mod provisioning;
pub mod publisher;
pub mod store;
pub mod subjects;

// Re-export commonly used types
pub use broker::{Broker, BrokerError, Delivery, InMemoryBroker, JetStreamBroker, Settlement};
pub use config::{PipelineConfig, ServiceKind};
pub use consumer::{ConsumerConfig, Disposition, EventConsumer};
pub use errors::{InfrastructureError, InfrastructureResult};
pub use events::{DecodeError, DomainEvent, EventType, SubjectId, ValidationError};
pub use fallback::{FallbackClient, FallbackError, ProvisionReceipt, ProvisionRequest};
pub use nats::{NatsClient, NatsConfig};
pub use patients::{PatientService, PropagationMode, PropagationReport};
pub use provisioning::{
    AnalyticsProvisioner, BillingProvisioner, ProvisionOutcome, Provisioner, ProvisioningSource,
};
pub use publisher::{EventPublisher, PublishError};
pub use store::{ResourceStore, StoreError};
