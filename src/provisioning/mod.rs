// Copyright (c) 2025 - Cowboy AI, Inc.
//! Idempotent provisioning
//!
//! A dependent service turns a patient event into a local side effect exactly
//! once, however many times the event (or a synchronous request for the same
//! patient) arrives. Both entry points call the same [`Provisioner`]:
//!
//! ```text
//! broker delivery ──> EventConsumer ───────────┐
//!                                              ├──> Provisioner::provision ──> ResourceStore
//! sync request ────> ProvisioningResponder ────┘         (create_once)
//! ```
//!
//! Whoever reaches the store first creates the resource and records where the
//! request came from. Every later attempt gets
//! [`ProvisionOutcome::AlreadyProvisioned`], which is a success.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::events::{DomainEvent, SubjectId, ValidationError};
use crate::store::{ResourceStore, StoreError, StoreResult};

pub mod analytics;
pub mod billing;

pub use analytics::{AnalyticsProvisioner, DailyMetrics, PatientActivity};
pub use billing::{AccountStatus, BillingAccount, BillingProvisioner};

/// Default bound on a single store call
pub const DEFAULT_STORAGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Path that first requested a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProvisioningSource {
    /// Asynchronous delivery from the broker
    Event,
    /// Direct synchronous request from the owning service
    SyncCall,
}

impl fmt::Display for ProvisioningSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisioningSource::Event => write!(f, "EVENT"),
            ProvisioningSource::SyncCall => write!(f, "SYNC_CALL"),
        }
    }
}

/// Result of a provisioning attempt
#[derive(Debug, Clone, PartialEq)]
pub enum ProvisionOutcome<R> {
    /// This attempt created the resource
    Created(R),
    /// The resource existed already; nothing was written
    AlreadyProvisioned(R),
    /// The event does not call for a side effect in this service
    NotApplicable,
}

impl<R> ProvisionOutcome<R> {
    pub fn resource(&self) -> Option<&R> {
        match self {
            ProvisionOutcome::Created(resource) | ProvisionOutcome::AlreadyProvisioned(resource) => {
                Some(resource)
            }
            ProvisionOutcome::NotApplicable => None,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, ProvisionOutcome::Created(_))
    }
}

/// Errors that stop a provisioning attempt
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProvisionError {
    /// Event breaks a business rule; retrying cannot help
    #[error("Invalid event: {0}")]
    Invalid(#[from] ValidationError),

    /// Store failed; see [`StoreError::is_retryable`]
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl ProvisionError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ProvisionError::Invalid(_) => false,
            ProvisionError::Storage(err) => err.is_retryable(),
        }
    }
}

/// Resource created by a provisioner
pub trait Provisioned {
    fn resource_id(&self) -> Uuid;
    fn subject_id(&self) -> &SubjectId;
    fn status(&self) -> &str;
    fn source(&self) -> ProvisioningSource;
}

/// Idempotent side effect of one dependent service
#[async_trait]
pub trait Provisioner: Send + Sync {
    type Resource: Provisioned + Clone + Send + Sync + 'static;

    /// Service name used in logs
    fn service(&self) -> &str;

    /// Apply the event; repeated calls for the same logical event are no-ops
    async fn provision(
        &self,
        event: &DomainEvent,
        source: ProvisioningSource,
    ) -> Result<ProvisionOutcome<Self::Resource>, ProvisionError>;
}

/// Run one store call under a deadline
pub(crate) async fn bounded<T, F>(timeout: Duration, call: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| StoreError::Timeout(timeout))?
}

/// Create the record under `key` unless one exists
///
/// `find` only saves a write in the common case. The store's `Duplicate`
/// answer on `insert` is what settles a race between two callers.
pub async fn create_once<R, S, F>(
    store: &S,
    key: &str,
    timeout: Duration,
    build: F,
) -> Result<ProvisionOutcome<R>, ProvisionError>
where
    R: Clone + Send + Sync + 'static,
    S: ResourceStore<R> + ?Sized,
    F: FnOnce() -> R,
{
    if let Some(existing) = bounded(timeout, store.find(key)).await? {
        return Ok(ProvisionOutcome::AlreadyProvisioned(existing));
    }

    match bounded(timeout, store.insert(key, build())).await {
        Ok(created) => Ok(ProvisionOutcome::Created(created)),
        Err(StoreError::Duplicate { .. }) => {
            debug!(key, "Lost create race; reading existing record");
            match bounded(timeout, store.find(key)).await? {
                Some(existing) => Ok(ProvisionOutcome::AlreadyProvisioned(existing)),
                None => Err(StoreError::Unavailable(format!(
                    "record for {key} reported as duplicate but not readable"
                ))
                .into()),
            }
        }
        Err(err) => Err(err.into()),
    }
}
