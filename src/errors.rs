// Copyright (c) 2025 - Cowboy AI, Inc.
//! Error types for infrastructure operations
//!
//! Pipeline stages carry their own error enums (`DecodeError`, `PublishError`,
//! `StoreError`, ...). This type covers what sits underneath them: connecting
//! to NATS, preparing streams and buckets, and reading configuration.

use thiserror::Error;

/// Errors that can occur while wiring up pipeline infrastructure
#[derive(Debug, Error)]
pub enum InfrastructureError {
    /// NATS connection error
    #[error("NATS connection error: {0}")]
    NatsConnection(String),

    /// JetStream stream or consumer setup error
    #[error("JetStream setup error: {0}")]
    JetStream(String),

    /// Key/value bucket setup error
    #[error("Key/value bucket error: {0}")]
    KeyValue(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Worker task failed to join
    #[error("Worker task failed: {0}")]
    Worker(String),
}

/// Result type for infrastructure operations
pub type InfrastructureResult<T> = Result<T, InfrastructureError>;

impl From<async_nats::Error> for InfrastructureError {
    fn from(err: async_nats::Error) -> Self {
        InfrastructureError::NatsConnection(err.to_string())
    }
}

impl From<async_nats::ConnectError> for InfrastructureError {
    fn from(err: async_nats::ConnectError) -> Self {
        InfrastructureError::NatsConnection(err.to_string())
    }
}

impl From<tokio::task::JoinError> for InfrastructureError {
    fn from(err: tokio::task::JoinError) -> Self {
        InfrastructureError::Worker(err.to_string())
    }
}
