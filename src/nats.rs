// Copyright (c) 2025 - Cowboy AI, Inc.
//! NATS client abstraction for messaging infrastructure

use async_nats::jetstream;
use async_nats::{Client, ConnectOptions};
use std::time::Duration;
use tracing::info;

use crate::errors::{InfrastructureError, InfrastructureResult};

/// Configuration for NATS connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatsConfig {
    /// NATS server URLs
    pub servers: Vec<String>,
    /// Client name
    pub name: String,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Request timeout
    pub request_timeout: Duration,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            servers: vec!["nats://localhost:4222".to_string()],
            name: "pms-pipeline".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// NATS client wrapper shared by the broker, key/value stores and the sync fallback path
#[derive(Clone)]
pub struct NatsClient {
    client: Client,
}

impl NatsClient {
    /// Create a new NATS client with the given configuration
    pub async fn connect(config: &NatsConfig) -> InfrastructureResult<Self> {
        let connect_options = ConnectOptions::new()
            .name(&config.name)
            .connection_timeout(config.connect_timeout)
            .request_timeout(Some(config.request_timeout));

        let client = async_nats::connect_with_options(config.servers.join(","), connect_options)
            .await
            .map_err(|e| InfrastructureError::NatsConnection(e.to_string()))?;

        info!(servers = ?config.servers, client = %config.name, "Connected to NATS");

        Ok(Self { client })
    }

    /// Wrap an already connected client
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// JetStream context on top of this connection
    pub fn jetstream(&self) -> jetstream::Context {
        jetstream::new(self.client.clone())
    }

    /// Get the underlying NATS client for advanced operations
    pub fn inner(&self) -> &Client {
        &self.client
    }
}
