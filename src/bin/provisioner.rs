// Copyright (c) 2025 - Cowboy AI, Inc.
//! Provisioner Service
//!
//! Runs one dependent service of the patient pipeline against NATS JetStream:
//!
//! - `PMS_SERVICE=billing`: opens billing accounts from patient events and
//!   answers synchronous provisioning requests
//! - `PMS_SERVICE=analytics`: records patient activity from patient events
//!
//! Run with: cargo run --bin provisioner
//!
//! Prerequisites:
//! 1. NATS server with JetStream enabled (default: localhost:4222)
//! 2. Optional overrides via the `PMS_*` environment variables
//!
//! Ctrl-C stops the workers between messages; anything in flight is left
//! unacknowledged and will be delivered again on restart.

use anyhow::{Context, Result};
use pms_pipeline::{
    broker::{Broker, JetStreamBroker},
    config::{PipelineConfig, ServiceKind},
    consumer::EventConsumer,
    fallback::ProvisioningResponder,
    nats::NatsClient,
    provisioning::{AnalyticsProvisioner, BillingAccount, BillingProvisioner, PatientActivity},
    store::KvStore,
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("🚀 Starting provisioner service");

    let config = PipelineConfig::from_env().context("Invalid configuration")?;
    info!("📋 Configuration loaded:");
    info!("  - NATS: {}", config.nats.servers.join(","));
    info!("  - Stream: {} ({} partitions)", config.stream.name, config.stream.partitions);
    info!("  - Service: {:?}", config.service);
    info!("  - Group: {}", config.consumer.group);

    let client = NatsClient::connect(&config.nats)
        .await
        .context("Failed to connect to NATS")?;
    info!("✅ Connected to NATS");

    let jetstream = client.jetstream();
    let broker: Arc<dyn Broker> = Arc::new(
        JetStreamBroker::connect(jetstream.clone(), config.stream.clone())
            .await
            .context("Failed to set up stream")?,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("🛑 Shutdown requested"),
            Err(e) => error!("⚠️ Failed to listen for Ctrl-C: {}", e),
        }
        let _ = shutdown_tx.send(true);
    });

    match config.service {
        ServiceKind::Billing => {
            let store = KvStore::<BillingAccount>::open(&jetstream, config.service.bucket())
                .await
                .context("Failed to open billing bucket")?;
            let provisioner = Arc::new(
                BillingProvisioner::new(Arc::new(store))
                    .with_storage_timeout(config.storage_timeout),
            );

            let responder = ProvisioningResponder::new(client.inner().clone(), Arc::clone(&provisioner))
                .with_subject(config.fallback_subject.clone())
                .start(shutdown_rx.clone())
                .await
                .context("Failed to start provisioning responder")?;

            let consumer = Arc::new(EventConsumer::new(broker, provisioner, config.consumer));
            let stats = consumer.stats();
            consumer.run(shutdown_rx).await?;
            responder.await.context("Provisioning responder panicked")?;

            info!("📊 Final statistics: {:?}", stats.snapshot());
        }
        ServiceKind::Analytics => {
            let store = KvStore::<PatientActivity>::open(&jetstream, config.service.bucket())
                .await
                .context("Failed to open analytics bucket")?;
            let provisioner = Arc::new(
                AnalyticsProvisioner::new(Arc::new(store))
                    .with_storage_timeout(config.storage_timeout),
            );

            let consumer = Arc::new(EventConsumer::new(broker, provisioner, config.consumer));
            let stats = consumer.stats();
            consumer.run(shutdown_rx).await?;

            info!("📊 Final statistics: {:?}", stats.snapshot());
        }
    }

    info!("👋 Provisioner service stopped");
    Ok(())
}
