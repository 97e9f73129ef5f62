// Copyright (c) 2025 - Cowboy AI, Inc.
//! NATS request/reply transport for the synchronous fallback
//!
//! Requests and replies are JSON. Responders join a queue group, so running
//! several instances of a dependent service spreads requests across them.
//!
//! Anything that keeps a reply from arriving (no responders, timeout, lost
//! connection) is reported as [`FallbackError::ServiceUnavailable`].

use async_nats::Client;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{
    handle_request, FallbackClient, FallbackError, ProvisionReceipt, ProvisionReply,
    ProvisionRequest,
};
use crate::errors::{InfrastructureError, InfrastructureResult};
use crate::provisioning::Provisioner;
use crate::subjects::BILLING_PROVISION_SUBJECT;

/// Default wait for a provisioning reply
pub const DEFAULT_FALLBACK_TIMEOUT: Duration = Duration::from_secs(3);

/// Caller side over NATS request/reply
#[derive(Clone)]
pub struct NatsFallbackClient {
    client: Client,
    subject: String,
    timeout: Duration,
}

impl NatsFallbackClient {
    /// Client for the billing provisioning subject
    pub fn new(client: Client) -> Self {
        Self {
            client,
            subject: BILLING_PROVISION_SUBJECT.to_string(),
            timeout: DEFAULT_FALLBACK_TIMEOUT,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl FallbackClient for NatsFallbackClient {
    async fn provision(&self, request: &ProvisionRequest) -> Result<ProvisionReceipt, FallbackError> {
        let payload =
            serde_json::to_vec(request).map_err(|e| FallbackError::Protocol(e.to_string()))?;

        debug!(subject = %self.subject, subject_id = %request.subject_id, "Sending provisioning request");

        let message = tokio::time::timeout(
            self.timeout,
            self.client.request(self.subject.clone(), payload.into()),
        )
        .await
        .map_err(|_| {
            FallbackError::ServiceUnavailable(format!(
                "no reply on {} within {:?}",
                self.subject, self.timeout
            ))
        })?
        .map_err(|e| FallbackError::ServiceUnavailable(e.to_string()))?;

        let reply: ProvisionReply = serde_json::from_slice(&message.payload)
            .map_err(|e| FallbackError::Protocol(e.to_string()))?;

        reply.into_receipt()
    }
}

/// Dependent-service side: answers provisioning requests
pub struct ProvisioningResponder<P> {
    client: Client,
    subject: String,
    queue_group: String,
    provisioner: Arc<P>,
}

impl<P> ProvisioningResponder<P>
where
    P: Provisioner + 'static,
{
    /// Responder on the billing provisioning subject, queue group named after the service
    pub fn new(client: Client, provisioner: Arc<P>) -> Self {
        let queue_group = provisioner.service().to_string();
        Self {
            client,
            subject: BILLING_PROVISION_SUBJECT.to_string(),
            queue_group,
            provisioner,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Subscribe and serve requests until `shutdown` flips to true
    pub async fn start(
        self,
        mut shutdown: watch::Receiver<bool>,
    ) -> InfrastructureResult<JoinHandle<()>> {
        let mut subscriber = self
            .client
            .queue_subscribe(self.subject.clone(), self.queue_group.clone())
            .await
            .map_err(|e| InfrastructureError::NatsConnection(e.to_string()))?;

        info!(subject = %self.subject, queue_group = %self.queue_group, "Serving provisioning requests");

        let handle = tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = shutdown.changed() => break,
                    message = subscriber.next() => message,
                };

                let Some(message) = message else {
                    warn!(subject = %self.subject, "Provisioning subscription ended");
                    break;
                };

                let reply = match serde_json::from_slice::<ProvisionRequest>(&message.payload) {
                    Ok(request) => handle_request(self.provisioner.as_ref(), &request).await,
                    Err(e) => ProvisionReply::Rejected {
                        reason: format!("malformed request: {e}"),
                    },
                };

                let Some(reply_to) = message.reply else {
                    debug!("Provisioning request without reply subject");
                    continue;
                };

                match serde_json::to_vec(&reply) {
                    Ok(body) => {
                        if let Err(e) = self.client.publish(reply_to, Bytes::from(body)).await {
                            error!(error = %e, "Failed to send provisioning reply");
                        }
                    }
                    Err(e) => error!(error = %e, "Failed to encode provisioning reply"),
                }
            }

            info!(subject = %self.subject, "Provisioning responder stopped");
        });

        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provisioning::{BillingAccount, BillingProvisioner};
    use crate::store::InMemoryStore;

    /// User Story: Billing answers provisioning requests over NATS
    ///
    /// Requires a NATS server on localhost:4222.
    #[tokio::test]
    #[ignore]
    async fn test_request_reply_round_trip() {
        let client = async_nats::connect("nats://localhost:4222").await.unwrap();
        let subject = format!("test.provision.{}", uuid::Uuid::now_v7());
        let store = Arc::new(InMemoryStore::<BillingAccount>::new());
        let provisioner = Arc::new(BillingProvisioner::new(store));
        let (tx, rx) = watch::channel(false);

        let handle = ProvisioningResponder::new(client.clone(), provisioner)
            .with_subject(subject.clone())
            .start(rx)
            .await
            .unwrap();

        let caller = NatsFallbackClient::new(client).with_subject(subject);
        let request = ProvisionRequest::new("p1", "Jane", "jane@x.com");

        let first = caller.provision(&request).await.unwrap();
        let second = caller.provision(&request).await.unwrap();

        assert!(first.created);
        assert!(!second.created);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    /// User Story: Nobody answers, caller falls back to the event path
    ///
    /// Requires a NATS server on localhost:4222.
    #[tokio::test]
    #[ignore]
    async fn test_no_responders_is_service_unavailable() {
        let client = async_nats::connect("nats://localhost:4222").await.unwrap();
        let caller = NatsFallbackClient::new(client)
            .with_subject(format!("test.nobody.{}", uuid::Uuid::now_v7()))
            .with_timeout(Duration::from_millis(500));

        let err = caller
            .provision(&ProvisionRequest::new("p1", "Jane", "jane@x.com"))
            .await
            .unwrap_err();

        assert!(matches!(err, FallbackError::ServiceUnavailable(_)));
    }
}
