// Copyright (c) 2025 - Cowboy AI, Inc.
//! In-process fallback client
//!
//! Calls the dependent service's provisioner directly. Used when both services
//! run in one process and in tests; `set_reachable(false)` simulates the
//! dependent service being down.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{handle_request, FallbackClient, FallbackError, ProvisionReceipt, ProvisionRequest};
use crate::provisioning::Provisioner;

pub struct LocalFallbackClient<P> {
    provisioner: Arc<P>,
    reachable: AtomicBool,
}

impl<P> LocalFallbackClient<P> {
    pub fn new(provisioner: Arc<P>) -> Self {
        Self {
            provisioner,
            reachable: AtomicBool::new(true),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }
}

#[async_trait]
impl<P> FallbackClient for LocalFallbackClient<P>
where
    P: Provisioner,
{
    async fn provision(&self, request: &ProvisionRequest) -> Result<ProvisionReceipt, FallbackError> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(FallbackError::ServiceUnavailable(format!(
                "{} not reachable",
                self.provisioner.service()
            )));
        }

        handle_request(self.provisioner.as_ref(), request)
            .await
            .into_receipt()
    }
}
