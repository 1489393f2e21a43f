//! The settlement listener.
//!
//! Consumes the backend's settlement subscription and settles the matching
//! donations. One bad event never stops the loop: settlement errors are
//! logged and the stream drains on; a dropped subscription reconnects
//! after a delay.

use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;

use zapfund_store::DonationSelector;

use crate::backend::{BackendError, PaymentBackend, Settlement};
use crate::donation::DonationEngine;
use crate::error::EngineError;

/// Drives donation settlement from the backend's invoice subscription.
pub struct SettlementListener {
    engine: Arc<DonationEngine>,
    backend: Arc<dyn PaymentBackend>,
    retry_delay: std::time::Duration,
}

impl SettlementListener {
    /// Create a listener.
    pub fn new(
        engine: Arc<DonationEngine>,
        backend: Arc<dyn PaymentBackend>,
        retry_delay: std::time::Duration,
    ) -> Self {
        Self {
            engine,
            backend,
            retry_delay,
        }
    }

    /// Run the listener until the task is dropped, resubscribing whenever
    /// the backend stream ends or fails.
    pub async fn run(&self) {
        loop {
            match self.backend.settlements().await {
                Ok(stream) => {
                    tracing::info!("settlement subscription open");
                    let settled = self.drain(stream).await;
                    tracing::warn!(settled, "settlement subscription closed, reconnecting");
                }
                Err(error) => {
                    tracing::warn!(%error, "settlement subscription failed, retrying");
                }
            }
            tokio::time::sleep(self.retry_delay).await;
        }
    }

    /// Apply every settlement the stream yields, returning how many
    /// donations were settled.
    pub async fn drain(
        &self,
        mut stream: BoxStream<'static, Result<Settlement, BackendError>>,
    ) -> usize {
        let mut settled = 0;
        while let Some(event) = stream.next().await {
            match event {
                Ok(settlement) => {
                    if self.apply(&settlement).await {
                        settled += 1;
                    }
                }
                Err(error) => {
                    tracing::warn!(%error, "bad settlement event, skipping");
                }
            }
        }
        settled
    }

    async fn apply(&self, settlement: &Settlement) -> bool {
        let result = self
            .engine
            .finish_donation(
                DonationSelector::ByRHash(settlement.r_hash),
                settlement.amount,
                settlement.settled_at,
                None,
                None,
            )
            .await;
        match result {
            Ok(donation) => {
                tracing::info!(
                    donation_id = %donation.id,
                    amount = settlement.amount,
                    "donation settled by invoice subscription"
                );
                true
            }
            // The node also settles invoices that are not donations
            // (withdrawal test payments, manual invoices).
            Err(EngineError::Store(zapfund_store::StoreError::NotFound { .. })) => {
                tracing::debug!(
                    r_hash = %settlement.r_hash.as_hex(),
                    "settled invoice matches no donation"
                );
                false
            }
            Err(error) => {
                tracing::error!(
                    r_hash = %settlement.r_hash.as_hex(),
                    %error,
                    "settlement failed, skipping"
                );
                false
            }
        }
    }
}
