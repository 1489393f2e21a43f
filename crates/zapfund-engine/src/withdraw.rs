//! The withdrawal engine.
//!
//! A withdrawal reserves the donator's balance minus a routing fee reserve,
//! pays the donator's invoice through the backend with the reserve as the
//! fee limit, and refunds the unused part of the reserve once the actual
//! fee is known.

use std::sync::Arc;

use zapfund_core::{DonatorId, PaymentRequest, Satoshi, Withdrawal, WithdrawalId};
use zapfund_store::{Ledger, StoreError};

use crate::backend::PaymentBackend;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};

/// Orchestrates donator payouts.
pub struct WithdrawEngine {
    ledger: Arc<dyn Ledger>,
    backend: Arc<dyn PaymentBackend>,
    config: EngineConfig,
}

impl WithdrawEngine {
    /// Create an engine over its dependencies.
    pub fn new(
        ledger: Arc<dyn Ledger>,
        backend: Arc<dyn PaymentBackend>,
        config: EngineConfig,
    ) -> Self {
        Self {
            ledger,
            backend,
            config,
        }
    }

    /// Create a withdrawal reserving the donator's whole balance minus the
    /// fee reserve.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the donator is not connected or the
    /// balance does not exceed the fee reserve.
    pub async fn create_withdrawal(&self, donator_id: DonatorId) -> Result<Withdrawal> {
        let donator = self
            .ledger
            .query_donator(donator_id)
            .await?
            .ok_or(StoreError::NotFound {
                entity: "donator",
                id: donator_id.to_string(),
            })?;
        if !self.ledger.is_connected(donator_id).await? {
            return Err(EngineError::Validation(
                "connect an auth method before withdrawing".to_string(),
            ));
        }
        let amount = donator.balance - self.config.withdrawal_fee_reserve;
        if amount <= 0 {
            return Err(EngineError::Validation(format!(
                "balance {} sat does not cover the {} sat fee reserve",
                donator.balance, self.config.withdrawal_fee_reserve
            )));
        }
        let withdrawal = self.ledger.create_withdrawal(donator_id, amount).await?;
        tracing::info!(withdrawal_id = %withdrawal.id, %donator_id, amount, "withdrawal created");
        Ok(withdrawal)
    }

    /// Pay a withdrawal to the invoice the donator supplied.
    ///
    /// The debit (invoice amount plus the rounded-up fee reserve) lands
    /// before the payment starts; the reserve is reconciled down to the
    /// actual routing fee afterwards.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the invoice amount exceeds the
    /// reserved amount (surfaced by storage as `NotFound` on the guarded
    /// update). A payment failure after the debit propagates as a backend
    /// error; the withdrawal stays marked paid for manual reconciliation.
    pub async fn pay_withdrawal(
        &self,
        withdrawal_id: WithdrawalId,
        payment_request: &PaymentRequest,
    ) -> Result<Satoshi> {
        let (_, invoice_amount) = self.backend.decode_payment_request(payment_request).await?;
        if invoice_amount <= 0 {
            return Err(EngineError::Validation(
                "withdrawal invoices must carry a fixed positive amount".to_string(),
            ));
        }
        let fee_limit_msat = self.config.withdrawal_fee_reserve * 1000;
        let balance = self
            .ledger
            .start_withdraw(withdrawal_id, invoice_amount, fee_limit_msat)
            .await?;

        let payment = match self.backend.pay_invoice(payment_request).await {
            Ok(payment) => payment,
            Err(error) => {
                tracing::error!(
                    %withdrawal_id,
                    amount = invoice_amount,
                    %error,
                    "withdrawal payment failed after debit; needs reconciliation"
                );
                return Err(error.into());
            }
        };

        self.ledger
            .finish_withdraw(withdrawal_id, payment.fee_msat)
            .await?;
        tracing::info!(
            %withdrawal_id,
            amount = invoice_amount,
            fee_msat = payment.fee_msat,
            "withdrawal paid"
        );
        Ok(balance)
    }
}
