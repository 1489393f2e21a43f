//! The payment backend seam.
//!
//! Engines talk to the Lightning node through [`PaymentBackend`] so that
//! tests can swap in a scripted backend and the settlement listener can be
//! driven from a plain stream. [`LndBackend`] is the production
//! implementation over the LND REST gateway.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;

use zapfund_core::{MilliSatoshi, PaymentRequest, RequestHash, Satoshi};
use zapfund_lnd::{
    lightning_address_to_lnurlp, LndClient, LndConfig, LndError, LnurlpClient,
};

/// Errors from the payment backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The node is unreachable or rejected a request.
    #[error("payment node error: {0}")]
    Node(String),

    /// An outbound payment reached a final non-success state.
    #[error("payment failed: {0}")]
    PaymentFailed(String),

    /// A payment request could not be decoded.
    #[error("invalid payment request: {0}")]
    InvalidPaymentRequest(String),

    /// The LNURL-pay flow for a lightning address failed.
    #[error("lightning address error: {0}")]
    LightningAddress(String),
}

impl From<LndError> for BackendError {
    fn from(err: LndError) -> Self {
        match err {
            LndError::PaymentFailed {
                status,
                failure_reason,
            } => Self::PaymentFailed(format!("{status} ({failure_reason:?})")),
            LndError::Decode(e) => Self::InvalidPaymentRequest(e.to_string()),
            LndError::Lnurlp(message) => Self::LightningAddress(message),
            other => Self::Node(other.to_string()),
        }
    }
}

/// An invoice issued by the backend for an inbound payment.
#[derive(Debug, Clone)]
pub struct IssuedInvoice {
    /// Payment hash identifying the invoice.
    pub r_hash: RequestHash,

    /// The BOLT-11 payment request to hand to the payer's wallet.
    pub payment_request: PaymentRequest,
}

/// Final state of a completed outbound payment.
#[derive(Debug, Clone, Copy)]
pub struct PaymentResult {
    /// Amount paid in satoshis, excluding fees.
    pub amount: Satoshi,

    /// Routing fee in millisatoshis.
    pub fee_msat: MilliSatoshi,

    /// When the payment completed.
    pub paid_at: DateTime<Utc>,
}

/// A settled inbound invoice, as reported by the backend's subscription.
#[derive(Debug, Clone)]
pub struct Settlement {
    /// Payment hash of the settled invoice.
    pub r_hash: RequestHash,

    /// Amount actually paid in satoshis. The payer may overpay the
    /// requested amount.
    pub amount: Satoshi,

    /// When the invoice settled.
    pub settled_at: DateTime<Utc>,
}

/// Status of an issued invoice as known to the node.
#[derive(Debug, Clone)]
pub enum InvoiceStatus {
    /// Still payable.
    Open,
    /// Paid.
    Settled(Settlement),
    /// Cancelled or expired.
    Cancelled,
}

/// Abstraction over the Lightning payment node.
#[async_trait]
pub trait PaymentBackend: Send + Sync {
    /// Issue an invoice for an inbound payment.
    async fn create_invoice(
        &self,
        memo: &str,
        amount: Satoshi,
        expiry: Option<i64>,
    ) -> Result<IssuedInvoice, BackendError>;

    /// Decode a payment request into its payment hash and amount.
    async fn decode_payment_request(
        &self,
        payment_request: &PaymentRequest,
    ) -> Result<(RequestHash, Satoshi), BackendError>;

    /// Resolve a lightning address into an invoice for `amount` satoshis
    /// via LNURL-pay.
    async fn resolve_lightning_address(
        &self,
        address: &str,
        amount: Satoshi,
        comment: &str,
    ) -> Result<PaymentRequest, BackendError>;

    /// Pay an invoice, waiting for the final payment state.
    async fn pay_invoice(
        &self,
        payment_request: &PaymentRequest,
    ) -> Result<PaymentResult, BackendError>;

    /// Best-effort cancellation of an issued invoice.
    async fn cancel_invoice(&self, r_hash: RequestHash) -> Result<(), BackendError>;

    /// Look up the status of an issued invoice.
    async fn lookup_invoice(&self, r_hash: RequestHash) -> Result<InvoiceStatus, BackendError>;

    /// Subscribe to invoice settlements. The stream ends when the backend
    /// connection drops; the listener reconnects around it.
    async fn settlements(
        &self,
    ) -> Result<BoxStream<'static, Result<Settlement, BackendError>>, BackendError>;
}

/// The production backend over LND REST and LNURL-pay.
#[derive(Debug, Clone)]
pub struct LndBackend {
    client: LndClient,
    lnurlp: LnurlpClient,
}

impl LndBackend {
    /// Create a backend from node configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: LndConfig) -> Result<Self, BackendError> {
        Ok(Self {
            client: LndClient::new(config)?,
            lnurlp: LnurlpClient::new(),
        })
    }
}

#[async_trait]
impl PaymentBackend for LndBackend {
    async fn create_invoice(
        &self,
        memo: &str,
        amount: Satoshi,
        expiry: Option<i64>,
    ) -> Result<IssuedInvoice, BackendError> {
        let invoice = self.client.create_invoice(memo, amount, expiry).await?;
        Ok(IssuedInvoice {
            r_hash: invoice.r_hash,
            payment_request: invoice.payment_request,
        })
    }

    async fn decode_payment_request(
        &self,
        payment_request: &PaymentRequest,
    ) -> Result<(RequestHash, Satoshi), BackendError> {
        let decoded = self.client.decode_payment_request(payment_request).await?;
        Ok((decoded.payment_hash, decoded.num_satoshis))
    }

    async fn resolve_lightning_address(
        &self,
        address: &str,
        amount: Satoshi,
        comment: &str,
    ) -> Result<PaymentRequest, BackendError> {
        let lnurlp = lightning_address_to_lnurlp(address)?;
        let metadata = self.lnurlp.fetch_metadata(&lnurlp).await?;
        Ok(self.lnurlp.fetch_invoice(&metadata, amount, comment).await?)
    }

    async fn pay_invoice(
        &self,
        payment_request: &PaymentRequest,
    ) -> Result<PaymentResult, BackendError> {
        let payment = self.client.pay_invoice(payment_request).await?;
        let amount = payment.value_sat.ok_or_else(|| {
            BackendError::Node("payment succeeded without value_sat".to_string())
        })?;
        Ok(PaymentResult {
            amount,
            fee_msat: payment.fee_msat.unwrap_or(0),
            paid_at: payment.created_at().unwrap_or_else(Utc::now),
        })
    }

    async fn cancel_invoice(&self, r_hash: RequestHash) -> Result<(), BackendError> {
        Ok(self.client.cancel_invoice(r_hash).await?)
    }

    async fn lookup_invoice(&self, r_hash: RequestHash) -> Result<InvoiceStatus, BackendError> {
        let invoice = self.client.lookup_invoice(r_hash).await?;
        Ok(match invoice.state {
            zapfund_lnd::InvoiceState::Settled => InvoiceStatus::Settled(Settlement {
                r_hash: invoice.r_hash,
                amount: invoice.amt_paid_sat.or(invoice.value).unwrap_or(0),
                settled_at: invoice.settle_date.unwrap_or_else(Utc::now),
            }),
            zapfund_lnd::InvoiceState::Canceled => InvoiceStatus::Cancelled,
            zapfund_lnd::InvoiceState::Open | zapfund_lnd::InvoiceState::Accepted => {
                InvoiceStatus::Open
            }
        })
    }

    async fn settlements(
        &self,
    ) -> Result<BoxStream<'static, Result<Settlement, BackendError>>, BackendError> {
        let stream = self.client.subscribe_invoices().await?;
        let stream = stream.filter_map(|event| async move {
            match event {
                Ok(invoice) if invoice.is_settled() => Some(Ok(Settlement {
                    r_hash: invoice.r_hash,
                    amount: invoice.amt_paid_sat.or(invoice.value).unwrap_or(0),
                    settled_at: invoice.settle_date.unwrap_or_else(Utc::now),
                })),
                // Open and cancelled updates are not settlements.
                Ok(_) => None,
                Err(error) => Some(Err(error.into())),
            }
        });
        Ok(stream.boxed())
    }
}
