//! The LND REST client.

use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;

use zapfund_core::{PaymentRequest, RequestHash, Satoshi};

use crate::config::LndConfig;
use crate::error::LndError;
use crate::types::{lenient_hash, DecodedPaymentRequest, Invoice, InvoiceState, Payment, PaymentStatus};

const MACAROON_HEADER: &str = "Grpc-Metadata-macaroon";

/// Client for the LND REST gateway.
#[derive(Debug, Clone)]
pub struct LndClient {
    config: LndConfig,
    http: reqwest::Client,
}

impl LndClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: LndConfig) -> Result<Self, LndError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { config, http })
    }

    fn request(&self, method: reqwest::Method, api: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{api}", self.config.url);
        tracing::debug!(%method, %url, "lnd request");
        let mut builder = self.http.request(method, url);
        if let Some(macaroon) = &self.config.macaroon_hex {
            builder = builder.header(MACAROON_HEADER, macaroon);
        }
        builder
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, LndError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let message = response.text().await.unwrap_or_default();
            Err(LndError::Api {
                status: status.as_u16(),
                message,
            })
        }
    }

    /// Issue an invoice for `value` satoshis.
    ///
    /// # Errors
    ///
    /// Returns an error if the node rejects the request.
    pub async fn create_invoice(
        &self,
        memo: &str,
        value: Satoshi,
        expiry: Option<i64>,
    ) -> Result<Invoice, LndError> {
        #[derive(Deserialize)]
        struct AddInvoiceResponse {
            #[serde(deserialize_with = "lenient_hash")]
            r_hash: RequestHash,
            payment_request: PaymentRequest,
        }

        let response = self
            .request(reqwest::Method::POST, "/v1/invoices")
            .json(&json!({
                "memo": memo,
                "value": value.to_string(),
                "expiry": expiry.unwrap_or(self.config.invoice_expiry).to_string(),
                "private": self.config.private,
            }))
            .send()
            .await?;
        let added: AddInvoiceResponse = Self::check(response).await?.json().await?;
        Ok(Invoice {
            memo: Some(memo.to_string()),
            r_hash: added.r_hash,
            payment_request: added.payment_request,
            value: Some(value),
            amt_paid_sat: None,
            state: InvoiceState::Open,
            creation_date: None,
            settle_date: None,
        })
    }

    /// Look up an invoice by payment hash.
    ///
    /// # Errors
    ///
    /// Returns an error if the invoice is unknown to the node.
    pub async fn lookup_invoice(&self, r_hash: RequestHash) -> Result<Invoice, LndError> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/v1/invoice/{}", r_hash.as_hex()),
            )
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// Cancel an open invoice. Only HODL invoices can be cancelled on the
    /// node; for plain invoices this is best-effort.
    ///
    /// # Errors
    ///
    /// Returns an error if the node rejects the cancellation.
    pub async fn cancel_invoice(&self, r_hash: RequestHash) -> Result<(), LndError> {
        let response = self
            .request(reqwest::Method::POST, "/v2/invoices/cancel")
            .json(&json!({ "payment_hash": r_hash.as_hex() }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Decode a payment request with the node's decoder.
    ///
    /// # Errors
    ///
    /// Returns an error if the request is malformed.
    pub async fn decode_payment_request(
        &self,
        payment_request: &PaymentRequest,
    ) -> Result<DecodedPaymentRequest, LndError> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/v1/payreq/{payment_request}"),
            )
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// Pay a payment request through the router, waiting for the final
    /// payment state.
    ///
    /// # Errors
    ///
    /// Returns [`LndError::PaymentFailed`] when the final state is not
    /// `SUCCEEDED`.
    pub async fn pay_invoice(
        &self,
        payment_request: &PaymentRequest,
    ) -> Result<Payment, LndError> {
        let response = self
            .request(reqwest::Method::POST, "/v2/router/send")
            .json(&json!({
                "payment_request": payment_request.as_str(),
                "timeout_seconds": self.config.payment_timeout,
            }))
            .timeout(Duration::from_secs(
                u64::try_from(self.config.payment_timeout).unwrap_or(30) + 10,
            ))
            .send()
            .await?;
        let body = Self::check(response).await?.text().await?;

        // The gateway streams one JSON event per line; the last one carries
        // the final payment state.
        let last = body
            .lines()
            .filter(|line| !line.trim().is_empty())
            .last()
            .ok_or_else(|| LndError::InvalidResponse("empty router response".into()))?;
        let event: StreamEvent<Payment> = serde_json::from_str(last)
            .map_err(|e| LndError::InvalidResponse(format!("router event: {e}")))?;
        let payment = event.into_result()?;
        if payment.status == PaymentStatus::Succeeded {
            Ok(payment)
        } else {
            Err(LndError::PaymentFailed {
                status: format!("{:?}", payment.status),
                failure_reason: payment.failure_reason,
            })
        }
    }

    /// Subscribe to invoice events. Yields every invoice update the node
    /// publishes; callers filter for settled ones.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription request fails. Errors on
    /// individual events are yielded in-stream.
    pub async fn subscribe_invoices(
        &self,
    ) -> Result<BoxStream<'static, Result<Invoice, LndError>>, LndError> {
        // Long-lived streaming request; override the default client timeout.
        let response = self
            .request(reqwest::Method::GET, "/v1/invoices/subscribe")
            .timeout(Duration::from_secs(60 * 60 * 24 * 30))
            .send()
            .await?;
        let response = Self::check(response).await?;
        tracing::debug!("invoice subscription open");

        let stream = futures::stream::unfold(
            (response.bytes_stream(), Vec::<u8>::new()),
            |(mut body, mut buffer)| async move {
                loop {
                    if let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = buffer.drain(..=pos).collect();
                        let line = String::from_utf8_lossy(&line);
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        let item = serde_json::from_str::<StreamEvent<Invoice>>(line)
                            .map_err(|e| {
                                LndError::InvalidResponse(format!("invoice event: {e}"))
                            })
                            .and_then(StreamEvent::into_result);
                        return Some((item, (body, buffer)));
                    }
                    match body.next().await {
                        Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
                        Some(Err(error)) => {
                            return Some((Err(error.into()), (body, buffer)));
                        }
                        None => return None,
                    }
                }
            },
        );
        Ok(stream.boxed())
    }

    /// The node's wallet state (e.g. `SERVER_ACTIVE`).
    ///
    /// # Errors
    ///
    /// Returns an error if the node is unreachable.
    pub async fn query_state(&self) -> Result<String, LndError> {
        #[derive(Deserialize)]
        struct StateResponse {
            state: String,
        }
        let response = self.request(reqwest::Method::GET, "/v1/state").send().await?;
        let state: StateResponse = Self::check(response).await?.json().await?;
        Ok(state.state)
    }
}

/// Streaming responses wrap each event in `{"result": ...}` and errors in
/// `{"error": ...}`.
#[derive(Deserialize)]
struct StreamEvent<T> {
    #[serde(default = "none")]
    result: Option<T>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

fn none<T>() -> Option<T> {
    None
}

impl<T> StreamEvent<T> {
    fn into_result(self) -> Result<T, LndError> {
        if let Some(error) = self.error {
            return Err(LndError::InvalidResponse(format!("stream error: {error}")));
        }
        self.result
            .ok_or_else(|| LndError::InvalidResponse("stream event without result".into()))
    }
}
