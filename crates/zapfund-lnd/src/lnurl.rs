//! LNURL-pay client for resolving lightning addresses.
//!
//! Implements LUD-06/LUD-16: a lightning address `name@host` maps to a
//! well-known metadata URL; the metadata carries a callback that exchanges
//! an amount for a BOLT-11 payment request. Amount verification against the
//! returned invoice is the caller's job, through the node's decoder.

use std::time::Duration;

use serde::Deserialize;

use zapfund_core::{PaymentRequest, Satoshi};

use crate::error::LndError;

/// The well-known LNURL-pay endpoint for a lightning address.
///
/// # Errors
///
/// Returns [`LndError::Lnurlp`] if the address has no `@`.
pub fn lightning_address_to_lnurlp(address: &str) -> Result<String, LndError> {
    let (name, host) = address
        .split_once('@')
        .ok_or_else(|| LndError::Lnurlp(format!("invalid lightning address: {address}")))?;
    Ok(format!("https://{host}/.well-known/lnurlp/{name}"))
}

/// LNURL-pay metadata returned by the well-known endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LnurlpMetadata {
    /// Callback URL that issues the invoice.
    pub callback: String,

    /// Minimum payable amount in millisatoshis.
    pub min_sendable: u64,

    /// Maximum payable amount in millisatoshis.
    pub max_sendable: u64,

    /// Raw metadata string, committed to by the invoice.
    pub metadata: String,

    /// Maximum comment length the callback accepts, if comments are allowed.
    #[serde(default)]
    pub comment_allowed: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct StatusWrapper {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

fn check_status(raw: &serde_json::Value) -> Result<(), LndError> {
    let wrapper: StatusWrapper = serde_json::from_value(raw.clone())
        .map_err(|e| LndError::Lnurlp(format!("undecodable response: {e}")))?;
    match wrapper.status.as_deref() {
        None | Some("OK") => Ok(()),
        Some(status) => Err(LndError::Lnurlp(format!(
            "status is {status}: {}",
            wrapper.reason.unwrap_or_default()
        ))),
    }
}

/// Client for the LNURL-pay flow.
#[derive(Debug, Clone)]
pub struct LnurlpClient {
    http: reqwest::Client,
}

impl Default for LnurlpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl LnurlpClient {
    /// Create a client.
    #[must_use]
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .unwrap_or_default();
        Self { http }
    }

    /// Fetch LNURL-pay metadata from a well-known endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`LndError::Lnurlp`] on any protocol-level failure.
    pub async fn fetch_metadata(&self, lnurlp: &str) -> Result<LnurlpMetadata, LndError> {
        let response = self
            .http
            .get(lnurlp)
            .send()
            .await
            .map_err(|e| LndError::Lnurlp(format!("{lnurlp}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(LndError::Lnurlp(format!("{lnurlp} responded with {status}")));
        }
        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LndError::Lnurlp(format!("{lnurlp}: {e}")))?;
        check_status(&raw)?;
        serde_json::from_value(raw).map_err(|e| LndError::Lnurlp(format!("{lnurlp}: {e}")))
    }

    /// Exchange an amount for a payment request via the metadata callback.
    ///
    /// # Errors
    ///
    /// Returns [`LndError::Lnurlp`] when the amount is out of the metadata
    /// bounds or the callback fails.
    pub async fn fetch_invoice(
        &self,
        metadata: &LnurlpMetadata,
        amount: Satoshi,
        comment: &str,
    ) -> Result<PaymentRequest, LndError> {
        let msat = u64::try_from(amount)
            .ok()
            .and_then(|sat| sat.checked_mul(1000))
            .ok_or_else(|| LndError::Lnurlp(format!("invalid amount: {amount}")))?;
        if msat < metadata.min_sendable || msat > metadata.max_sendable {
            return Err(LndError::Lnurlp(format!(
                "amount {amount} sat out of bounds [{}, {}] msat",
                metadata.min_sendable, metadata.max_sendable
            )));
        }

        let mut params = vec![("amount".to_string(), msat.to_string())];
        if let Some(limit) = metadata.comment_allowed {
            let truncated: String = comment.chars().take(limit).collect();
            params.push(("comment".to_string(), truncated));
        }

        let response = self
            .http
            .get(&metadata.callback)
            .query(&params)
            .send()
            .await
            .map_err(|e| LndError::Lnurlp(format!("callback: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(LndError::Lnurlp(format!("callback responded with {status}")));
        }
        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LndError::Lnurlp(format!("callback: {e}")))?;
        check_status(&raw)?;

        #[derive(Deserialize)]
        struct CallbackResponse {
            pr: PaymentRequest,
        }
        let callback: CallbackResponse = serde_json::from_value(raw)
            .map_err(|e| LndError::Lnurlp(format!("callback: {e}")))?;
        Ok(callback.pr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_maps_to_well_known_url() {
        assert_eq!(
            lightning_address_to_lnurlp("alice@wallet.example").unwrap(),
            "https://wallet.example/.well-known/lnurlp/alice"
        );
        assert!(lightning_address_to_lnurlp("not-an-address").is_err());
    }

    #[test]
    fn non_ok_status_is_an_error() {
        let raw = serde_json::json!({"status": "ERROR", "reason": "nope"});
        assert!(check_status(&raw).is_err());
        let raw = serde_json::json!({"callback": "https://x", "status": "OK"});
        assert!(check_status(&raw).is_ok());
        let raw = serde_json::json!({"callback": "https://x"});
        assert!(check_status(&raw).is_ok());
    }
}
