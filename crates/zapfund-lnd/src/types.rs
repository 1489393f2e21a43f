//! Wire types for the LND REST gateway.
//!
//! The gateway encodes all int64 fields as JSON strings and hashes as
//! base64 (standard alphabet, unlike the URL-safe form the ledger stores),
//! so most fields need lenient deserializers.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer};

use zapfund_core::{MilliSatoshi, PaymentRequest, RequestHash, Satoshi};

/// Deserialize an int64 that the gateway may encode as a string.
pub(crate) fn int64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i64),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

fn opt_int64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapper(#[serde(deserialize_with = "int64")] i64);
    Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|Wrapper(n)| n))
}

/// Unix seconds encoded as a string; `"0"` means unset.
fn opt_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = opt_int64(deserializer)?;
    match secs {
        None | Some(0) => Ok(None),
        Some(secs) => Utc
            .timestamp_opt(secs, 0)
            .single()
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("timestamp out of range: {secs}"))),
    }
}

/// Payment hash in either base64 alphabet.
pub(crate) fn lenient_hash<'de, D>(deserializer: D) -> Result<RequestHash, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    let normalized = raw.replace('+', "-").replace('/', "_");
    RequestHash::from_base64(&normalized).map_err(serde::de::Error::custom)
}

/// Invoice lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceState {
    /// Open, awaiting payment.
    Open,
    /// Paid.
    Settled,
    /// Cancelled or expired.
    Canceled,
    /// HTLCs accepted, not yet settled (HODL invoices).
    Accepted,
}

/// An invoice as reported by the node.
#[derive(Debug, Clone, Deserialize)]
pub struct Invoice {
    /// Invoice memo.
    #[serde(default)]
    pub memo: Option<String>,

    /// Payment hash.
    #[serde(deserialize_with = "lenient_hash")]
    pub r_hash: RequestHash,

    /// The BOLT-11 payment request.
    pub payment_request: PaymentRequest,

    /// Requested amount in satoshis.
    #[serde(default, deserialize_with = "opt_int64")]
    pub value: Option<Satoshi>,

    /// Amount actually paid in satoshis; may exceed `value` (overpayment)
    /// and is only meaningful once settled.
    #[serde(default, deserialize_with = "opt_int64")]
    pub amt_paid_sat: Option<Satoshi>,

    /// Lifecycle state.
    #[serde(default = "default_state")]
    pub state: InvoiceState,

    /// When the invoice was created.
    #[serde(default, deserialize_with = "opt_timestamp")]
    pub creation_date: Option<DateTime<Utc>>,

    /// When the invoice settled; `None` until then.
    #[serde(default, deserialize_with = "opt_timestamp")]
    pub settle_date: Option<DateTime<Utc>>,
}

fn default_state() -> InvoiceState {
    InvoiceState::Open
}

impl Invoice {
    /// Whether the invoice has settled.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.state == InvoiceState::Settled
    }
}

/// A decoded BOLT-11 payment request, from the node's decoder.
#[derive(Debug, Clone, Deserialize)]
pub struct DecodedPaymentRequest {
    /// Destination node public key.
    pub destination: String,

    /// Payment hash (hex in this endpoint, unlike everywhere else).
    #[serde(deserialize_with = "hex_hash")]
    pub payment_hash: RequestHash,

    /// Amount in satoshis.
    #[serde(deserialize_with = "int64")]
    pub num_satoshis: Satoshi,

    /// Invoice description.
    #[serde(default)]
    pub description: Option<String>,

    /// Expiry in seconds.
    #[serde(default, deserialize_with = "opt_int64")]
    pub expiry: Option<i64>,
}

fn hex_hash<'de, D>(deserializer: D) -> Result<RequestHash, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    RequestHash::from_hex(&raw).map_err(serde::de::Error::custom)
}

/// Final status of a router payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// Unknown.
    Unknown,
    /// Still in flight.
    InFlight,
    /// Completed successfully.
    Succeeded,
    /// Failed.
    Failed,
}

/// A router payment event.
#[derive(Debug, Clone, Deserialize)]
pub struct Payment {
    /// Payment status.
    pub status: PaymentStatus,

    /// Failure reason; `FAILURE_REASON_NONE` while not failed.
    #[serde(default)]
    pub failure_reason: Option<String>,

    /// Amount in satoshis.
    #[serde(default, deserialize_with = "opt_int64")]
    pub value_sat: Option<Satoshi>,

    /// Routing fee in millisatoshis.
    #[serde(default, deserialize_with = "opt_int64")]
    pub fee_msat: Option<MilliSatoshi>,

    /// Creation time in unix nanoseconds.
    #[serde(default, deserialize_with = "opt_int64")]
    pub creation_time_ns: Option<i64>,
}

impl Payment {
    /// Payment creation time, when the router reported one.
    #[must_use]
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.creation_time_ns
            .and_then(|ns| Utc.timestamp_opt(ns / 1_000_000_000, 0).single())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invoice_decodes_gateway_shapes() {
        let hash = RequestHash::from_preimage(b"x");
        // Standard-alphabet base64 with string int64s, as the gateway sends.
        let standard = hash.as_base64().replace('-', "+").replace('_', "/");
        let json = format!(
            r#"{{"memo":"tip","r_hash":"{standard}","payment_request":"lnbc1...","value":"100","state":"SETTLED","amt_paid_sat":"105","settle_date":"1700000000"}}"#
        );
        let invoice: Invoice = serde_json::from_str(&json).unwrap();
        assert_eq!(invoice.r_hash, hash);
        assert_eq!(invoice.value, Some(100));
        assert_eq!(invoice.amt_paid_sat, Some(105));
        assert!(invoice.is_settled());
        assert!(invoice.settle_date.is_some());
    }

    #[test]
    fn zero_settle_date_means_unsettled() {
        let hash = RequestHash::from_preimage(b"y");
        let json = format!(
            r#"{{"r_hash":"{}","payment_request":"lnbcrt1...","state":"OPEN","settle_date":"0"}}"#,
            hash.as_base64()
        );
        let invoice: Invoice = serde_json::from_str(&json).unwrap();
        assert!(invoice.settle_date.is_none());
        assert!(!invoice.is_settled());
    }

    #[test]
    fn payreq_hash_is_hex() {
        let hash = RequestHash::from_preimage(b"z");
        let json = format!(
            r#"{{"destination":"02abc","payment_hash":"{}","num_satoshis":"42"}}"#,
            hash.as_hex()
        );
        let decoded: DecodedPaymentRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.payment_hash, hash);
        assert_eq!(decoded.num_satoshis, 42);
    }
}
