//! Payment primitives shared with the Lightning backend.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Amount in satoshis.
pub type Satoshi = i64;

/// Amount in millisatoshis. Used for routing fees reported by the backend.
pub type MilliSatoshi = i64;

/// Round a millisatoshi amount up to whole satoshis.
///
/// Fees are always rounded against the payer so the ledger never
/// under-charges a balance.
#[must_use]
pub fn msat_to_sat_ceil(msat: MilliSatoshi) -> Satoshi {
    debug_assert!(msat >= 0, "fees are never negative");
    (msat + 999) / 1000
}

/// A BOLT-11 payment request (invoice) string.
///
/// Only the network prefix is validated here; full decoding belongs to the
/// payment backend.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PaymentRequest(String);

impl PaymentRequest {
    /// Valid BOLT-11 human-readable prefixes (mainnet, testnet, signet, regtest).
    pub const PREFIXES: [&'static str; 4] = ["lnbc", "lntb", "lntbs", "lnbcrt"];

    /// Parse a payment request, validating the network prefix.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidPaymentRequest`] if the string does not
    /// start with a known BOLT-11 prefix.
    pub fn parse(s: impl Into<String>) -> Result<Self, CoreError> {
        let s = s.into();
        if Self::PREFIXES.iter().any(|p| s.starts_with(p)) {
            Ok(Self(s))
        } else {
            Err(CoreError::InvalidPaymentRequest(s))
        }
    }

    /// The raw bech32 string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PaymentRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for PaymentRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PaymentRequest({})", self.0)
    }
}

impl FromStr for PaymentRequest {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PaymentRequest {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<PaymentRequest> for String {
    fn from(req: PaymentRequest) -> Self {
        req.0
    }
}

/// A payment hash identifying an invoice (32 bytes of SHA-256).
///
/// Stored and serialized as URL-safe base64, which is how the backend's
/// REST API exchanges hashes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RequestHash([u8; 32]);

impl RequestHash {
    /// Construct from raw hash bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Compute the payment hash of a preimage.
    #[must_use]
    pub fn from_preimage(preimage: &[u8]) -> Self {
        let digest = Sha256::digest(preimage);
        Self(digest.into())
    }

    /// Parse from URL-safe base64.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidRequestHash`] if the input is not valid
    /// base64 or not 32 bytes long.
    pub fn from_base64(s: &str) -> Result<Self, CoreError> {
        let bytes = URL_SAFE
            .decode(s)
            .map_err(|e| CoreError::InvalidRequestHash(e.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CoreError::InvalidRequestHash("hash must be 32 bytes".into()))?;
        Ok(Self(bytes))
    }

    /// Parse from hex, as the backend's payment-request decoder returns it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidRequestHash`] if the input is not valid
    /// hex or not 32 bytes long.
    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        let bytes = hex::decode(s).map_err(|e| CoreError::InvalidRequestHash(e.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CoreError::InvalidRequestHash("hash must be 32 bytes".into()))?;
        Ok(Self(bytes))
    }

    /// The raw hash bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// URL-safe base64 representation (the stored form).
    #[must_use]
    pub fn as_base64(&self) -> String {
        URL_SAFE.encode(self.0)
    }

    /// Hex representation, as used in backend REST paths.
    #[must_use]
    pub fn as_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for RequestHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestHash({})", self.as_base64())
    }
}

impl fmt::Display for RequestHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_base64())
    }
}

impl FromStr for RequestHash {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_base64(s)
    }
}

impl TryFrom<String> for RequestHash {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_base64(&value)
    }
}

impl From<RequestHash> for String {
    fn from(hash: RequestHash) -> Self {
        hash.as_base64()
    }
}
