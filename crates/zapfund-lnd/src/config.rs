//! LND client configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the LND REST client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LndConfig {
    /// Base URL of the LND REST gateway (default: `http://localhost:8080`)
    pub url: String,

    /// Hex-encoded invoice macaroon sent as `Grpc-Metadata-macaroon`.
    pub macaroon_hex: Option<String>,

    /// Default invoice expiry in seconds (default: 3600).
    pub invoice_expiry: i64,

    /// Whether to include private channel hints in invoices.
    pub private: bool,

    /// Router payment timeout in seconds (default: 30).
    pub payment_timeout: i64,
}

impl Default for LndConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080".to_string(),
            macaroon_hex: None,
            invoice_expiry: 3600,
            private: false,
            payment_timeout: 30,
        }
    }
}

impl LndConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the REST gateway URL.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Set the hex-encoded macaroon.
    #[must_use]
    pub fn with_macaroon_hex(mut self, macaroon: impl Into<String>) -> Self {
        self.macaroon_hex = Some(macaroon.into());
        self
    }

    /// Set the default invoice expiry in seconds.
    #[must_use]
    pub fn with_invoice_expiry(mut self, seconds: i64) -> Self {
        self.invoice_expiry = seconds;
        self
    }

    /// Include private channel hints in issued invoices.
    #[must_use]
    pub fn with_private(mut self, private: bool) -> Self {
        self.private = private;
        self
    }

    /// Set the router payment timeout in seconds.
    #[must_use]
    pub fn with_payment_timeout(mut self, seconds: i64) -> Self {
        self.payment_timeout = seconds;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_pattern() {
        let config = LndConfig::new()
            .with_url("https://lnd.example:8080")
            .with_macaroon_hex("abcdef")
            .with_invoice_expiry(900);
        assert_eq!(config.url, "https://lnd.example:8080");
        assert_eq!(config.macaroon_hex.as_deref(), Some("abcdef"));
        assert_eq!(config.invoice_expiry, 900);
        assert!(!config.private);
    }
}
