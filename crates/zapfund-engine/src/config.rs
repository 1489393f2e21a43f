//! Engine configuration.

use std::time::Duration;

use zapfund_core::Satoshi;

/// Tunables shared by the donation, transfer and withdrawal engines.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Satoshis held back from a withdrawal as the routing fee limit. The
    /// unused part is refunded once the actual fee is known.
    pub withdrawal_fee_reserve: Satoshi,

    /// Invoice expiry in seconds; `None` uses the backend's default.
    pub invoice_expiry: Option<i64>,

    /// How long cached social account metadata stays fresh before the
    /// directory is asked again.
    pub account_refresh: Duration,

    /// Delay before the settlement listener reconnects a dropped
    /// subscription.
    pub listener_retry_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            withdrawal_fee_reserve: 10,
            invoice_expiry: None,
            account_refresh: Duration::from_secs(24 * 60 * 60),
            listener_retry_delay: Duration::from_secs(5),
        }
    }
}

impl EngineConfig {
    /// Create a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the withdrawal fee reserve in satoshis.
    #[must_use]
    pub fn with_withdrawal_fee_reserve(mut self, sats: Satoshi) -> Self {
        self.withdrawal_fee_reserve = sats;
        self
    }

    /// Set the invoice expiry in seconds.
    #[must_use]
    pub fn with_invoice_expiry(mut self, seconds: i64) -> Self {
        self.invoice_expiry = Some(seconds);
        self
    }

    /// Set the metadata freshness window.
    #[must_use]
    pub fn with_account_refresh(mut self, interval: Duration) -> Self {
        self.account_refresh = interval;
        self
    }

    /// Set the listener reconnect delay.
    #[must_use]
    pub fn with_listener_retry_delay(mut self, delay: Duration) -> Self {
        self.listener_retry_delay = delay;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_builders() {
        let config = EngineConfig::new();
        assert_eq!(config.withdrawal_fee_reserve, 10);
        assert!(config.invoice_expiry.is_none());

        let config = config
            .with_withdrawal_fee_reserve(25)
            .with_invoice_expiry(600)
            .with_account_refresh(Duration::from_secs(60));
        assert_eq!(config.withdrawal_fee_reserve, 25);
        assert_eq!(config.invoice_expiry, Some(600));
        assert_eq!(config.account_refresh, Duration::from_secs(60));
    }
}
