//! Error types for the LND and LNURL clients.

/// Errors that can occur when talking to the payment backend.
#[derive(Debug, thiserror::Error)]
pub enum LndError {
    /// HTTP transport failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The node returned an error response.
    #[error("LND error: {status} - {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error body from the node.
        message: String,
    },

    /// A router payment finished in a non-success state.
    #[error("payment failed: {status} ({failure_reason:?})")]
    PaymentFailed {
        /// Final payment status reported by the router.
        status: String,
        /// Failure reason, when the router reports one.
        failure_reason: Option<String>,
    },

    /// The node's response could not be decoded.
    #[error("undecodable response: {0}")]
    InvalidResponse(String),

    /// A value in a response failed domain validation.
    #[error(transparent)]
    Decode(#[from] zapfund_core::CoreError),

    /// The LNURL-pay flow failed.
    #[error("lnurlp error: {0}")]
    Lnurlp(String),
}
