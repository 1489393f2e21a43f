//! Error types for zapfund core.

use crate::ids::IdError;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur when constructing or validating core types.
///
/// These are all user-input or policy violations; storage and backend
/// failures have their own error types in the respective crates.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    /// A payment request string without a known BOLT-11 prefix.
    #[error("invalid payment request: {0}")]
    InvalidPaymentRequest(String),

    /// A payment hash that is not 32 bytes of URL-safe base64.
    #[error("invalid request hash: {0}")]
    InvalidRequestHash(String),

    /// Donation amount must be a positive number of satoshis.
    #[error("invalid amount: {0}")]
    InvalidAmount(i64),

    /// A donation must reference exactly one target.
    #[error("donation {0} has {1} targets, expected exactly one")]
    InvalidTarget(crate::DonationId, usize),
}
