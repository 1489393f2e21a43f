//! Error types for the engines.

use zapfund_store::StoreError;

use crate::backend::BackendError;
use crate::directory::DirectoryError;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur in engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Ledger storage failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The payment backend failed.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The social directory failed.
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    /// Input or policy violation caught at the engine boundary.
    #[error("validation error: {0}")]
    Validation(String),
}

impl EngineError {
    /// Whether this error is a user-input/policy violation rather than an
    /// internal failure. Boundary layers map these to 4xx responses.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        match self {
            Self::Validation(_) => true,
            Self::Store(err) => err.is_validation(),
            Self::Backend(_) | Self::Directory(_) => false,
        }
    }
}
