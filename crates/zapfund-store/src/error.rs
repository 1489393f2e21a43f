//! Error types for ledger storage.

use zapfund_core::{DonationId, Satoshi};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in ledger storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Stored data failed to deserialize into a domain type.
    #[error("corrupt row: {0}")]
    CorruptRow(String),

    /// Record not found, or a guarded update matched no row.
    ///
    /// Guarded updates deliberately conflate "missing" with "predicate not
    /// satisfied": both mean the caller's view of the row was stale.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of record.
        entity: &'static str,
        /// The identifier that did not match.
        id: String,
    },

    /// A balance update would drive a balance negative. The enclosing
    /// transaction is rolled back; nothing is partially applied.
    #[error("not enough balance: {balance} sat available, {required} sat required")]
    NotEnoughBalance {
        /// Balance before the rejected update.
        balance: Satoshi,
        /// Amount the update needed.
        required: Satoshi,
    },

    /// The donation can no longer be cancelled (already claimed or already
    /// cancelled).
    #[error("unable to cancel donation {0}")]
    UnableToCancelDonation(DonationId),

    /// Internal bookkeeping invariant violated; indicates a bug, not bad
    /// user input. Never retried.
    #[error("invalid db state: {0}")]
    InvalidDbState(String),

    /// A uniqueness constraint was violated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Input or policy violation surfaced by the store (e.g. an unlink that
    /// would strand a balance).
    #[error("validation error: {0}")]
    Validation(String),
}

impl StoreError {
    /// Whether this error is a user-input/policy violation rather than an
    /// internal failure. `NotEnoughBalance` is a validation error in the
    /// spec's taxonomy.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::NotEnoughBalance { .. } | Self::Conflict(_)
        )
    }
}

/// Map a sqlx error, turning unique-constraint violations into
/// [`StoreError::Conflict`].
pub(crate) fn map_db_err(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.is_unique_violation() {
            let constraint = db_err.constraint().unwrap_or("unique constraint");
            return StoreError::Conflict(constraint.to_string());
        }
    }
    StoreError::Database(err)
}
