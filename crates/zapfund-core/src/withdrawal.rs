//! Withdrawal records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{DonatorId, WithdrawalId};
use crate::payment::{MilliSatoshi, Satoshi};

/// A donator-initiated payout through the payment backend.
///
/// Created unpaid with `amount` equal to the reserved payout; `paid_at` is
/// set once the payment starts and the fee is reconciled when it completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdrawal {
    /// The withdrawal ID.
    pub id: WithdrawalId,

    /// The withdrawing donator.
    pub donator_id: DonatorId,

    /// Reserved (then realized) payout amount in satoshis.
    pub amount: Satoshi,

    /// Routing fee in millisatoshis; the reserve limit until the payment
    /// completes, then the actual fee.
    pub fee_msat: Option<MilliSatoshi>,

    /// Creation time.
    pub created_at: DateTime<Utc>,

    /// Set once the payout has been started against the backend.
    pub paid_at: Option<DateTime<Utc>>,
}

impl Withdrawal {
    /// Whether the payout has been started.
    #[must_use]
    pub fn is_paid(&self) -> bool {
        self.paid_at.is_some()
    }
}
