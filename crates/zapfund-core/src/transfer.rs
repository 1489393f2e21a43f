//! Transfer records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{DonatorId, SocialAccountId, TransferId};
use crate::payment::Satoshi;
use crate::social::SocialPlatform;

/// Record of a bulk move of a social account's entire claimable balance to
/// its owning donator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    /// The transfer ID.
    pub id: TransferId,

    /// Amount moved, in satoshis.
    pub amount: Satoshi,

    /// The donator credited.
    pub donator_id: DonatorId,

    /// The platform of the drained account.
    pub platform: SocialPlatform,

    /// The drained social account.
    pub account_id: SocialAccountId,

    /// When the transfer happened.
    pub created_at: DateTime<Utc>,
}
