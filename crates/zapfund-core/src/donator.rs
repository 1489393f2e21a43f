//! Donator (visitor account) types.

use serde::{Deserialize, Serialize};

use crate::ids::DonatorId;
use crate::payment::Satoshi;

/// A balance-holding account representing a visiting user.
///
/// Donators are created lazily: a visitor gets an anonymous UUID on first
/// interaction and the row is persisted only on the first state-changing
/// action (donation, link, withdrawal).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Donator {
    /// The donator ID.
    pub id: DonatorId,

    /// Display name, if any.
    pub name: Option<String>,

    /// Avatar URL, if any.
    pub avatar_url: Option<String>,

    /// Registered lightning address for external payouts.
    pub lightning_address: Option<String>,

    /// Public key from lnurl-auth, unique across donators.
    pub lnauth_pubkey: Option<String>,

    /// Current balance in satoshis. Never negative.
    pub balance: Satoshi,
}

impl Donator {
    /// Create an anonymous donator with a fresh UUID and zero balance.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::with_id(DonatorId::generate())
    }

    /// Create an empty donator with a known ID (e.g. restored from a session).
    #[must_use]
    pub fn with_id(id: DonatorId) -> Self {
        Self {
            id,
            name: None,
            avatar_url: None,
            lightning_address: None,
            lnauth_pubkey: None,
            balance: 0,
        }
    }

    /// Whether this donator has a directly attached auth method.
    ///
    /// A donator is *connected* when it could eventually withdraw its funds:
    /// either through an lnauth key or an OAuth-verified social link. The
    /// link half of that check lives in the store, which can see the link
    /// tables; this method only covers the local key.
    #[must_use]
    pub fn has_auth_key(&self) -> bool {
        self.lnauth_pubkey.is_some()
    }
}
