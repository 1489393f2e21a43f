//! Donation model and settlement classification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids::{DonationId, DonatorId, SocialAccountId, VideoId};
use crate::payment::{MilliSatoshi, RequestHash, Satoshi};
use crate::social::SocialPlatform;

/// The single target of a donation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DonationTarget {
    /// Another donator's balance (self-donation fulfills one's own balance).
    Donator(DonatorId),

    /// A social account's unclaimed balance.
    Social {
        /// The platform of the target account.
        platform: SocialPlatform,
        /// The target account.
        account_id: SocialAccountId,
    },
}

/// A donation moving value toward exactly one target.
///
/// The target columns mirror the donation table: exactly one of
/// `receiver_id` / `youtube_channel_id` / `twitter_author_id` /
/// `github_user_id` is set (a database CHECK enforces the same).
/// `youtube_video_id` is an optional refinement of a channel target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Donation {
    /// The donation ID.
    pub id: DonationId,

    /// Amount in satoshis, always positive. May be corrected by the payment
    /// backend when the invoice settles for a different amount.
    pub amount: Satoshi,

    /// The initiating donator; `None` for system-originated donations.
    pub donator_id: Option<DonatorId>,

    /// Receiver donator, when the target is a donator balance.
    pub receiver_id: Option<DonatorId>,

    /// Target YouTube channel.
    pub youtube_channel_id: Option<SocialAccountId>,

    /// Optional video refinement of a channel target.
    pub youtube_video_id: Option<VideoId>,

    /// Target Twitter author.
    pub twitter_author_id: Option<SocialAccountId>,

    /// Target GitHub user.
    pub github_user_id: Option<SocialAccountId>,

    /// External payout address; set when the target routes to an external
    /// wallet instead of a local balance.
    pub lightning_address: Option<String>,

    /// Payment hash of the locally issued invoice, unique when set.
    pub r_hash: Option<RequestHash>,

    /// Payment hash of an outbound payment to an external address made by
    /// an external wallet; never unique, purely informational.
    pub transient_r_hash: Option<RequestHash>,

    /// Routing fee paid, in millisatoshis.
    pub fee_msat: Option<MilliSatoshi>,

    /// Creation time.
    pub created_at: DateTime<Utc>,

    /// Set when the donation has been paid.
    pub paid_at: Option<DateTime<Utc>>,

    /// Set when the donation was cancelled.
    pub cancelled_at: Option<DateTime<Utc>>,

    /// Set when the donated value left the social-account balance for a
    /// donator balance (or went straight out to an external address).
    pub claimed_at: Option<DateTime<Utc>>,
}

impl Donation {
    /// Create an unpaid donation toward `target`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidAmount`] unless `amount > 0`.
    pub fn new(
        donator_id: Option<DonatorId>,
        target: DonationTarget,
        amount: Satoshi,
    ) -> Result<Self, CoreError> {
        if amount <= 0 {
            return Err(CoreError::InvalidAmount(amount));
        }
        let mut donation = Self {
            id: DonationId::generate(),
            amount,
            donator_id,
            receiver_id: None,
            youtube_channel_id: None,
            youtube_video_id: None,
            twitter_author_id: None,
            github_user_id: None,
            lightning_address: None,
            r_hash: None,
            transient_r_hash: None,
            fee_msat: None,
            created_at: Utc::now(),
            paid_at: None,
            cancelled_at: None,
            claimed_at: None,
        };
        match target {
            DonationTarget::Donator(id) => donation.receiver_id = Some(id),
            DonationTarget::Social {
                platform,
                account_id,
            } => *donation.social_column_mut(platform) = Some(account_id),
        }
        Ok(donation)
    }

    fn social_column_mut(&mut self, platform: SocialPlatform) -> &mut Option<SocialAccountId> {
        match platform {
            SocialPlatform::Youtube => &mut self.youtube_channel_id,
            SocialPlatform::Twitter => &mut self.twitter_author_id,
            SocialPlatform::Github => &mut self.github_user_id,
        }
    }

    /// The social target, if the donation has one.
    #[must_use]
    pub fn social_target(&self) -> Option<(SocialPlatform, SocialAccountId)> {
        if let Some(id) = self.youtube_channel_id {
            Some((SocialPlatform::Youtube, id))
        } else if let Some(id) = self.twitter_author_id {
            Some((SocialPlatform::Twitter, id))
        } else {
            self.github_user_id.map(|id| (SocialPlatform::Github, id))
        }
    }

    /// The target of this donation.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidTarget`] unless exactly one target
    /// reference is set.
    pub fn target(&self) -> Result<DonationTarget, CoreError> {
        let social = self.social_target();
        let count = usize::from(self.receiver_id.is_some())
            + usize::from(self.youtube_channel_id.is_some())
            + usize::from(self.twitter_author_id.is_some())
            + usize::from(self.github_user_id.is_some());
        if count != 1 {
            return Err(CoreError::InvalidTarget(self.id, count));
        }
        if let Some(receiver_id) = self.receiver_id {
            Ok(DonationTarget::Donator(receiver_id))
        } else {
            let (platform, account_id) = social.expect("count == 1 implies a social target");
            Ok(DonationTarget::Social {
                platform,
                account_id,
            })
        }
    }

    /// Whether the donation has been paid.
    #[must_use]
    pub fn is_paid(&self) -> bool {
        self.paid_at.is_some()
    }

    /// Whether the donation has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled_at.is_some()
    }

    /// Whether the donated value has been claimed out of the target balance.
    #[must_use]
    pub fn is_claimed(&self) -> bool {
        self.claimed_at.is_some()
    }

    /// Claimable donations count toward their target's outstanding balance.
    #[must_use]
    pub fn is_claimable(&self) -> bool {
        self.is_paid() && !self.is_cancelled() && !self.is_claimed()
    }

    /// The settlement direction of this donation.
    #[must_use]
    pub fn direction(&self) -> BalanceDirection {
        BalanceDirection::classify(self.r_hash.as_ref(), self.lightning_address.as_deref())
    }
}

/// How settling a donation moves local balances.
///
/// Classified from whether the donation carries a locally issued invoice
/// (`r_hash`) and whether it routes to an external lightning address. The
/// donation table conflates these four flows in one schema; this table
/// reproduces the observed behavior for each combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceDirection {
    /// No `r_hash`, external address: an external wallet paid an external
    /// address. No local balance moves beyond the target credit, when the
    /// target is also tracked locally.
    Passthrough,

    /// No `r_hash`, no address: a fully internal payment. Credits the
    /// target and debits the donator.
    Internal,

    /// `r_hash`, no address: an external wallet paid a local invoice.
    /// Credits the target only.
    Inbound,

    /// `r_hash` and external address: a local balance paid out to an
    /// external address. Debits the donator only.
    Outbound,
}

impl BalanceDirection {
    /// Classify a donation's settlement direction.
    #[must_use]
    pub fn classify(r_hash: Option<&RequestHash>, lightning_address: Option<&str>) -> Self {
        match (r_hash, lightning_address) {
            (None, Some(_)) => Self::Passthrough,
            (None, None) => Self::Internal,
            (Some(_), None) => Self::Inbound,
            (Some(_), Some(_)) => Self::Outbound,
        }
    }

    /// Whether settling in this direction debits the donator's balance.
    #[must_use]
    pub const fn debits_donator(self) -> bool {
        matches!(self, Self::Internal | Self::Outbound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash() -> RequestHash {
        RequestHash::from_preimage(b"test")
    }

    #[test]
    fn rejects_non_positive_amounts() {
        let target = DonationTarget::Donator(DonatorId::generate());
        assert!(matches!(
            Donation::new(None, target, 0),
            Err(CoreError::InvalidAmount(0))
        ));
        assert!(Donation::new(None, target, -5).is_err());
    }

    #[test]
    fn exactly_one_target() {
        let mut donation = Donation::new(
            Some(DonatorId::generate()),
            DonationTarget::Social {
                platform: SocialPlatform::Twitter,
                account_id: SocialAccountId::generate(),
            },
            100,
        )
        .unwrap();
        assert!(matches!(
            donation.target(),
            Ok(DonationTarget::Social {
                platform: SocialPlatform::Twitter,
                ..
            })
        ));

        donation.receiver_id = Some(DonatorId::generate());
        assert!(matches!(
            donation.target(),
            Err(CoreError::InvalidTarget(_, 2))
        ));

        donation.receiver_id = None;
        donation.twitter_author_id = None;
        assert!(matches!(
            donation.target(),
            Err(CoreError::InvalidTarget(_, 0))
        ));
    }

    #[test]
    fn direction_table() {
        let h = hash();
        assert_eq!(
            BalanceDirection::classify(None, Some("a@b.com")),
            BalanceDirection::Passthrough
        );
        assert_eq!(
            BalanceDirection::classify(None, None),
            BalanceDirection::Internal
        );
        assert_eq!(
            BalanceDirection::classify(Some(&h), None),
            BalanceDirection::Inbound
        );
        assert_eq!(
            BalanceDirection::classify(Some(&h), Some("a@b.com")),
            BalanceDirection::Outbound
        );
    }

    #[test]
    fn debit_applies_to_balance_funded_paths() {
        assert!(BalanceDirection::Internal.debits_donator());
        assert!(BalanceDirection::Outbound.debits_donator());
        assert!(!BalanceDirection::Inbound.debits_donator());
        assert!(!BalanceDirection::Passthrough.debits_donator());
    }

    #[test]
    fn claimable_lifecycle() {
        let mut donation = Donation::new(
            None,
            DonationTarget::Social {
                platform: SocialPlatform::Youtube,
                account_id: SocialAccountId::generate(),
            },
            50,
        )
        .unwrap();
        assert!(!donation.is_claimable());
        donation.paid_at = Some(Utc::now());
        assert!(donation.is_claimable());
        donation.claimed_at = Some(Utc::now());
        assert!(!donation.is_claimable());
    }
}
