//! Ledger storage for zapfund.
//!
//! This crate provides durable storage for donators, social accounts,
//! donations, transfers and withdrawals, with the transactional guarantees
//! the ledger's accounting invariant relies on:
//!
//! - every balance-mutating operation runs in one database transaction that
//!   row-locks what it mutates;
//! - settlement is idempotent via a conditional update (`paid_at IS NULL`)
//!   whose zero-rows outcome is a first-class result, not an error;
//! - no balance is ever observed negative — guarded updates reject and roll
//!   back instead.
//!
//! # Backends
//!
//! - [`PgLedger`]: PostgreSQL via sqlx, with `FOR UPDATE` row locks and a
//!   LISTEN/NOTIFY-backed notification bus.
//! - [`MemoryLedger`]: a single-mutex in-memory backend with the same
//!   observable semantics, for engine tests and property suites.
//!
//! # Example
//!
//! ```no_run
//! use zapfund_store::{Ledger, MemoryLedger};
//! use zapfund_core::Donator;
//!
//! # async fn example() -> zapfund_store::Result<()> {
//! let ledger = MemoryLedger::new();
//! let donator = Donator::anonymous();
//! ledger.save_donator(&donator).await?;
//! assert_eq!(ledger.query_donator(donator.id).await?.unwrap().balance, 0);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod memory;
pub mod notify;
pub mod pg;
mod pg_donations;
mod pg_social;
mod pg_withdraw;

pub use error::{Result, StoreError};
pub use memory::MemoryLedger;
pub use notify::{object_topic, Notification, NotificationBroker, Subscription};
pub use pg::PgLedger;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use zapfund_core::{
    AccountMetadata, Donation, DonationId, Donator, DonatorId, MilliSatoshi, RequestHash, Satoshi,
    SocialAccount, SocialAccountId, SocialPlatform, VideoId, Withdrawal, WithdrawalId,
};

/// Selects a donation by primary key or by invoice payment hash.
///
/// The settlement listener only knows the `r_hash` of the invoice that
/// settled; API callers know the donation id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DonationSelector {
    /// By donation ID.
    ById(DonationId),
    /// By the payment hash of the locally issued invoice.
    ByRHash(RequestHash),
}

impl From<DonationId> for DonationSelector {
    fn from(id: DonationId) -> Self {
        Self::ById(id)
    }
}

impl From<RequestHash> for DonationSelector {
    fn from(r_hash: RequestHash) -> Self {
        Self::ByRHash(r_hash)
    }
}

/// Outcome of the conditional settlement update.
///
/// Two producers can race to settle the same donation (an API retry against
/// the backend's settlement subscription). The second attempt matches zero
/// rows and reports [`SettleOutcome::AlreadySettled`] — a no-op, not an
/// error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleOutcome {
    /// This call performed the settlement; balances were adjusted.
    Settled(Donation),
    /// Another call settled the donation first (or it does not exist).
    AlreadySettled,
}

/// Filter for donation queries. All set fields are combined with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DonationFilter {
    /// Donations initiated by this donator.
    pub donator_id: Option<DonatorId>,

    /// Donations received by this donator.
    pub receiver_id: Option<DonatorId>,

    /// Donations targeting this social account.
    pub social: Option<(SocialPlatform, SocialAccountId)>,

    /// Only paid donations.
    pub only_paid: bool,

    /// Include cancelled donations (excluded by default).
    pub include_cancelled: bool,
}

/// The ledger persistence boundary.
///
/// Every method is one atomic unit of work: it either fully applies or
/// leaves no trace. Errors from guarded updates (`NotEnoughBalance`,
/// `NotFound`, `UnableToCancelDonation`) roll the whole operation back.
#[async_trait]
pub trait Ledger: Send + Sync {
    // =========================================================================
    // Donator Operations
    // =========================================================================

    /// Insert or update a donator, overwriting profile fields.
    async fn save_donator(&self, donator: &Donator) -> Result<()>;

    /// Insert a donator if missing, leaving an existing row untouched.
    ///
    /// Used before linking or donating so that a lazily created visitor row
    /// exists without clobbering fields like `lnauth_pubkey` that may be
    /// uninitialized on the in-memory copy.
    async fn ensure_donator(&self, donator: &Donator) -> Result<()>;

    /// Get a donator by ID.
    async fn query_donator(&self, id: DonatorId) -> Result<Option<Donator>>;

    /// Balance minus sats reserved by created-but-unpaid donations that pay
    /// out to an external lightning address from this balance.
    async fn available_balance(&self, id: DonatorId) -> Result<Satoshi>;

    /// Whether the donator has any way to eventually withdraw funds: an
    /// lnauth key or an OAuth-verified social link.
    async fn is_connected(&self, id: DonatorId) -> Result<bool>;

    // =========================================================================
    // Social Account Operations
    // =========================================================================

    /// Upsert a social account from freshly fetched directory metadata,
    /// updating `last_fetched_at`.
    async fn save_social_account(
        &self,
        platform: SocialPlatform,
        metadata: &AccountMetadata,
    ) -> Result<SocialAccount>;

    /// Get a social account by ID, including its verified-owner link.
    async fn query_social_account(
        &self,
        platform: SocialPlatform,
        account_id: SocialAccountId,
    ) -> Result<Option<SocialAccount>>;

    /// Get a social account by its platform-specific external ID.
    async fn query_social_account_by_external_id(
        &self,
        platform: SocialPlatform,
        external_id: &str,
    ) -> Result<Option<SocialAccount>>;

    /// Link a social account to a donator.
    ///
    /// Upsert-on-conflict merging `via_oauth` with logical OR: a weaker
    /// non-OAuth link never downgrades a verified one. At most one OAuth
    /// link may exist per account (enforced by a partial unique index);
    /// violating that yields [`StoreError::Conflict`].
    ///
    /// Returns `true` if a link row was created or updated.
    async fn link_social_account(
        &self,
        platform: SocialPlatform,
        account_id: SocialAccountId,
        donator: &Donator,
        via_oauth: bool,
    ) -> Result<bool>;

    /// Remove a link.
    ///
    /// Fails with [`StoreError::Validation`] if removing it would leave the
    /// donator holding a positive balance with no remaining connected auth
    /// method.
    async fn unlink_social_account(
        &self,
        platform: SocialPlatform,
        account_id: SocialAccountId,
        donator_id: DonatorId,
    ) -> Result<()>;

    /// Move the account's entire claimable balance to `donator_id`.
    ///
    /// Locks the account row, self-checks that the sum of claimable
    /// donations equals the stored balance (mismatch →
    /// [`StoreError::InvalidDbState`], nothing mutated), records a Transfer,
    /// zeroes the account balance, marks the donations claimed and credits
    /// the donator — all in one transaction. Returns the amount moved.
    async fn transfer_donations(
        &self,
        platform: SocialPlatform,
        account_id: SocialAccountId,
        donator_id: DonatorId,
    ) -> Result<Satoshi>;

    // =========================================================================
    // YouTube Video Operations
    // =========================================================================

    /// Upsert a video row under a channel, returning its ID.
    async fn save_youtube_video(
        &self,
        channel_id: SocialAccountId,
        external_video_id: &str,
        title: Option<&str>,
    ) -> Result<VideoId>;

    // =========================================================================
    // Donation Operations
    // =========================================================================

    /// Persist a new donation row.
    async fn create_donation(&self, donation: &Donation) -> Result<()>;

    /// Get a donation.
    async fn query_donation(&self, selector: DonationSelector) -> Result<Option<Donation>>;

    /// List donations matching `filter`, newest activity first
    /// (ordered by `COALESCE(paid_at, created_at)` descending).
    async fn query_donations(
        &self,
        filter: &DonationFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Donation>>;

    /// Settle a donation: the conditional `paid_at IS NULL` update plus the
    /// balance adjustments of the donation's direction.
    ///
    /// `amount` replaces the requested amount (the backend may settle for a
    /// different value); `claimed_at` is set for payouts that never touch
    /// the target's local balance.
    async fn donation_paid(
        &self,
        selector: DonationSelector,
        amount: Satoshi,
        paid_at: DateTime<Utc>,
        fee_msat: Option<MilliSatoshi>,
        claimed_at: Option<DateTime<Utc>>,
    ) -> Result<SettleOutcome>;

    /// Cancel a donation.
    ///
    /// Only donations with `claimed_at IS NULL AND cancelled_at IS NULL`
    /// can be cancelled; anything else fails with
    /// [`StoreError::UnableToCancelDonation`]. If the donation was already
    /// paid, its balance effect is reversed (guarded against negatives).
    async fn cancel_donation(&self, donation_id: DonationId) -> Result<Donation>;

    // =========================================================================
    // Withdrawal Operations
    // =========================================================================

    /// Create an unpaid withdrawal reserving `amount` sats.
    async fn create_withdrawal(&self, donator_id: DonatorId, amount: Satoshi)
        -> Result<Withdrawal>;

    /// Get a withdrawal by ID.
    async fn query_withdrawal(&self, id: WithdrawalId) -> Result<Option<Withdrawal>>;

    /// Start a withdrawal payout.
    ///
    /// Guarded update requiring `paid_at IS NULL AND amount <= reserved`;
    /// zero rows → [`StoreError::NotFound`]. Debits the donator by
    /// `amount + ceil(fee_msat / 1000)`, also guarded. Returns the new
    /// donator balance.
    async fn start_withdraw(
        &self,
        id: WithdrawalId,
        amount: Satoshi,
        fee_msat: MilliSatoshi,
    ) -> Result<Satoshi>;

    /// Reconcile the fee reserve once the actual routing fee is known,
    /// refunding the unused part to the donator.
    async fn finish_withdraw(&self, id: WithdrawalId, fee_msat: MilliSatoshi) -> Result<()>;

    // =========================================================================
    // Notification Bus
    // =========================================================================

    /// Publish a notification on an exact topic string.
    async fn notify(&self, topic: &str, payload: &Notification) -> Result<()>;

    /// Subscribe to an exact topic string.
    fn subscribe(&self, topic: &str) -> Subscription;

    /// Publish an object-changed notification on `"{kind}:{id}"`.
    async fn object_changed(&self, kind: &str, id: Uuid) -> Result<()> {
        self.notify(&object_topic(kind, id), &Notification::ok(id))
            .await
    }
}
