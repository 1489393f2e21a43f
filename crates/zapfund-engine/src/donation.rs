//! The donation engine.
//!
//! Orchestrates the four donation flows over the ledger, the payment
//! backend and the social directory:
//!
//! - **inbound**: issue an invoice, settle when the backend reports it paid;
//! - **internal**: settle immediately from the donator's balance;
//! - **outbound**: pay the receiver's lightning address from the donator's
//!   balance;
//! - **passthrough**: hand the receiver's invoice to the donator's own
//!   wallet and record the settlement once the payer proves it.
//!
//! The choice is derived, never requested: a donation settles from balance
//! exactly when the target is not the donator themselves and the donator's
//! available balance covers the amount.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use zapfund_core::{
    Donation, DonationId, DonationTarget, Donator, MilliSatoshi, PaymentRequest, RequestHash,
    Satoshi, SocialAccount, SocialPlatform,
};
use zapfund_store::{DonationSelector, Ledger, SettleOutcome, StoreError};

use crate::backend::{InvoiceStatus, PaymentBackend};
use crate::config::EngineConfig;
use crate::directory::SocialDirectory;
use crate::error::{EngineError, Result};

/// A donation target as named by the caller, before ledger resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DonateTarget {
    /// Another donator's balance. Targeting oneself fulfills one's own
    /// balance and always goes through an invoice.
    Donator(zapfund_core::DonatorId),

    /// A social account named by its platform-specific external reference.
    Social {
        /// The platform.
        platform: SocialPlatform,
        /// Channel ID, handle or login.
        external_id: String,
    },

    /// A specific YouTube video; the value lands on the channel, the video
    /// keeps its own lifetime tally.
    YoutubeVideo {
        /// The channel's external ID.
        channel_external_id: String,
        /// The video's external ID.
        video_external_id: String,
    },
}

/// Result of initiating a donation.
#[derive(Debug, Clone)]
pub struct DonateOutcome {
    /// The donation row as stored; already settled for balance-funded flows.
    pub donation: Donation,

    /// Payment request the caller's wallet must pay, when the donation is
    /// not settled from balance.
    pub payment_request: Option<PaymentRequest>,
}

/// What a [`DonateTarget`] resolved to.
struct ResolvedTarget {
    target: DonationTarget,
    title: String,
    lightning_address: Option<String>,
    video_id: Option<zapfund_core::VideoId>,
}

/// Orchestrates donation creation, settlement and cancellation.
pub struct DonationEngine {
    ledger: Arc<dyn Ledger>,
    backend: Arc<dyn PaymentBackend>,
    directory: Arc<dyn SocialDirectory>,
    config: EngineConfig,
}

impl DonationEngine {
    /// Create an engine over its three dependencies.
    pub fn new(
        ledger: Arc<dyn Ledger>,
        backend: Arc<dyn PaymentBackend>,
        directory: Arc<dyn SocialDirectory>,
        config: EngineConfig,
    ) -> Self {
        Self {
            ledger,
            backend,
            directory,
            config,
        }
    }

    /// Initiate a donation of `amount` satoshis from `donator` to `target`.
    ///
    /// # Errors
    ///
    /// Returns a validation error for non-positive amounts, unknown targets
    /// and mismatched lightning-address invoices; storage and backend
    /// failures propagate.
    pub async fn donate(
        &self,
        donator: &Donator,
        target: DonateTarget,
        amount: Satoshi,
        message: Option<&str>,
    ) -> Result<DonateOutcome> {
        if amount <= 0 {
            return Err(EngineError::Validation(format!(
                "donation amount must be positive, got {amount}"
            )));
        }
        self.ledger.ensure_donator(donator).await?;
        let resolved = self.resolve_target(target).await?;

        let memo = format!("Tip for {} via zapfund", resolved.title);
        let comment = message.unwrap_or(&memo);
        let self_target = resolved.target == DonationTarget::Donator(donator.id);
        let use_balance =
            !self_target && self.ledger.available_balance(donator.id).await? >= amount;

        let mut donation = Donation::new(Some(donator.id), resolved.target, amount)
            .map_err(|e| EngineError::Validation(e.to_string()))?;
        donation.youtube_video_id = resolved.video_id;

        // Self-donations fund one's own balance; the receiver's payout
        // address only applies when someone else is paying them.
        let payout_address = resolved.lightning_address.filter(|_| !self_target);
        if let Some(address) = payout_address {
            return self
                .donate_to_address(donation, &address, comment, use_balance)
                .await;
        }

        if use_balance {
            self.ledger.create_donation(&donation).await?;
            let donation = self
                .settle(donation.id.into(), amount, Utc::now(), None, None)
                .await?;
            tracing::info!(donation_id = %donation.id, amount, "donation settled from balance");
            return Ok(DonateOutcome {
                donation,
                payment_request: None,
            });
        }

        let invoice = self
            .backend
            .create_invoice(&memo, amount, self.config.invoice_expiry)
            .await?;
        donation.r_hash = Some(invoice.r_hash);
        self.ledger.create_donation(&donation).await?;
        tracing::info!(donation_id = %donation.id, amount, "invoice issued for donation");
        Ok(DonateOutcome {
            donation,
            payment_request: Some(invoice.payment_request),
        })
    }

    /// Outbound and passthrough flows: the receiver is paid at an external
    /// lightning address.
    async fn donate_to_address(
        &self,
        mut donation: Donation,
        address: &str,
        comment: &str,
        use_balance: bool,
    ) -> Result<DonateOutcome> {
        let pay_req = self
            .backend
            .resolve_lightning_address(address, donation.amount, comment)
            .await?;
        let (r_hash, invoice_amount) = self.backend.decode_payment_request(&pay_req).await?;
        if invoice_amount != donation.amount {
            return Err(EngineError::Validation(format!(
                "lightning address {address} returned an invoice for {invoice_amount} sat, \
                 expected {}",
                donation.amount
            )));
        }
        donation.lightning_address = Some(address.to_string());

        if use_balance {
            donation.r_hash = Some(r_hash);
            self.ledger.create_donation(&donation).await?;
            // Pay first: the debit only lands once the payment is through.
            let payment = self.backend.pay_invoice(&pay_req).await?;
            let donation = self
                .settle(
                    donation.id.into(),
                    payment.amount,
                    payment.paid_at,
                    Some(payment.fee_msat),
                    Some(payment.paid_at),
                )
                .await?;
            tracing::info!(
                donation_id = %donation.id,
                amount = donation.amount,
                address,
                "donation paid out from balance"
            );
            Ok(DonateOutcome {
                donation,
                payment_request: None,
            })
        } else {
            // The donator's own wallet pays; remember the hash so the
            // settlement can be verified against its preimage.
            donation.transient_r_hash = Some(r_hash);
            self.ledger.create_donation(&donation).await?;
            Ok(DonateOutcome {
                payment_request: Some(pay_req),
                donation,
            })
        }
    }

    /// Settle a donation and claim it onward when the target has a
    /// verified owner.
    ///
    /// Idempotent: a repeated completion signal for the same donation is a
    /// no-op returning the already-settled row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] via storage when the selector
    /// matches nothing at all.
    pub async fn finish_donation(
        &self,
        selector: DonationSelector,
        amount: Satoshi,
        paid_at: DateTime<Utc>,
        fee_msat: Option<MilliSatoshi>,
        claimed_at: Option<DateTime<Utc>>,
    ) -> Result<Donation> {
        match self
            .ledger
            .donation_paid(selector, amount, paid_at, fee_msat, claimed_at)
            .await?
        {
            SettleOutcome::Settled(donation) => {
                self.auto_transfer(&donation).await;
                Ok(donation)
            }
            SettleOutcome::AlreadySettled => self
                .ledger
                .query_donation(selector)
                .await?
                .ok_or_else(|| {
                    EngineError::Store(StoreError::NotFound {
                        entity: "donation",
                        id: format!("{selector:?}"),
                    })
                }),
        }
    }

    /// Record a settlement the donator's own wallet performed, proven by
    /// the payment preimage.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the preimage does not hash to the
    /// donation's transient payment hash or the paid amount differs.
    pub async fn confirm_remote_payment(
        &self,
        donation_id: DonationId,
        preimage: &[u8],
        amount: Satoshi,
        fee_msat: Option<MilliSatoshi>,
    ) -> Result<Donation> {
        let donation = self
            .ledger
            .query_donation(donation_id.into())
            .await?
            .ok_or_else(|| {
                EngineError::Store(StoreError::NotFound {
                    entity: "donation",
                    id: donation_id.to_string(),
                })
            })?;
        let expected = donation.transient_r_hash.ok_or_else(|| {
            EngineError::Validation(format!(
                "donation {donation_id} was not initiated for a remote payment"
            ))
        })?;
        if RequestHash::from_preimage(preimage) != expected {
            return Err(EngineError::Validation(
                "preimage does not match the donation's payment hash".to_string(),
            ));
        }
        if amount != donation.amount {
            return Err(EngineError::Validation(format!(
                "paid amount {amount} sat differs from donation amount {}",
                donation.amount
            )));
        }
        let now = Utc::now();
        // The value never entered a local balance, so it arrives claimed.
        self.finish_donation(donation_id.into(), amount, now, fee_msat, Some(now))
            .await
    }

    /// Reconcile a donation against the node's view of its invoice.
    ///
    /// A poll-side safety net for settlements the subscription missed (a
    /// listener restart, a notification lost in transit). Settles the
    /// donation when the node reports its invoice paid; otherwise returns
    /// the stored row unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the donation does not exist.
    pub async fn refresh_donation(&self, donation_id: DonationId) -> Result<Donation> {
        let donation = self
            .ledger
            .query_donation(donation_id.into())
            .await?
            .ok_or_else(|| {
                EngineError::Store(StoreError::NotFound {
                    entity: "donation",
                    id: donation_id.to_string(),
                })
            })?;
        if donation.is_paid() || donation.is_cancelled() {
            return Ok(donation);
        }
        let Some(r_hash) = donation.r_hash else {
            return Ok(donation);
        };
        match self.backend.lookup_invoice(r_hash).await? {
            InvoiceStatus::Settled(settlement) => {
                tracing::info!(%donation_id, "invoice settled out of band, reconciling");
                self.finish_donation(
                    r_hash.into(),
                    settlement.amount,
                    settlement.settled_at,
                    None,
                    None,
                )
                .await
            }
            InvoiceStatus::Open | InvoiceStatus::Cancelled => Ok(donation),
        }
    }

    /// Cancel an unpaid or unclaimed donation on behalf of `donator_id`.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the requester did not initiate the
    /// donation; [`StoreError::UnableToCancelDonation`] when its lifecycle
    /// no longer allows cancelling.
    pub async fn cancel_donation(
        &self,
        donation_id: DonationId,
        donator_id: zapfund_core::DonatorId,
    ) -> Result<Donation> {
        let donation = self
            .ledger
            .query_donation(donation_id.into())
            .await?
            .ok_or_else(|| {
                EngineError::Store(StoreError::NotFound {
                    entity: "donation",
                    id: donation_id.to_string(),
                })
            })?;
        if donation.donator_id != Some(donator_id) {
            return Err(EngineError::Validation(
                "only the initiating donator may cancel a donation".to_string(),
            ));
        }

        let cancelled = self.ledger.cancel_donation(donation_id).await?;
        if let (Some(r_hash), None) = (cancelled.r_hash, cancelled.paid_at) {
            // Best effort; the invoice expires on its own if this fails.
            if let Err(error) = self.backend.cancel_invoice(r_hash).await {
                tracing::warn!(%donation_id, %error, "could not cancel invoice on the node");
            }
        }
        tracing::info!(%donation_id, "donation cancelled");
        Ok(cancelled)
    }

    /// Look up a social account by external reference, refreshing stale
    /// metadata from the directory.
    ///
    /// # Errors
    ///
    /// Returns a directory error when the account is unknown both locally
    /// and externally.
    pub async fn resolve_social_account(
        &self,
        platform: SocialPlatform,
        external_id: &str,
    ) -> Result<SocialAccount> {
        let cached = self
            .ledger
            .query_social_account_by_external_id(platform, external_id)
            .await?;
        let fresh_until = Utc::now()
            - chrono::Duration::from_std(self.config.account_refresh)
                .unwrap_or_else(|_| chrono::Duration::days(1));
        if let Some(account) = &cached {
            if account.last_fetched_at.is_some_and(|at| at > fresh_until) {
                return Ok(account.clone());
            }
        }

        match self.directory.fetch(platform, external_id).await {
            Ok(metadata) => Ok(self
                .ledger
                .save_social_account(platform, &metadata)
                .await?),
            Err(error) => {
                // A stale cache entry beats failing the donation.
                if let Some(account) = cached {
                    tracing::warn!(
                        %platform,
                        external_id,
                        %error,
                        "directory fetch failed, using cached account"
                    );
                    Ok(account)
                } else {
                    Err(error.into())
                }
            }
        }
    }

    async fn resolve_target(&self, target: DonateTarget) -> Result<ResolvedTarget> {
        match target {
            DonateTarget::Donator(id) => {
                let receiver = self.ledger.query_donator(id).await?.ok_or_else(|| {
                    EngineError::Validation(format!("unknown receiver donator {id}"))
                })?;
                Ok(ResolvedTarget {
                    target: DonationTarget::Donator(id),
                    title: receiver.name.unwrap_or_else(|| "anonymous".to_string()),
                    lightning_address: receiver.lightning_address,
                    video_id: None,
                })
            }
            DonateTarget::Social {
                platform,
                external_id,
            } => {
                let account = self.resolve_social_account(platform, &external_id).await?;
                Ok(ResolvedTarget {
                    target: DonationTarget::Social {
                        platform,
                        account_id: account.id,
                    },
                    title: account.title.unwrap_or(account.external_id),
                    lightning_address: None,
                    video_id: None,
                })
            }
            DonateTarget::YoutubeVideo {
                channel_external_id,
                video_external_id,
            } => {
                let channel = self
                    .resolve_social_account(SocialPlatform::Youtube, &channel_external_id)
                    .await?;
                let video_id = self
                    .ledger
                    .save_youtube_video(channel.id, &video_external_id, None)
                    .await?;
                Ok(ResolvedTarget {
                    target: DonationTarget::Social {
                        platform: SocialPlatform::Youtube,
                        account_id: channel.id,
                    },
                    title: channel.title.unwrap_or(channel.external_id),
                    lightning_address: None,
                    video_id: Some(video_id),
                })
            }
        }
    }

    async fn settle(
        &self,
        selector: DonationSelector,
        amount: Satoshi,
        paid_at: DateTime<Utc>,
        fee_msat: Option<MilliSatoshi>,
        claimed_at: Option<DateTime<Utc>>,
    ) -> Result<Donation> {
        match self
            .ledger
            .donation_paid(selector, amount, paid_at, fee_msat, claimed_at)
            .await?
        {
            SettleOutcome::Settled(donation) => {
                self.auto_transfer(&donation).await;
                Ok(donation)
            }
            SettleOutcome::AlreadySettled => Err(EngineError::Store(StoreError::InvalidDbState(
                format!("freshly created donation {selector:?} was already settled"),
            ))),
        }
    }

    /// Claim a just-settled donation straight through to the target
    /// account's verified owner, when it has one. Failure leaves the value
    /// claimable on the account, so it is logged and swallowed.
    async fn auto_transfer(&self, donation: &Donation) {
        if donation.claimed_at.is_some() {
            return;
        }
        let Some((platform, account_id)) = donation.social_target() else {
            return;
        };
        let account = match self.ledger.query_social_account(platform, account_id).await {
            Ok(Some(account)) => account,
            Ok(None) => return,
            Err(error) => {
                tracing::warn!(%platform, %account_id, %error, "owner lookup failed");
                return;
            }
        };
        let Some(owner_id) = account.owner_id.filter(|_| account.via_oauth) else {
            return;
        };
        match self
            .ledger
            .transfer_donations(platform, account_id, owner_id)
            .await
        {
            Ok(amount) => {
                tracing::info!(%platform, %account_id, %owner_id, amount, "auto-claimed donations");
            }
            Err(error) => {
                tracing::warn!(%platform, %account_id, %owner_id, %error, "auto-claim failed");
            }
        }
    }
}
