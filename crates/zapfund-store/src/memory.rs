//! In-memory ledger backend.
//!
//! Mirrors the observable semantics of the PostgreSQL backend for engine
//! tests and property suites: one mutex plays the role of the transaction
//! serialization, and every mutating operation stages its changes on a
//! clone of the state, committing only on success. Notifications publish
//! after commit, like `pg_notify` delivering on transaction commit.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use zapfund_core::{
    msat_to_sat_ceil, AccountMetadata, Donation, DonationId, DonationTarget, Donator, DonatorId,
    MilliSatoshi, Satoshi, SocialAccount, SocialAccountId, SocialPlatform, Transfer, TransferId,
    VideoId, Withdrawal, WithdrawalId,
};

use crate::error::{Result, StoreError};
use crate::notify::{object_topic, Notification, NotificationBroker, Subscription};
use crate::{DonationFilter, DonationSelector, Ledger, SettleOutcome};

#[derive(Debug, Clone)]
struct VideoRecord {
    external_id: String,
    channel_id: SocialAccountId,
    title: Option<String>,
    total_donated: Satoshi,
}

#[derive(Debug, Clone, Default)]
struct State {
    donators: HashMap<DonatorId, Donator>,
    accounts: HashMap<(SocialPlatform, SocialAccountId), SocialAccount>,
    /// Link rows keyed by (platform, account, donator); value is `via_oauth`.
    links: HashMap<(SocialPlatform, SocialAccountId, DonatorId), bool>,
    videos: HashMap<VideoId, VideoRecord>,
    donations: HashMap<DonationId, Donation>,
    transfers: Vec<Transfer>,
    withdrawals: HashMap<WithdrawalId, Withdrawal>,
}

type Staged = Vec<(String, Notification)>;

impl State {
    fn oauth_owner(
        &self,
        platform: SocialPlatform,
        account_id: SocialAccountId,
    ) -> Option<DonatorId> {
        self.links.iter().find_map(|((p, a, d), via_oauth)| {
            (*p == platform && *a == account_id && *via_oauth).then_some(*d)
        })
    }

    fn account_with_owner(
        &self,
        platform: SocialPlatform,
        account_id: SocialAccountId,
    ) -> Option<SocialAccount> {
        let mut account = self.accounts.get(&(platform, account_id))?.clone();
        account.owner_id = self.oauth_owner(platform, account_id);
        account.via_oauth = account.owner_id.is_some();
        Some(account)
    }

    fn is_connected(&self, id: DonatorId) -> bool {
        let has_key = self
            .donators
            .get(&id)
            .is_some_and(Donator::has_auth_key);
        has_key
            || self
                .links
                .iter()
                .any(|((_, _, d), via_oauth)| *d == id && *via_oauth)
    }

    fn find_donation(&self, selector: DonationSelector) -> Option<&Donation> {
        match selector {
            DonationSelector::ById(id) => self.donations.get(&id),
            DonationSelector::ByRHash(r_hash) => self
                .donations
                .values()
                .find(|d| d.r_hash == Some(r_hash)),
        }
    }

    /// Guarded donator balance change; `delta` may be negative. A missing
    /// donator matches zero rows in the guarded SQL update, so it reports
    /// the same error as an overdraft.
    fn adjust_donator_balance(&mut self, id: DonatorId, delta: Satoshi) -> Result<Satoshi> {
        let Some(donator) = self.donators.get_mut(&id) else {
            return Err(StoreError::NotEnoughBalance {
                balance: 0,
                required: delta.abs(),
            });
        };
        if donator.balance + delta < 0 {
            return Err(StoreError::NotEnoughBalance {
                balance: donator.balance,
                required: delta.abs(),
            });
        }
        donator.balance += delta;
        Ok(donator.balance)
    }

    /// Balance effect of a settled donation, identical to the SQL version:
    /// credit the target (balance only while unclaimed, `total_donated`
    /// always), bump the video counter, debit the donator for
    /// balance-funded directions. `amount` is negated for reversals.
    fn apply_donation_balance(
        &mut self,
        donation: &Donation,
        amount: Satoshi,
        staged: &mut Staged,
    ) -> Result<()> {
        let target = donation
            .target()
            .map_err(|e| StoreError::InvalidDbState(e.to_string()))?;

        match target {
            DonationTarget::Social {
                platform,
                account_id,
            } => {
                let account = self
                    .accounts
                    .get_mut(&(platform, account_id))
                    .ok_or(StoreError::NotEnoughBalance {
                        balance: 0,
                        required: amount.abs(),
                    })?;
                if donation.claimed_at.is_none() {
                    if account.balance + amount < 0 {
                        return Err(StoreError::NotEnoughBalance {
                            balance: account.balance,
                            required: amount.abs(),
                        });
                    }
                    account.balance += amount;
                }
                account.total_donated += amount;
                if platform == SocialPlatform::Youtube {
                    if let Some(video_id) = donation.youtube_video_id {
                        if let Some(video) = self.videos.get_mut(&video_id) {
                            video.total_donated += amount;
                            let notification = Notification::youtube_video(
                                video_id.into_uuid(),
                                video.external_id.clone(),
                                video.total_donated,
                            );
                            staged.push((
                                object_topic("youtube-video", video_id.into_uuid()),
                                notification.clone(),
                            ));
                            staged.push((
                                format!("youtube-video-by-vid:{}", video.external_id),
                                notification,
                            ));
                        }
                    }
                }
            }
            DonationTarget::Donator(receiver_id) => {
                if donation.claimed_at.is_none() {
                    self.adjust_donator_balance(receiver_id, amount)?;
                }
                staged.push((
                    object_topic("donator", receiver_id.into_uuid()),
                    Notification::ok(receiver_id.into_uuid()),
                ));
            }
        }

        if donation.direction().debits_donator() {
            let donator_id = donation.donator_id.ok_or_else(|| {
                StoreError::InvalidDbState(format!(
                    "balance-funded donation {} has no donator",
                    donation.id
                ))
            })?;
            self.adjust_donator_balance(donator_id, -amount)?;
        }
        Ok(())
    }
}

/// In-memory [`Ledger`] backend.
pub struct MemoryLedger {
    state: Mutex<State>,
    broker: NotificationBroker,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            broker: NotificationBroker::in_process(),
        }
    }

    /// Stage a mutation on a clone of the state; commit and publish staged
    /// notifications only if it succeeds.
    async fn mutate<T>(
        &self,
        op: impl FnOnce(&mut State, &mut Staged) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.state.lock().await;
        let mut next = guard.clone();
        let mut staged = Staged::new();
        let value = op(&mut next, &mut staged)?;
        *guard = next;
        drop(guard);
        for (topic, notification) in staged {
            self.broker.publish(&topic, &notification);
        }
        Ok(value)
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn save_donator(&self, donator: &Donator) -> Result<()> {
        self.mutate(|state, _| {
            // Balance is ledger-owned: preserved on update, zero on insert.
            let balance = state.donators.get(&donator.id).map_or(0, |d| d.balance);
            let mut row = donator.clone();
            row.balance = balance;
            state.donators.insert(donator.id, row);
            Ok(())
        })
        .await
    }

    async fn ensure_donator(&self, donator: &Donator) -> Result<()> {
        self.mutate(|state, _| {
            state.donators.entry(donator.id).or_insert_with(|| {
                let mut row = donator.clone();
                row.balance = 0;
                row
            });
            Ok(())
        })
        .await
    }

    async fn query_donator(&self, id: DonatorId) -> Result<Option<Donator>> {
        Ok(self.state.lock().await.donators.get(&id).cloned())
    }

    async fn available_balance(&self, id: DonatorId) -> Result<Satoshi> {
        let state = self.state.lock().await;
        let donator = state.donators.get(&id).ok_or(StoreError::NotFound {
            entity: "donator",
            id: id.to_string(),
        })?;
        let reserved: Satoshi = state
            .donations
            .values()
            .filter(|d| {
                d.donator_id == Some(id)
                    && d.paid_at.is_none()
                    && d.cancelled_at.is_none()
                    && d.lightning_address.is_some()
                    && d.r_hash.is_some()
            })
            .map(|d| d.amount)
            .sum();
        Ok(donator.balance - reserved)
    }

    async fn is_connected(&self, id: DonatorId) -> Result<bool> {
        Ok(self.state.lock().await.is_connected(id))
    }

    async fn save_social_account(
        &self,
        platform: SocialPlatform,
        metadata: &AccountMetadata,
    ) -> Result<SocialAccount> {
        self.mutate(|state, _| {
            let existing = state
                .accounts
                .iter()
                .find(|((p, _), a)| *p == platform && a.external_id == metadata.external_id)
                .map(|((_, id), _)| *id);
            let id = match existing {
                Some(id) => {
                    let account = state
                        .accounts
                        .get_mut(&(platform, id))
                        .ok_or(StoreError::InvalidDbState("account vanished".into()))?;
                    account.title = Some(metadata.title.clone());
                    if metadata.thumbnail_url.is_some() {
                        account.thumbnail_url = metadata.thumbnail_url.clone();
                    }
                    account.last_fetched_at = Some(Utc::now());
                    id
                }
                None => {
                    let id = SocialAccountId::generate();
                    state.accounts.insert(
                        (platform, id),
                        SocialAccount {
                            id,
                            platform,
                            external_id: metadata.external_id.clone(),
                            title: Some(metadata.title.clone()),
                            thumbnail_url: metadata.thumbnail_url.clone(),
                            balance: 0,
                            total_donated: 0,
                            last_fetched_at: Some(Utc::now()),
                            owner_id: None,
                            via_oauth: false,
                        },
                    );
                    id
                }
            };
            state
                .account_with_owner(platform, id)
                .ok_or(StoreError::NotFound {
                    entity: platform.account_table(),
                    id: id.to_string(),
                })
        })
        .await
    }

    async fn query_social_account(
        &self,
        platform: SocialPlatform,
        account_id: SocialAccountId,
    ) -> Result<Option<SocialAccount>> {
        Ok(self
            .state
            .lock()
            .await
            .account_with_owner(platform, account_id))
    }

    async fn query_social_account_by_external_id(
        &self,
        platform: SocialPlatform,
        external_id: &str,
    ) -> Result<Option<SocialAccount>> {
        let state = self.state.lock().await;
        let id = state
            .accounts
            .iter()
            .find(|((p, _), a)| *p == platform && a.external_id == external_id)
            .map(|((_, id), _)| *id);
        Ok(id.and_then(|id| state.account_with_owner(platform, id)))
    }

    async fn link_social_account(
        &self,
        platform: SocialPlatform,
        account_id: SocialAccountId,
        donator: &Donator,
        via_oauth: bool,
    ) -> Result<bool> {
        self.mutate(|state, staged| {
            if !state.accounts.contains_key(&(platform, account_id)) {
                return Err(StoreError::NotFound {
                    entity: platform.account_table(),
                    id: account_id.to_string(),
                });
            }
            state.donators.entry(donator.id).or_insert_with(|| {
                let mut row = donator.clone();
                row.balance = 0;
                row
            });
            // At most one OAuth owner per account.
            if via_oauth {
                if let Some(owner) = state.oauth_owner(platform, account_id) {
                    if owner != donator.id {
                        return Err(StoreError::Conflict(format!(
                            "{} {account_id} already has a verified owner",
                            platform.account_table()
                        )));
                    }
                }
            }
            let key = (platform, account_id, donator.id);
            let changed = match state.links.get(&key) {
                None => {
                    state.links.insert(key, via_oauth);
                    true
                }
                // Merge with OR: never downgrade a verified link.
                Some(false) if via_oauth => {
                    state.links.insert(key, true);
                    true
                }
                Some(_) => false,
            };
            if changed {
                staged.push((
                    object_topic(platform.name(), account_id.into_uuid()),
                    Notification::ok(account_id.into_uuid()),
                ));
            }
            Ok(changed)
        })
        .await
    }

    async fn unlink_social_account(
        &self,
        platform: SocialPlatform,
        account_id: SocialAccountId,
        donator_id: DonatorId,
    ) -> Result<()> {
        self.mutate(|state, _| {
            state.links.remove(&(platform, account_id, donator_id));
            let balance = state
                .donators
                .get(&donator_id)
                .ok_or(StoreError::NotFound {
                    entity: "donator",
                    id: donator_id.to_string(),
                })?
                .balance;
            if balance > 0 && !state.is_connected(donator_id) {
                return Err(StoreError::Validation(format!(
                    "unlinking would leave donator {donator_id} with {balance} unwithdrawable sats"
                )));
            }
            Ok(())
        })
        .await
    }

    async fn transfer_donations(
        &self,
        platform: SocialPlatform,
        account_id: SocialAccountId,
        donator_id: DonatorId,
    ) -> Result<Satoshi> {
        self.mutate(|state, staged| {
            let amount = state
                .accounts
                .get(&(platform, account_id))
                .ok_or(StoreError::NotFound {
                    entity: platform.account_table(),
                    id: account_id.to_string(),
                })?
                .balance;
            let claimable: Satoshi = state
                .donations
                .values()
                .filter(|d| d.social_target() == Some((platform, account_id)) && d.is_claimable())
                .map(|d| d.amount)
                .sum();
            if claimable != amount {
                return Err(StoreError::InvalidDbState(format!(
                    "{} {account_id}: balance {amount} != claimable donation sum {claimable}",
                    platform.account_table()
                )));
            }
            if amount == 0 {
                return Ok(0);
            }
            if !state.donators.contains_key(&donator_id) {
                return Err(StoreError::NotFound {
                    entity: "donator",
                    id: donator_id.to_string(),
                });
            }

            let now = Utc::now();
            state.transfers.push(Transfer {
                id: TransferId::generate(),
                amount,
                donator_id,
                platform,
                account_id,
                created_at: now,
            });
            for donation in state.donations.values_mut() {
                if donation.social_target() == Some((platform, account_id))
                    && donation.is_claimable()
                {
                    donation.claimed_at = Some(now);
                }
            }
            if let Some(account) = state.accounts.get_mut(&(platform, account_id)) {
                account.balance = 0;
            }
            state.adjust_donator_balance(donator_id, amount)?;
            staged.push((
                object_topic("donator", donator_id.into_uuid()),
                Notification::ok(donator_id.into_uuid()),
            ));
            Ok(amount)
        })
        .await
    }

    async fn save_youtube_video(
        &self,
        channel_id: SocialAccountId,
        external_video_id: &str,
        title: Option<&str>,
    ) -> Result<VideoId> {
        self.mutate(|state, _| {
            let existing = state
                .videos
                .iter()
                .find(|(_, v)| v.external_id == external_video_id)
                .map(|(id, _)| *id);
            match existing {
                Some(id) => {
                    if let (Some(video), Some(title)) = (state.videos.get_mut(&id), title) {
                        video.title = Some(title.to_string());
                    }
                    Ok(id)
                }
                None => {
                    let id = VideoId::generate();
                    state.videos.insert(
                        id,
                        VideoRecord {
                            external_id: external_video_id.to_string(),
                            channel_id,
                            title: title.map(ToString::to_string),
                            total_donated: 0,
                        },
                    );
                    Ok(id)
                }
            }
        })
        .await
    }

    async fn create_donation(&self, donation: &Donation) -> Result<()> {
        self.mutate(|state, _| {
            if state.donations.contains_key(&donation.id) {
                return Err(StoreError::Conflict(format!(
                    "donation {} already exists",
                    donation.id
                )));
            }
            if let Some(r_hash) = donation.r_hash {
                if state.donations.values().any(|d| d.r_hash == Some(r_hash)) {
                    return Err(StoreError::Conflict(format!(
                        "donation with r_hash {} already exists",
                        r_hash.as_hex()
                    )));
                }
            }
            state.donations.insert(donation.id, donation.clone());
            Ok(())
        })
        .await
    }

    async fn query_donation(&self, selector: DonationSelector) -> Result<Option<Donation>> {
        Ok(self.state.lock().await.find_donation(selector).cloned())
    }

    async fn query_donations(
        &self,
        filter: &DonationFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Donation>> {
        let state = self.state.lock().await;
        let mut matches: Vec<Donation> = state
            .donations
            .values()
            .filter(|d| {
                filter.donator_id.map_or(true, |id| d.donator_id == Some(id))
                    && filter
                        .receiver_id
                        .map_or(true, |id| d.receiver_id == Some(id))
                    && filter
                        .social
                        .map_or(true, |target| d.social_target() == Some(target))
                    && (!filter.only_paid || d.is_paid())
                    && (filter.include_cancelled || !d.is_cancelled())
            })
            .cloned()
            .collect();
        matches.sort_by_key(|d| std::cmp::Reverse(d.paid_at.unwrap_or(d.created_at)));
        let offset = usize::try_from(offset).unwrap_or(0);
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        Ok(matches.into_iter().skip(offset).take(limit).collect())
    }

    async fn donation_paid(
        &self,
        selector: DonationSelector,
        amount: Satoshi,
        paid_at: DateTime<Utc>,
        fee_msat: Option<MilliSatoshi>,
        claimed_at: Option<DateTime<Utc>>,
    ) -> Result<SettleOutcome> {
        self.mutate(|state, staged| {
            let Some(found) = state.find_donation(selector) else {
                tracing::debug!(?selector, "donation was already settled, skipping");
                return Ok(SettleOutcome::AlreadySettled);
            };
            if found.is_paid() {
                tracing::debug!(?selector, "donation was already settled, skipping");
                return Ok(SettleOutcome::AlreadySettled);
            }
            let id = found.id;
            let donation = {
                let entry = state
                    .donations
                    .get_mut(&id)
                    .ok_or(StoreError::InvalidDbState("donation vanished".into()))?;
                entry.amount = amount;
                entry.paid_at = Some(paid_at);
                entry.fee_msat = fee_msat;
                entry.claimed_at = claimed_at;
                entry.clone()
            };
            state.apply_donation_balance(&donation, donation.amount, staged)?;
            staged.push((
                object_topic("donation", id.into_uuid()),
                Notification::ok(id.into_uuid()),
            ));
            Ok(SettleOutcome::Settled(donation))
        })
        .await
    }

    async fn cancel_donation(&self, donation_id: DonationId) -> Result<Donation> {
        self.mutate(|state, staged| {
            let cancellable = state
                .donations
                .get(&donation_id)
                .is_some_and(|d| !d.is_claimed() && !d.is_cancelled());
            if !cancellable {
                return Err(StoreError::UnableToCancelDonation(donation_id));
            }
            let donation = {
                let entry = state
                    .donations
                    .get_mut(&donation_id)
                    .ok_or(StoreError::InvalidDbState("donation vanished".into()))?;
                entry.cancelled_at = Some(Utc::now());
                entry.clone()
            };
            if donation.is_paid() {
                state.apply_donation_balance(&donation, -donation.amount, staged)?;
            }
            staged.push((
                object_topic("donation", donation_id.into_uuid()),
                Notification::ok(donation_id.into_uuid()),
            ));
            Ok(donation)
        })
        .await
    }

    async fn create_withdrawal(
        &self,
        donator_id: DonatorId,
        amount: Satoshi,
    ) -> Result<Withdrawal> {
        self.mutate(|state, _| {
            if !state.donators.contains_key(&donator_id) {
                return Err(StoreError::NotFound {
                    entity: "donator",
                    id: donator_id.to_string(),
                });
            }
            let withdrawal = Withdrawal {
                id: WithdrawalId::generate(),
                donator_id,
                amount,
                fee_msat: None,
                created_at: Utc::now(),
                paid_at: None,
            };
            state.withdrawals.insert(withdrawal.id, withdrawal.clone());
            Ok(withdrawal)
        })
        .await
    }

    async fn query_withdrawal(&self, id: WithdrawalId) -> Result<Option<Withdrawal>> {
        Ok(self.state.lock().await.withdrawals.get(&id).cloned())
    }

    async fn start_withdraw(
        &self,
        id: WithdrawalId,
        amount: Satoshi,
        fee_msat: MilliSatoshi,
    ) -> Result<Satoshi> {
        self.mutate(|state, staged| {
            let startable = state
                .withdrawals
                .get(&id)
                .is_some_and(|w| !w.is_paid() && w.amount >= amount);
            if !startable {
                return Err(StoreError::NotFound {
                    entity: "withdrawal",
                    id: id.to_string(),
                });
            }
            let donator_id = {
                let withdrawal = state
                    .withdrawals
                    .get_mut(&id)
                    .ok_or(StoreError::InvalidDbState("withdrawal vanished".into()))?;
                withdrawal.amount = amount;
                withdrawal.fee_msat = Some(fee_msat);
                withdrawal.paid_at = Some(Utc::now());
                withdrawal.donator_id
            };
            let debit = amount + msat_to_sat_ceil(fee_msat);
            let balance = state.adjust_donator_balance(donator_id, -debit)?;
            staged.push((
                object_topic("withdrawal", id.into_uuid()),
                Notification::ok(id.into_uuid()),
            ));
            staged.push((
                object_topic("donator", donator_id.into_uuid()),
                Notification::ok(donator_id.into_uuid()),
            ));
            Ok(balance)
        })
        .await
    }

    async fn finish_withdraw(&self, id: WithdrawalId, fee_msat: MilliSatoshi) -> Result<()> {
        self.mutate(|state, staged| {
            let (donator_id, reserved_msat) = state
                .withdrawals
                .get(&id)
                .filter(|w| w.is_paid())
                .map(|w| (w.donator_id, w.fee_msat))
                .ok_or(StoreError::NotFound {
                    entity: "withdrawal",
                    id: id.to_string(),
                })?;
            let refund = msat_to_sat_ceil(reserved_msat.unwrap_or(0)) - msat_to_sat_ceil(fee_msat);
            if refund < 0 {
                tracing::warn!(%id, reserved_msat, fee_msat, "routing fee exceeded the reserve");
            }
            if refund > 0 {
                state.adjust_donator_balance(donator_id, refund)?;
                staged.push((
                    object_topic("donator", donator_id.into_uuid()),
                    Notification::ok(donator_id.into_uuid()),
                ));
            }
            if let Some(withdrawal) = state.withdrawals.get_mut(&id) {
                withdrawal.fee_msat = Some(fee_msat);
            }
            staged.push((
                object_topic("withdrawal", id.into_uuid()),
                Notification::ok(id.into_uuid()),
            ));
            Ok(())
        })
        .await
    }

    async fn notify(&self, topic: &str, payload: &Notification) -> Result<()> {
        self.broker.publish(topic, payload);
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Subscription {
        self.broker.subscribe(topic)
    }
}
