//! PostgreSQL ledger backend.
//!
//! Every mutating operation opens one transaction, locks the rows it will
//! touch (`SELECT ... FOR UPDATE` or a guarded `UPDATE ... WHERE`
//! predicate) and commits or rolls back atomically. Notifications are
//! published with `pg_notify` inside the same transaction, so subscribers
//! observe them in commit order.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgListener, PgPool, PgPoolOptions};
use sqlx::PgConnection;
use tokio::sync::mpsc;
use uuid::Uuid;

use zapfund_core::{
    AccountMetadata, Donation, DonationId, Donator, DonatorId, MilliSatoshi, RequestHash, Satoshi,
    SocialAccount, SocialAccountId, SocialPlatform, VideoId, Withdrawal, WithdrawalId,
};

use crate::error::{map_db_err, Result, StoreError};
use crate::notify::{ListenControl, Notification, NotificationBroker, Subscription};
use crate::{pg_donations, pg_social, pg_withdraw, DonationFilter, DonationSelector, Ledger, SettleOutcome};

/// PostgreSQL-backed ledger.
pub struct PgLedger {
    pool: PgPool,
    broker: NotificationBroker,
}

impl PgLedger {
    /// Connect to the database and start the notification listener.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .connect(database_url)
            .await?;
        Ok(Self::with_pool(pool))
    }

    /// Wrap an existing pool, starting the notification listener.
    #[must_use]
    pub fn with_pool(pool: PgPool) -> Self {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let broker = NotificationBroker::new(Some(control_tx));
        tokio::spawn(listener_task(pool.clone(), broker.clone(), control_rx));
        Self { pool, broker }
    }

    /// Apply embedded schema migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.into()))
    }

    /// The underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Owns the dedicated LISTEN connection. Subscribe/unsubscribe requests
/// arrive over the control channel, so channel registration is serialized
/// with notification dispatch.
async fn listener_task(
    pool: PgPool,
    broker: NotificationBroker,
    mut control: mpsc::UnboundedReceiver<ListenControl>,
) {
    let mut listener = match PgListener::connect_with(&pool).await {
        Ok(listener) => listener,
        Err(error) => {
            tracing::error!(%error, "failed to open notification listener connection");
            return;
        }
    };
    loop {
        tokio::select! {
            msg = control.recv() => match msg {
                Some(ListenControl::Listen(topic)) => {
                    if let Err(error) = listener.listen(&topic).await {
                        tracing::error!(%error, topic, "LISTEN failed");
                    }
                }
                Some(ListenControl::Unlisten(topic)) => {
                    if let Err(error) = listener.unlisten(&topic).await {
                        tracing::warn!(%error, topic, "UNLISTEN failed");
                    }
                }
                None => break,
            },
            incoming = listener.recv() => match incoming {
                Ok(notification) => {
                    match serde_json::from_str::<Notification>(notification.payload()) {
                        Ok(payload) => broker.publish(notification.channel(), &payload),
                        Err(error) => tracing::error!(
                            %error,
                            channel = notification.channel(),
                            "undecodable notification payload",
                        ),
                    }
                }
                Err(error) => {
                    // The listener reconnects internally; log and keep going.
                    tracing::warn!(%error, "notification listener error");
                }
            },
        }
    }
}

/// Publish a notification within the current transaction.
pub(crate) async fn notify_conn(
    conn: &mut PgConnection,
    topic: &str,
    payload: &Notification,
) -> Result<()> {
    let json = serde_json::to_string(payload)
        .map_err(|e| StoreError::CorruptRow(format!("notification payload: {e}")))?;
    sqlx::query("SELECT pg_notify($1, $2)")
        .bind(topic)
        .bind(json)
        .execute(conn)
        .await?;
    Ok(())
}

// ============================================================================
// Row types
// ============================================================================

#[derive(sqlx::FromRow)]
pub(crate) struct DonationRow {
    pub id: Uuid,
    pub amount: i64,
    pub donator_id: Option<Uuid>,
    pub receiver_id: Option<Uuid>,
    pub youtube_channel_id: Option<Uuid>,
    pub youtube_video_id: Option<Uuid>,
    pub twitter_author_id: Option<Uuid>,
    pub github_user_id: Option<Uuid>,
    pub lightning_address: Option<String>,
    pub r_hash: Option<String>,
    pub transient_r_hash: Option<String>,
    pub fee_msat: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub claimed_at: Option<DateTime<Utc>>,
}

fn parse_hash(value: Option<String>) -> Result<Option<RequestHash>> {
    value
        .map(|s| RequestHash::from_base64(&s).map_err(|e| StoreError::CorruptRow(e.to_string())))
        .transpose()
}

impl TryFrom<DonationRow> for Donation {
    type Error = StoreError;

    fn try_from(row: DonationRow) -> Result<Self> {
        Ok(Donation {
            id: row.id.into(),
            amount: row.amount,
            donator_id: row.donator_id.map(Into::into),
            receiver_id: row.receiver_id.map(Into::into),
            youtube_channel_id: row.youtube_channel_id.map(Into::into),
            youtube_video_id: row.youtube_video_id.map(Into::into),
            twitter_author_id: row.twitter_author_id.map(Into::into),
            github_user_id: row.github_user_id.map(Into::into),
            lightning_address: row.lightning_address,
            r_hash: parse_hash(row.r_hash)?,
            transient_r_hash: parse_hash(row.transient_r_hash)?,
            fee_msat: row.fee_msat,
            created_at: row.created_at,
            paid_at: row.paid_at,
            cancelled_at: row.cancelled_at,
            claimed_at: row.claimed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct DonatorRow {
    id: Uuid,
    name: Option<String>,
    avatar_url: Option<String>,
    lightning_address: Option<String>,
    lnauth_pubkey: Option<String>,
    balance: i64,
}

impl From<DonatorRow> for Donator {
    fn from(row: DonatorRow) -> Self {
        Donator {
            id: row.id.into(),
            name: row.name,
            avatar_url: row.avatar_url,
            lightning_address: row.lightning_address,
            lnauth_pubkey: row.lnauth_pubkey,
            balance: row.balance,
        }
    }
}

// ============================================================================
// Ledger implementation
// ============================================================================

#[async_trait]
impl Ledger for PgLedger {
    async fn save_donator(&self, donator: &Donator) -> Result<()> {
        sqlx::query(
            "INSERT INTO donator (id, name, avatar_url, lightning_address, lnauth_pubkey) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (id) DO UPDATE SET \
                 name = EXCLUDED.name, \
                 avatar_url = EXCLUDED.avatar_url, \
                 lightning_address = EXCLUDED.lightning_address, \
                 lnauth_pubkey = EXCLUDED.lnauth_pubkey",
        )
        .bind(donator.id.as_uuid())
        .bind(&donator.name)
        .bind(&donator.avatar_url)
        .bind(&donator.lightning_address)
        .bind(&donator.lnauth_pubkey)
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;
        Ok(())
    }

    async fn ensure_donator(&self, donator: &Donator) -> Result<()> {
        sqlx::query(
            "INSERT INTO donator (id, name, avatar_url, lightning_address, lnauth_pubkey) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(donator.id.as_uuid())
        .bind(&donator.name)
        .bind(&donator.avatar_url)
        .bind(&donator.lightning_address)
        .bind(&donator.lnauth_pubkey)
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;
        Ok(())
    }

    async fn query_donator(&self, id: DonatorId) -> Result<Option<Donator>> {
        let row = sqlx::query_as::<_, DonatorRow>(
            "SELECT id, name, avatar_url, lightning_address, lnauth_pubkey, balance \
             FROM donator WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn available_balance(&self, id: DonatorId) -> Result<Satoshi> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT d.balance - COALESCE(( \
                 SELECT SUM(dn.amount) FROM donation dn \
                 WHERE dn.donator_id = d.id \
                   AND dn.paid_at IS NULL \
                   AND dn.cancelled_at IS NULL \
                   AND dn.lightning_address IS NOT NULL \
                   AND dn.r_hash IS NOT NULL \
             ), 0) \
             FROM donator d WHERE d.id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.map(|(balance,)| balance).ok_or(StoreError::NotFound {
            entity: "donator",
            id: id.to_string(),
        })
    }

    async fn is_connected(&self, id: DonatorId) -> Result<bool> {
        pg_social::is_connected(&self.pool, id).await
    }

    async fn save_social_account(
        &self,
        platform: SocialPlatform,
        metadata: &AccountMetadata,
    ) -> Result<SocialAccount> {
        pg_social::save_social_account(&self.pool, platform, metadata).await
    }

    async fn query_social_account(
        &self,
        platform: SocialPlatform,
        account_id: SocialAccountId,
    ) -> Result<Option<SocialAccount>> {
        pg_social::query_social_account(&self.pool, platform, account_id).await
    }

    async fn query_social_account_by_external_id(
        &self,
        platform: SocialPlatform,
        external_id: &str,
    ) -> Result<Option<SocialAccount>> {
        pg_social::query_social_account_by_external_id(&self.pool, platform, external_id).await
    }

    async fn link_social_account(
        &self,
        platform: SocialPlatform,
        account_id: SocialAccountId,
        donator: &Donator,
        via_oauth: bool,
    ) -> Result<bool> {
        pg_social::link_social_account(&self.pool, platform, account_id, donator, via_oauth).await
    }

    async fn unlink_social_account(
        &self,
        platform: SocialPlatform,
        account_id: SocialAccountId,
        donator_id: DonatorId,
    ) -> Result<()> {
        pg_social::unlink_social_account(&self.pool, platform, account_id, donator_id).await
    }

    async fn transfer_donations(
        &self,
        platform: SocialPlatform,
        account_id: SocialAccountId,
        donator_id: DonatorId,
    ) -> Result<Satoshi> {
        pg_social::transfer_donations(&self.pool, platform, account_id, donator_id).await
    }

    async fn save_youtube_video(
        &self,
        channel_id: SocialAccountId,
        external_video_id: &str,
        title: Option<&str>,
    ) -> Result<VideoId> {
        pg_social::save_youtube_video(&self.pool, channel_id, external_video_id, title).await
    }

    async fn create_donation(&self, donation: &Donation) -> Result<()> {
        pg_donations::create_donation(&self.pool, donation).await
    }

    async fn query_donation(&self, selector: DonationSelector) -> Result<Option<Donation>> {
        pg_donations::query_donation(&self.pool, selector).await
    }

    async fn query_donations(
        &self,
        filter: &DonationFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Donation>> {
        pg_donations::query_donations(&self.pool, filter, limit, offset).await
    }

    async fn donation_paid(
        &self,
        selector: DonationSelector,
        amount: Satoshi,
        paid_at: DateTime<Utc>,
        fee_msat: Option<MilliSatoshi>,
        claimed_at: Option<DateTime<Utc>>,
    ) -> Result<SettleOutcome> {
        pg_donations::donation_paid(&self.pool, selector, amount, paid_at, fee_msat, claimed_at)
            .await
    }

    async fn cancel_donation(&self, donation_id: DonationId) -> Result<Donation> {
        pg_donations::cancel_donation(&self.pool, donation_id).await
    }

    async fn create_withdrawal(
        &self,
        donator_id: DonatorId,
        amount: Satoshi,
    ) -> Result<Withdrawal> {
        pg_withdraw::create_withdrawal(&self.pool, donator_id, amount).await
    }

    async fn query_withdrawal(&self, id: WithdrawalId) -> Result<Option<Withdrawal>> {
        pg_withdraw::query_withdrawal(&self.pool, id).await
    }

    async fn start_withdraw(
        &self,
        id: WithdrawalId,
        amount: Satoshi,
        fee_msat: MilliSatoshi,
    ) -> Result<Satoshi> {
        pg_withdraw::start_withdraw(&self.pool, id, amount, fee_msat).await
    }

    async fn finish_withdraw(&self, id: WithdrawalId, fee_msat: MilliSatoshi) -> Result<()> {
        pg_withdraw::finish_withdraw(&self.pool, id, fee_msat).await
    }

    async fn notify(&self, topic: &str, payload: &Notification) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        notify_conn(&mut conn, topic, payload).await
    }

    fn subscribe(&self, topic: &str) -> Subscription {
        self.broker.subscribe(topic)
    }
}
