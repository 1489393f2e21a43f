//! Social account operations for the PostgreSQL backend.
//!
//! All queries are built from the [`SocialPlatform`] registry, so the three
//! platforms share one implementation. Table and column names come from the
//! enum, never from user input.

use chrono::Utc;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use zapfund_core::{
    AccountMetadata, Donator, DonatorId, Satoshi, SocialAccount, SocialAccountId, SocialPlatform,
    TransferId, VideoId,
};

use crate::error::{map_db_err, Result, StoreError};
use crate::notify::{object_topic, Notification};
use crate::pg::notify_conn;

#[derive(sqlx::FromRow)]
struct SocialAccountRow {
    id: Uuid,
    external_id: String,
    title: Option<String>,
    thumbnail_url: Option<String>,
    balance: i64,
    total_donated: i64,
    last_fetched_at: Option<chrono::DateTime<Utc>>,
    owner_id: Option<Uuid>,
}

impl SocialAccountRow {
    fn into_account(self, platform: SocialPlatform) -> SocialAccount {
        SocialAccount {
            id: self.id.into(),
            platform,
            external_id: self.external_id,
            title: self.title,
            thumbnail_url: self.thumbnail_url,
            balance: self.balance,
            total_donated: self.total_donated,
            last_fetched_at: self.last_fetched_at,
            via_oauth: self.owner_id.is_some(),
            owner_id: self.owner_id.map(Into::into),
        }
    }
}

/// SELECT clause joining the account row with its OAuth-verified owner link.
fn account_select(platform: SocialPlatform) -> String {
    format!(
        "SELECT a.id, a.{external} AS external_id, a.title, a.thumbnail_url, \
                a.balance, a.total_donated, a.last_fetched_at, l.donator_id AS owner_id \
         FROM {table} a \
         LEFT JOIN {link} l ON l.{account} = a.id AND l.via_oauth",
        external = platform.external_id_column(),
        table = platform.account_table(),
        link = platform.link_table(),
        account = platform.account_column(),
    )
}

pub(crate) async fn is_connected(pool: &PgPool, id: DonatorId) -> Result<bool> {
    let mut conn = pool.acquire().await?;
    is_connected_conn(&mut conn, id).await
}

async fn is_connected_conn(conn: &mut PgConnection, id: DonatorId) -> Result<bool> {
    let (connected,): (bool,) = sqlx::query_as(
        "SELECT EXISTS (SELECT 1 FROM donator WHERE id = $1 AND lnauth_pubkey IS NOT NULL) \
             OR EXISTS (SELECT 1 FROM youtube_channel_link \
                        WHERE donator_id = $1 AND via_oauth) \
             OR EXISTS (SELECT 1 FROM twitter_author_link \
                        WHERE donator_id = $1 AND via_oauth) \
             OR EXISTS (SELECT 1 FROM github_user_link \
                        WHERE donator_id = $1 AND via_oauth)",
    )
    .bind(id.as_uuid())
    .fetch_one(conn)
    .await?;
    Ok(connected)
}

pub(crate) async fn save_social_account(
    pool: &PgPool,
    platform: SocialPlatform,
    metadata: &AccountMetadata,
) -> Result<SocialAccount> {
    let (id,): (Uuid,) = sqlx::query_as(&format!(
        "INSERT INTO {table} (id, {external}, title, thumbnail_url, last_fetched_at) \
         VALUES ($1, $2, $3, $4, now()) \
         ON CONFLICT ({external}) DO UPDATE SET \
             title = EXCLUDED.title, \
             thumbnail_url = COALESCE(EXCLUDED.thumbnail_url, {table}.thumbnail_url), \
             last_fetched_at = EXCLUDED.last_fetched_at \
         RETURNING id",
        table = platform.account_table(),
        external = platform.external_id_column(),
    ))
    .bind(Uuid::new_v4())
    .bind(&metadata.external_id)
    .bind(&metadata.title)
    .bind(&metadata.thumbnail_url)
    .fetch_one(pool)
    .await
    .map_err(map_db_err)?;

    query_social_account(pool, platform, id.into())
        .await?
        .ok_or(StoreError::NotFound {
            entity: platform.account_table(),
            id: id.to_string(),
        })
}

pub(crate) async fn query_social_account(
    pool: &PgPool,
    platform: SocialPlatform,
    account_id: SocialAccountId,
) -> Result<Option<SocialAccount>> {
    let row = sqlx::query_as::<_, SocialAccountRow>(&format!(
        "{} WHERE a.id = $1",
        account_select(platform)
    ))
    .bind(account_id.as_uuid())
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|row| row.into_account(platform)))
}

pub(crate) async fn query_social_account_by_external_id(
    pool: &PgPool,
    platform: SocialPlatform,
    external_id: &str,
) -> Result<Option<SocialAccount>> {
    let row = sqlx::query_as::<_, SocialAccountRow>(&format!(
        "{} WHERE a.{} = $1",
        account_select(platform),
        platform.external_id_column(),
    ))
    .bind(external_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|row| row.into_account(platform)))
}

pub(crate) async fn link_social_account(
    pool: &PgPool,
    platform: SocialPlatform,
    account_id: SocialAccountId,
    donator: &Donator,
    via_oauth: bool,
) -> Result<bool> {
    let mut tx = pool.begin().await?;
    sqlx::query(
        "INSERT INTO donator (id, name, avatar_url, lightning_address, lnauth_pubkey) \
         VALUES ($1, $2, $3, $4, $5) ON CONFLICT (id) DO NOTHING",
    )
    .bind(donator.id.as_uuid())
    .bind(&donator.name)
    .bind(&donator.avatar_url)
    .bind(&donator.lightning_address)
    .bind(&donator.lnauth_pubkey)
    .execute(&mut *tx)
    .await
    .map_err(map_db_err)?;

    // Upsert merging via_oauth with OR; the conditional DO UPDATE makes a
    // no-op re-link report zero rows. The partial unique index rejects a
    // second OAuth owner (surfaces as Conflict).
    let changed = sqlx::query(&format!(
        "INSERT INTO {link} ({account}, donator_id, via_oauth) \
         VALUES ($1, $2, $3) \
         ON CONFLICT ({account}, donator_id) DO UPDATE SET via_oauth = TRUE \
         WHERE NOT {link}.via_oauth AND EXCLUDED.via_oauth",
        link = platform.link_table(),
        account = platform.account_column(),
    ))
    .bind(account_id.as_uuid())
    .bind(donator.id.as_uuid())
    .bind(via_oauth)
    .execute(&mut *tx)
    .await
    .map_err(map_db_err)?
    .rows_affected();

    if changed > 0 {
        notify_conn(
            &mut tx,
            &object_topic(platform.name(), account_id.into_uuid()),
            &Notification::ok(account_id.into_uuid()),
        )
        .await?;
    }
    tx.commit().await?;
    Ok(changed > 0)
}

pub(crate) async fn unlink_social_account(
    pool: &PgPool,
    platform: SocialPlatform,
    account_id: SocialAccountId,
    donator_id: DonatorId,
) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query(&format!(
        "DELETE FROM {link} WHERE {account} = $1 AND donator_id = $2",
        link = platform.link_table(),
        account = platform.account_column(),
    ))
    .bind(account_id.as_uuid())
    .bind(donator_id.as_uuid())
    .execute(&mut *tx)
    .await?;

    // Refuse to orphan a positive balance: after the unlink the donator must
    // still have some way to withdraw, or hold nothing.
    let (balance,): (Satoshi,) = sqlx::query_as("SELECT balance FROM donator WHERE id = $1")
        .bind(donator_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound {
            entity: "donator",
            id: donator_id.to_string(),
        })?;
    if balance > 0 && !is_connected_conn(&mut tx, donator_id).await? {
        return Err(StoreError::Validation(format!(
            "unlinking would leave donator {donator_id} with {balance} unwithdrawable sats"
        )));
    }
    tx.commit().await?;
    Ok(())
}

pub(crate) async fn transfer_donations(
    pool: &PgPool,
    platform: SocialPlatform,
    account_id: SocialAccountId,
    donator_id: DonatorId,
) -> Result<Satoshi> {
    let table = platform.account_table();
    let account_column = platform.account_column();
    let mut tx = pool.begin().await?;

    // Lock the account row so concurrent settlements and transfers serialize.
    let (amount,): (Satoshi,) = sqlx::query_as(&format!(
        "SELECT balance FROM {table} WHERE id = $1 FOR UPDATE"
    ))
    .bind(account_id.as_uuid())
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(StoreError::NotFound {
        entity: table,
        id: account_id.to_string(),
    })?;

    // Self-check: the stored balance must equal the sum of claimable
    // donations. A mismatch means corrupted accounting; mutate nothing.
    let (claimable,): (i64,) = sqlx::query_as(&format!(
        "SELECT COALESCE(SUM(amount), 0) FROM donation \
         WHERE {account_column} = $1 \
           AND paid_at IS NOT NULL AND claimed_at IS NULL AND cancelled_at IS NULL"
    ))
    .bind(account_id.as_uuid())
    .fetch_one(&mut *tx)
    .await?;
    if claimable != amount {
        return Err(StoreError::InvalidDbState(format!(
            "{table} {account_id}: balance {amount} != claimable donation sum {claimable}"
        )));
    }
    if amount == 0 {
        return Ok(0);
    }

    sqlx::query(&format!(
        "INSERT INTO transfer (id, amount, donator_id, {account_column}) \
         VALUES ($1, $2, $3, $4)"
    ))
    .bind(TransferId::generate().as_uuid())
    .bind(amount)
    .bind(donator_id.as_uuid())
    .bind(account_id.as_uuid())
    .execute(&mut *tx)
    .await?;

    sqlx::query(&format!(
        "UPDATE donation SET claimed_at = now() \
         WHERE {account_column} = $1 \
           AND paid_at IS NOT NULL AND claimed_at IS NULL AND cancelled_at IS NULL"
    ))
    .bind(account_id.as_uuid())
    .execute(&mut *tx)
    .await?;

    sqlx::query(&format!("UPDATE {table} SET balance = 0 WHERE id = $1"))
        .bind(account_id.as_uuid())
        .execute(&mut *tx)
        .await?;

    let credited = sqlx::query("UPDATE donator SET balance = balance + $1 WHERE id = $2")
        .bind(amount)
        .bind(donator_id.as_uuid())
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if credited != 1 {
        return Err(StoreError::NotFound {
            entity: "donator",
            id: donator_id.to_string(),
        });
    }

    notify_conn(
        &mut tx,
        &object_topic("donator", donator_id.into_uuid()),
        &Notification::ok(donator_id.into_uuid()),
    )
    .await?;

    tx.commit().await?;
    tracing::info!(%platform, %account_id, %donator_id, amount, "transferred donations");
    Ok(amount)
}

pub(crate) async fn save_youtube_video(
    pool: &PgPool,
    channel_id: SocialAccountId,
    external_video_id: &str,
    title: Option<&str>,
) -> Result<VideoId> {
    let (id,): (Uuid,) = sqlx::query_as(
        "INSERT INTO youtube_video (id, video_id, youtube_channel_id, title) \
         VALUES ($1, $2, $3, $4) \
         ON CONFLICT (video_id) DO UPDATE SET \
             title = COALESCE(EXCLUDED.title, youtube_video.title) \
         RETURNING id",
    )
    .bind(Uuid::new_v4())
    .bind(external_video_id)
    .bind(channel_id.as_uuid())
    .bind(title)
    .fetch_one(pool)
    .await
    .map_err(map_db_err)?;
    Ok(id.into())
}
