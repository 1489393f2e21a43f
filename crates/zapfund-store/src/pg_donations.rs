//! Donation operations for the PostgreSQL backend.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, QueryBuilder};

use zapfund_core::{Donation, DonationId, DonationTarget, Satoshi, SocialPlatform};

use crate::error::{map_db_err, Result, StoreError};
use crate::notify::{object_topic, Notification};
use crate::pg::{notify_conn, DonationRow};
use crate::{DonationFilter, DonationSelector, SettleOutcome};

const DONATION_COLUMNS: &str = "id, amount, donator_id, receiver_id, youtube_channel_id, \
     youtube_video_id, twitter_author_id, github_user_id, lightning_address, r_hash, \
     transient_r_hash, fee_msat, created_at, paid_at, cancelled_at, claimed_at";

pub(crate) async fn create_donation(pool: &PgPool, donation: &Donation) -> Result<()> {
    sqlx::query(
        "INSERT INTO donation (id, amount, donator_id, receiver_id, youtube_channel_id, \
             youtube_video_id, twitter_author_id, github_user_id, lightning_address, r_hash, \
             transient_r_hash, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
    )
    .bind(donation.id.as_uuid())
    .bind(donation.amount)
    .bind(donation.donator_id.map(Into::<uuid::Uuid>::into))
    .bind(donation.receiver_id.map(Into::<uuid::Uuid>::into))
    .bind(donation.youtube_channel_id.map(Into::<uuid::Uuid>::into))
    .bind(donation.youtube_video_id.map(Into::<uuid::Uuid>::into))
    .bind(donation.twitter_author_id.map(Into::<uuid::Uuid>::into))
    .bind(donation.github_user_id.map(Into::<uuid::Uuid>::into))
    .bind(&donation.lightning_address)
    .bind(donation.r_hash.map(|h| h.as_base64()))
    .bind(donation.transient_r_hash.map(|h| h.as_base64()))
    .bind(donation.created_at)
    .execute(pool)
    .await
    .map_err(map_db_err)?;
    Ok(())
}

pub(crate) async fn query_donation(
    pool: &PgPool,
    selector: DonationSelector,
) -> Result<Option<Donation>> {
    let row = match selector {
        DonationSelector::ById(id) => {
            sqlx::query_as::<_, DonationRow>(&format!(
                "SELECT {DONATION_COLUMNS} FROM donation WHERE id = $1"
            ))
            .bind(id.as_uuid())
            .fetch_optional(pool)
            .await?
        }
        DonationSelector::ByRHash(r_hash) => {
            sqlx::query_as::<_, DonationRow>(&format!(
                "SELECT {DONATION_COLUMNS} FROM donation WHERE r_hash = $1"
            ))
            .bind(r_hash.as_base64())
            .fetch_optional(pool)
            .await?
        }
    };
    row.map(TryInto::try_into).transpose()
}

pub(crate) async fn query_donations(
    pool: &PgPool,
    filter: &DonationFilter,
    limit: i64,
    offset: i64,
) -> Result<Vec<Donation>> {
    let mut query =
        QueryBuilder::new(format!("SELECT {DONATION_COLUMNS} FROM donation WHERE TRUE"));
    if let Some(donator_id) = filter.donator_id {
        query.push(" AND donator_id = ");
        query.push_bind(donator_id.into_uuid());
    }
    if let Some(receiver_id) = filter.receiver_id {
        query.push(" AND receiver_id = ");
        query.push_bind(receiver_id.into_uuid());
    }
    if let Some((platform, account_id)) = filter.social {
        query.push(format!(" AND {} = ", platform.account_column()));
        query.push_bind(account_id.into_uuid());
    }
    if filter.only_paid {
        query.push(" AND paid_at IS NOT NULL");
    }
    if !filter.include_cancelled {
        query.push(" AND cancelled_at IS NULL");
    }
    query.push(" ORDER BY COALESCE(paid_at, created_at) DESC LIMIT ");
    query.push_bind(limit);
    query.push(" OFFSET ");
    query.push_bind(offset);

    let rows: Vec<DonationRow> = query.build_query_as().fetch_all(pool).await?;
    rows.into_iter().map(TryInto::try_into).collect()
}

pub(crate) async fn donation_paid(
    pool: &PgPool,
    selector: DonationSelector,
    amount: Satoshi,
    paid_at: DateTime<Utc>,
    fee_msat: Option<i64>,
    claimed_at: Option<DateTime<Utc>>,
) -> Result<SettleOutcome> {
    let mut tx = pool.begin().await?;

    // The paid_at IS NULL predicate makes settlement at-most-once: a second
    // completion signal matches zero rows and falls through to the no-op arm.
    let row = match selector {
        DonationSelector::ById(id) => {
            sqlx::query_as::<_, DonationRow>(&format!(
                "UPDATE donation \
                 SET amount = $2, paid_at = $3, fee_msat = $4, claimed_at = $5 \
                 WHERE id = $1 AND paid_at IS NULL \
                 RETURNING {DONATION_COLUMNS}"
            ))
            .bind(id.as_uuid())
            .bind(amount)
            .bind(paid_at)
            .bind(fee_msat)
            .bind(claimed_at)
            .fetch_optional(&mut *tx)
            .await?
        }
        DonationSelector::ByRHash(r_hash) => {
            sqlx::query_as::<_, DonationRow>(&format!(
                "UPDATE donation \
                 SET amount = $2, paid_at = $3, fee_msat = $4, claimed_at = $5 \
                 WHERE r_hash = $1 AND paid_at IS NULL \
                 RETURNING {DONATION_COLUMNS}"
            ))
            .bind(r_hash.as_base64())
            .bind(amount)
            .bind(paid_at)
            .bind(fee_msat)
            .bind(claimed_at)
            .fetch_optional(&mut *tx)
            .await?
        }
    };

    let Some(row) = row else {
        tracing::debug!(?selector, "donation was already settled, skipping");
        return Ok(SettleOutcome::AlreadySettled);
    };
    let donation: Donation = row.try_into()?;

    update_balance_for_donation(&mut tx, &donation, donation.amount).await?;
    notify_conn(
        &mut tx,
        &object_topic("donation", donation.id.into_uuid()),
        &Notification::ok(donation.id.into_uuid()),
    )
    .await?;

    tx.commit().await?;
    Ok(SettleOutcome::Settled(donation))
}

pub(crate) async fn cancel_donation(pool: &PgPool, donation_id: DonationId) -> Result<Donation> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query_as::<_, DonationRow>(&format!(
        "UPDATE donation SET cancelled_at = now() \
         WHERE id = $1 AND claimed_at IS NULL AND cancelled_at IS NULL \
         RETURNING {DONATION_COLUMNS}"
    ))
    .bind(donation_id.as_uuid())
    .fetch_optional(&mut *tx)
    .await?;

    let Some(row) = row else {
        return Err(StoreError::UnableToCancelDonation(donation_id));
    };
    let donation: Donation = row.try_into()?;

    if donation.paid_at.is_some() {
        // Reverse the settlement by replaying it with a negated amount.
        update_balance_for_donation(&mut tx, &donation, -donation.amount).await?;
    }
    notify_conn(
        &mut tx,
        &object_topic("donation", donation_id.into_uuid()),
        &Notification::ok(donation_id.into_uuid()),
    )
    .await?;

    tx.commit().await?;
    Ok(donation)
}

/// Apply the balance effect of a settled donation (or its reversal when
/// `amount` is negative), per the donation's direction:
///
/// | r_hash | lightning_address | effect                          |
/// |--------|-------------------|---------------------------------|
/// | null   | set               | target credit only (passthrough)|
/// | null   | null              | credit target, debit donator    |
/// | set    | null              | credit target only              |
/// | set    | set               | debit donator only              |
///
/// The target credit applies `total_donated` unconditionally and `balance`
/// only while the donation is unclaimed. Every balance write is guarded to
/// never go negative; a failed guard raises `NotEnoughBalance` and the
/// caller's transaction rolls back.
async fn update_balance_for_donation(
    conn: &mut PgConnection,
    donation: &Donation,
    amount: Satoshi,
) -> Result<()> {
    let target = donation
        .target()
        .map_err(|e| StoreError::InvalidDbState(e.to_string()))?;

    match target {
        DonationTarget::Social {
            platform,
            account_id,
        } => {
            let table = platform.account_table();
            let sql = if donation.claimed_at.is_none() {
                format!(
                    "UPDATE {table} \
                     SET balance = balance + $1, total_donated = total_donated + $1 \
                     WHERE id = $2 AND balance + $1 >= 0"
                )
            } else {
                format!("UPDATE {table} SET total_donated = total_donated + $1 WHERE id = $2")
            };
            let updated = sqlx::query(&sql)
                .bind(amount)
                .bind(account_id.as_uuid())
                .execute(&mut *conn)
                .await?
                .rows_affected();
            if updated != 1 {
                return Err(not_enough_balance(conn, table, account_id.into_uuid(), amount).await);
            }
            if platform == SocialPlatform::Youtube {
                if let Some(video_id) = donation.youtube_video_id {
                    let video: Option<(String, i64)> = sqlx::query_as(
                        "UPDATE youtube_video SET total_donated = total_donated + $1 \
                         WHERE id = $2 RETURNING video_id, total_donated",
                    )
                    .bind(amount)
                    .bind(video_id.as_uuid())
                    .fetch_optional(&mut *conn)
                    .await?;
                    if let Some((vid, total_donated)) = video {
                        let notification = Notification::youtube_video(
                            video_id.into_uuid(),
                            vid.clone(),
                            total_donated,
                        );
                        notify_conn(
                            conn,
                            &object_topic("youtube-video", video_id.into_uuid()),
                            &notification,
                        )
                        .await?;
                        notify_conn(conn, &format!("youtube-video-by-vid:{vid}"), &notification)
                            .await?;
                    }
                }
            }
        }
        DonationTarget::Donator(receiver_id) => {
            if donation.claimed_at.is_none() {
                let updated = sqlx::query(
                    "UPDATE donator SET balance = balance + $1 \
                     WHERE id = $2 AND balance + $1 >= 0",
                )
                .bind(amount)
                .bind(receiver_id.as_uuid())
                .execute(&mut *conn)
                .await?
                .rows_affected();
                if updated != 1 {
                    return Err(
                        not_enough_balance(conn, "donator", receiver_id.into_uuid(), amount).await,
                    );
                }
            }
            notify_conn(
                conn,
                &object_topic("donator", receiver_id.into_uuid()),
                &Notification::ok(receiver_id.into_uuid()),
            )
            .await?;
        }
    }

    if donation.direction().debits_donator() {
        let donator_id = donation.donator_id.ok_or_else(|| {
            StoreError::InvalidDbState(format!(
                "balance-funded donation {} has no donator",
                donation.id
            ))
        })?;
        let updated = sqlx::query(
            "UPDATE donator SET balance = balance - $1 \
             WHERE id = $2 AND balance - $1 >= 0",
        )
        .bind(amount)
        .bind(donator_id.as_uuid())
        .execute(&mut *conn)
        .await?
        .rows_affected();
        if updated != 1 {
            return Err(not_enough_balance(conn, "donator", donator_id.into_uuid(), amount).await);
        }
    }
    Ok(())
}

/// Build the `NotEnoughBalance` error for a failed guard, reading the
/// current balance for the message (best effort; the transaction is about
/// to roll back anyway).
async fn not_enough_balance(
    conn: &mut PgConnection,
    table: &str,
    id: uuid::Uuid,
    required: Satoshi,
) -> StoreError {
    let balance: Satoshi = sqlx::query_as::<_, (i64,)>(&format!(
        "SELECT balance FROM {table} WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(conn)
    .await
    .ok()
    .flatten()
    .map_or(0, |(balance,)| balance);
    StoreError::NotEnoughBalance {
        balance,
        required: required.abs(),
    }
}
