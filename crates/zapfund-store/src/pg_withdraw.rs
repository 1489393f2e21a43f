//! Withdrawal operations for the PostgreSQL backend.
//!
//! A withdrawal is created unpaid with a reserved amount; the payout marks
//! it paid and debits the donator by amount plus the fee reserve, rounded
//! up to whole satoshis. Once the actual routing fee is known the unused
//! reserve is refunded.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use zapfund_core::{
    msat_to_sat_ceil, DonatorId, MilliSatoshi, Satoshi, Withdrawal, WithdrawalId,
};

use crate::error::{Result, StoreError};
use crate::notify::{object_topic, Notification};
use crate::pg::notify_conn;

#[derive(sqlx::FromRow)]
struct WithdrawalRow {
    id: Uuid,
    donator_id: Uuid,
    amount: i64,
    fee_msat: Option<i64>,
    created_at: chrono::DateTime<Utc>,
    paid_at: Option<chrono::DateTime<Utc>>,
}

impl From<WithdrawalRow> for Withdrawal {
    fn from(row: WithdrawalRow) -> Self {
        Withdrawal {
            id: row.id.into(),
            donator_id: row.donator_id.into(),
            amount: row.amount,
            fee_msat: row.fee_msat,
            created_at: row.created_at,
            paid_at: row.paid_at,
        }
    }
}

pub(crate) async fn create_withdrawal(
    pool: &PgPool,
    donator_id: DonatorId,
    amount: Satoshi,
) -> Result<Withdrawal> {
    let row = sqlx::query_as::<_, WithdrawalRow>(
        "INSERT INTO withdrawal (id, donator_id, amount) VALUES ($1, $2, $3) \
         RETURNING id, donator_id, amount, fee_msat, created_at, paid_at",
    )
    .bind(WithdrawalId::generate().as_uuid())
    .bind(donator_id.as_uuid())
    .bind(amount)
    .fetch_one(pool)
    .await?;
    Ok(row.into())
}

pub(crate) async fn query_withdrawal(
    pool: &PgPool,
    id: WithdrawalId,
) -> Result<Option<Withdrawal>> {
    let row = sqlx::query_as::<_, WithdrawalRow>(
        "SELECT id, donator_id, amount, fee_msat, created_at, paid_at \
         FROM withdrawal WHERE id = $1",
    )
    .bind(id.as_uuid())
    .fetch_optional(pool)
    .await?;
    Ok(row.map(Into::into))
}

pub(crate) async fn start_withdraw(
    pool: &PgPool,
    id: WithdrawalId,
    amount: Satoshi,
    fee_msat: MilliSatoshi,
) -> Result<Satoshi> {
    let mut tx = pool.begin().await?;

    // One guarded update marks the withdrawal paid. Zero rows means the
    // withdrawal does not exist, was already paid, or requests more than was
    // reserved; all of those read as "no such pending withdrawal".
    let row: Option<(Uuid,)> = sqlx::query_as(
        "UPDATE withdrawal SET amount = $2, fee_msat = $3, paid_at = now() \
         WHERE id = $1 AND paid_at IS NULL AND amount >= $2 \
         RETURNING donator_id",
    )
    .bind(id.as_uuid())
    .bind(amount)
    .bind(fee_msat)
    .fetch_optional(&mut *tx)
    .await?;
    let Some((donator_id,)) = row else {
        return Err(StoreError::NotFound {
            entity: "withdrawal",
            id: id.to_string(),
        });
    };

    let debit = amount + msat_to_sat_ceil(fee_msat);
    let balance: Option<(Satoshi,)> = sqlx::query_as(
        "UPDATE donator SET balance = balance - $1 \
         WHERE id = $2 AND balance - $1 >= 0 \
         RETURNING balance",
    )
    .bind(debit)
    .bind(donator_id)
    .fetch_optional(&mut *tx)
    .await?;
    let Some((balance,)) = balance else {
        let current: Satoshi = sqlx::query_as::<_, (i64,)>(
            "SELECT balance FROM donator WHERE id = $1",
        )
        .bind(donator_id)
        .fetch_optional(&mut *tx)
        .await
        .ok()
        .flatten()
        .map_or(0, |(balance,)| balance);
        return Err(StoreError::NotEnoughBalance {
            balance: current,
            required: debit,
        });
    };

    notify_conn(
        &mut tx,
        &object_topic("withdrawal", id.into_uuid()),
        &Notification::ok(id.into_uuid()),
    )
    .await?;
    notify_conn(
        &mut tx,
        &object_topic("donator", donator_id),
        &Notification::ok(donator_id),
    )
    .await?;

    tx.commit().await?;
    tracing::info!(%id, amount, fee_msat, balance, "withdrawal started");
    Ok(balance)
}

pub(crate) async fn finish_withdraw(
    pool: &PgPool,
    id: WithdrawalId,
    fee_msat: MilliSatoshi,
) -> Result<()> {
    let mut tx = pool.begin().await?;

    let row: Option<(Uuid, Option<i64>)> = sqlx::query_as(
        "SELECT donator_id, fee_msat FROM withdrawal \
         WHERE id = $1 AND paid_at IS NOT NULL FOR UPDATE",
    )
    .bind(id.as_uuid())
    .fetch_optional(&mut *tx)
    .await?;
    let Some((donator_id, reserved_msat)) = row else {
        return Err(StoreError::NotFound {
            entity: "withdrawal",
            id: id.to_string(),
        });
    };

    let refund = msat_to_sat_ceil(reserved_msat.unwrap_or(0)) - msat_to_sat_ceil(fee_msat);
    if refund < 0 {
        tracing::warn!(%id, reserved_msat, fee_msat, "routing fee exceeded the reserve");
    }
    if refund > 0 {
        sqlx::query("UPDATE donator SET balance = balance + $1 WHERE id = $2")
            .bind(refund)
            .bind(donator_id)
            .execute(&mut *tx)
            .await?;
        notify_conn(
            &mut tx,
            &object_topic("donator", donator_id),
            &Notification::ok(donator_id),
        )
        .await?;
    }
    sqlx::query("UPDATE withdrawal SET fee_msat = $2 WHERE id = $1")
        .bind(id.as_uuid())
        .bind(fee_msat)
        .execute(&mut *tx)
        .await?;
    notify_conn(
        &mut tx,
        &object_topic("withdrawal", id.into_uuid()),
        &Notification::ok(id.into_uuid()),
    )
    .await?;

    tx.commit().await?;
    Ok(())
}
