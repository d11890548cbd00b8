//! SQL access for product reservations.

use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::entities::{ProductReservation, ReservationStatus};

const RESERVATION_COLUMNS: &str = "id, transaction_id, product_id, status, quantity, \
     total_price, reserved_at, committed_at, canceled_at, expired_at, settled_at";

/// All reservations of one basket, row-locked when the caller intends to
/// transition them.
pub async fn find_many_by_transaction_id(
    conn: &mut PgConnection,
    transaction_id: Uuid,
    for_update: bool,
) -> Result<Vec<ProductReservation>, sqlx::Error> {
    let mut query = format!(
        "SELECT {RESERVATION_COLUMNS} FROM product_reservations \
         WHERE transaction_id = $1 ORDER BY product_id"
    );
    if for_update {
        query.push_str(" FOR UPDATE");
    }

    sqlx::query_as::<_, ProductReservation>(&query)
        .bind(transaction_id)
        .fetch_all(conn)
        .await
}

pub async fn insert(
    conn: &mut PgConnection,
    transaction_id: Uuid,
    product_id: Uuid,
    quantity: i64,
    total_price: i64,
) -> Result<ProductReservation, sqlx::Error> {
    sqlx::query_as::<_, ProductReservation>(&format!(
        "INSERT INTO product_reservations \
            (transaction_id, product_id, status, quantity, total_price, reserved_at) \
         VALUES ($1, $2, 'RESERVED', $3, $4, NOW()) \
         RETURNING {RESERVATION_COLUMNS}"
    ))
    .bind(transaction_id)
    .bind(product_id)
    .bind(quantity)
    .bind(total_price)
    .fetch_one(conn)
    .await
}

/// Move one reservation to `status`, stamping the matching timestamp column.
pub async fn update_status(
    conn: &mut PgConnection,
    transaction_id: Uuid,
    product_id: Uuid,
    status: ReservationStatus,
) -> Result<u64, sqlx::Error> {
    let timestamp_column = match status {
        ReservationStatus::Committed => "committed_at",
        ReservationStatus::Canceled => "canceled_at",
        ReservationStatus::Expired => "expired_at",
        ReservationStatus::Settled => "settled_at",
        ReservationStatus::Reserved => "reserved_at",
    };

    let query = format!(
        "UPDATE product_reservations SET status = $1, {timestamp_column} = NOW() \
         WHERE transaction_id = $2 AND product_id = $3"
    );

    let result = sqlx::query(&query)
        .bind(status)
        .bind(transaction_id)
        .bind(product_id)
        .execute(conn)
        .await?;

    Ok(result.rows_affected())
}

/// Sum of held quantity per product across live (non-terminal) reservations.
/// Used by the delete guard: a product with active holds cannot be removed.
pub async fn active_reservation_count(
    conn: &mut PgConnection,
    product_id: Uuid,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM product_reservations \
         WHERE product_id = $1 AND status IN ('RESERVED', 'COMMITTED')",
    )
    .bind(product_id)
    .fetch_one(conn)
    .await
}

/// Test/audit helper: every reservation of a product regardless of basket.
pub async fn find_many_by_product_id(
    pool: &PgPool,
    product_id: Uuid,
) -> Result<Vec<ProductReservation>, sqlx::Error> {
    sqlx::query_as::<_, ProductReservation>(&format!(
        "SELECT {RESERVATION_COLUMNS} FROM product_reservations \
         WHERE product_id = $1 ORDER BY reserved_at"
    ))
    .bind(product_id)
    .fetch_all(pool)
    .await
}

/// Stock-conservation audit: on-hand plus everything held or sold must equal
/// the original quantity. Returns (on_hand, held_or_sold).
pub async fn stock_ledger(
    pool: &PgPool,
    product_id: Uuid,
) -> Result<(i64, i64), sqlx::Error> {
    let on_hand: i64 =
        sqlx::query_scalar("SELECT quantity FROM products WHERE id = $1")
            .bind(product_id)
            .fetch_one(pool)
            .await?;

    let held: Option<i64> = sqlx::query_scalar(
        "SELECT SUM(quantity)::BIGINT FROM product_reservations \
         WHERE product_id = $1 AND status IN ('RESERVED', 'COMMITTED', 'SETTLED')",
    )
    .bind(product_id)
    .fetch_one(pool)
    .await?;

    Ok((on_hand, held.unwrap_or(0)))
}
