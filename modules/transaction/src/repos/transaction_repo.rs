//! SQL access for the basket table.
//!
//! Every mutation of an existing row happens under `FOR UPDATE` taken by
//! `find_by_id(…, true)` inside the caller's transaction, so the saga,
//! the expiry tasks, and the reconciler serialize per basket.

use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::entities::{
    CustomerStatus, InternalStatus, Transaction, TransactionDetailJoined, TransactionWithTotal,
};

const TRANSACTION_COLUMNS: &str = "id, user_id, total_price, transaction_status, \
     internal_status, external_status, external_settlement_at, external_callback_response, \
     snap_token, checkout_at, payment_at, updated_at";

pub async fn insert(
    conn: &mut PgConnection,
    id: Uuid,
    user_id: Uuid,
    total_price: i64,
) -> Result<Transaction, sqlx::Error> {
    sqlx::query_as::<_, Transaction>(&format!(
        "INSERT INTO transactions \
            (id, user_id, total_price, transaction_status, internal_status) \
         VALUES ($1, $2, $3, 'PENDING', 'PENDING') \
         RETURNING {TRANSACTION_COLUMNS}"
    ))
    .bind(id)
    .bind(user_id)
    .bind(total_price)
    .fetch_one(conn)
    .await
}

pub async fn find_by_id(
    conn: &mut PgConnection,
    id: Uuid,
    for_update: bool,
) -> Result<Option<Transaction>, sqlx::Error> {
    let mut query = format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1");
    if for_update {
        query.push_str(" FOR UPDATE");
    }

    sqlx::query_as::<_, Transaction>(&query)
        .bind(id)
        .fetch_optional(conn)
        .await
}

/// Persist the reconciler's verdict: both statuses, the provider echo, and
/// the raw callback. `updated_at` moves so the late-settlement grace window
/// anchors on this mutation.
pub async fn update_callback(
    conn: &mut PgConnection,
    transaction: &Transaction,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE transactions SET \
            internal_status = $1, \
            transaction_status = $2, \
            external_status = $3, \
            external_settlement_at = $4, \
            external_callback_response = $5, \
            payment_at = $6, \
            snap_token = $7, \
            updated_at = NOW() \
         WHERE id = $8",
    )
    .bind(transaction.internal_status)
    .bind(transaction.transaction_status)
    .bind(&transaction.external_status)
    .bind(transaction.external_settlement_at)
    .bind(&transaction.external_callback_response)
    .bind(transaction.payment_at)
    .bind(&transaction.snap_token)
    .bind(transaction.id)
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}

/// Attach the payment token, guarded so a token that arrives after the
/// basket left PENDING cannot resurrect it.
pub async fn update_token_if_pending(
    conn: &mut PgConnection,
    id: Uuid,
    token: &str,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE transactions \
         SET internal_status = 'TOKEN_READY', snap_token = $1, updated_at = NOW() \
         WHERE id = $2 AND internal_status = 'PENDING'",
    )
    .bind(token)
    .bind(id)
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}

/// Expiry-task mutation: statuses plus token clear.
pub async fn update_status(
    conn: &mut PgConnection,
    id: Uuid,
    customer: CustomerStatus,
    internal: InternalStatus,
    clear_token: bool,
) -> Result<u64, sqlx::Error> {
    let query = if clear_token {
        "UPDATE transactions SET transaction_status = $1, internal_status = $2, \
         snap_token = NULL, updated_at = NOW() WHERE id = $3"
    } else {
        "UPDATE transactions SET transaction_status = $1, internal_status = $2, \
         updated_at = NOW() WHERE id = $3"
    };

    let result = sqlx::query(query)
        .bind(customer)
        .bind(internal)
        .bind(id)
        .execute(conn)
        .await?;

    Ok(result.rows_affected())
}

/// Baskets the reconciler still cares about.
pub async fn find_many_checkable(pool: &PgPool) -> Result<Vec<Transaction>, sqlx::Error> {
    sqlx::query_as::<_, Transaction>(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions \
         WHERE internal_status IN ('PENDING', 'TOKEN_READY', 'EXPIRED') \
         ORDER BY checkout_at"
    ))
    .fetch_all(pool)
    .await
}

pub async fn find_many_by_user_id(
    pool: &PgPool,
    user_id: Uuid,
    page: i64,
    limit: i64,
) -> Result<Vec<TransactionWithTotal>, sqlx::Error> {
    sqlx::query_as::<_, TransactionWithTotal>(
        "SELECT COUNT(*) OVER () AS total_data, \
                id, user_id, total_price, transaction_status, internal_status, \
                checkout_at, payment_at, updated_at \
         FROM transactions WHERE user_id = $1 \
         ORDER BY checkout_at DESC \
         LIMIT $2 OFFSET $3",
    )
    .bind(user_id)
    .bind(limit)
    .bind((page - 1) * limit)
    .fetch_all(pool)
    .await
}

/// Baskets of one user joined with their lines, newest first. The windowed
/// count is per joined row; the service regroups by basket.
pub async fn find_many_with_detail_by_user_id(
    pool: &PgPool,
    user_id: Uuid,
    page: i64,
    limit: i64,
) -> Result<Vec<TransactionDetailJoined>, sqlx::Error> {
    sqlx::query_as::<_, TransactionDetailJoined>(
        "WITH page_trx AS ( \
             SELECT COUNT(*) OVER () AS total_data, t.* \
             FROM transactions t \
             WHERE t.user_id = $1 \
             ORDER BY t.checkout_at DESC \
             LIMIT $2 OFFSET $3 \
         ) \
         SELECT p.total_data, p.id, p.user_id, p.total_price, p.transaction_status, \
                p.checkout_at, p.payment_at, p.updated_at, \
                td.id AS detail_id, td.product_id AS detail_product_id, \
                td.quantity AS detail_quantity, td.price AS detail_price \
         FROM page_trx p \
         JOIN transaction_details td ON td.transaction_id = p.id \
         ORDER BY p.checkout_at DESC, td.created_at",
    )
    .bind(user_id)
    .bind(limit)
    .bind((page - 1) * limit)
    .fetch_all(pool)
    .await
}

/// Baskets containing a given product, for the owner view.
pub async fn find_many_with_detail_by_product_id(
    pool: &PgPool,
    product_id: Uuid,
    page: i64,
    limit: i64,
) -> Result<Vec<TransactionDetailJoined>, sqlx::Error> {
    sqlx::query_as::<_, TransactionDetailJoined>(
        "WITH page_trx AS ( \
             SELECT COUNT(*) OVER () AS total_data, t.* \
             FROM transactions t \
             WHERE EXISTS ( \
                 SELECT 1 FROM transaction_details d \
                 WHERE d.transaction_id = t.id AND d.product_id = $1 \
             ) \
             ORDER BY t.checkout_at DESC \
             LIMIT $2 OFFSET $3 \
         ) \
         SELECT p.total_data, p.id, p.user_id, p.total_price, p.transaction_status, \
                p.checkout_at, p.payment_at, p.updated_at, \
                td.id AS detail_id, td.product_id AS detail_product_id, \
                td.quantity AS detail_quantity, td.price AS detail_price \
         FROM page_trx p \
         JOIN transaction_details td ON td.transaction_id = p.id \
         ORDER BY p.checkout_at DESC, td.created_at",
    )
    .bind(product_id)
    .bind(limit)
    .bind((page - 1) * limit)
    .fetch_all(pool)
    .await
}
