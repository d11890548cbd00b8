//! SQL access for basket line items.

use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::entities::TransactionDetail;
use crate::models::TransactionProduct;

/// Insert every line of a basket in one statement.
pub async fn insert_many(
    conn: &mut PgConnection,
    transaction_id: Uuid,
    lines: &[TransactionProduct],
) -> Result<u64, sqlx::Error> {
    let product_ids: Vec<Uuid> = lines.iter().map(|l| l.product_id).collect();
    let quantities: Vec<i64> = lines.iter().map(|l| l.quantity).collect();
    let prices: Vec<i64> = lines.iter().map(|l| l.price).collect();

    let result = sqlx::query(
        "INSERT INTO transaction_details (transaction_id, product_id, quantity, price) \
         SELECT $1::uuid, line.product_id, line.quantity, line.price \
         FROM UNNEST($2::uuid[], $3::bigint[], $4::bigint[]) \
              AS line(product_id, quantity, price)",
    )
    .bind(transaction_id)
    .bind(&product_ids)
    .bind(&quantities)
    .bind(&prices)
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}

pub async fn find_many_by_transaction_id(
    pool: &PgPool,
    transaction_id: Uuid,
) -> Result<Vec<TransactionDetail>, sqlx::Error> {
    sqlx::query_as::<_, TransactionDetail>(
        "SELECT id, transaction_id, product_id, quantity, price, created_at \
         FROM transaction_details WHERE transaction_id = $1 ORDER BY created_at",
    )
    .bind(transaction_id)
    .fetch_all(pool)
    .await
}
