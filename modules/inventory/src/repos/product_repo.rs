//! SQL access for the product table.
//!
//! Quantity mutations run only inside a transaction that already holds
//! `FOR UPDATE` on the affected rows; the `deleted_at IS NULL` guard on every
//! UPDATE keeps soft-deleted products out of the stock ledger.

use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::entities::{Product, ProductWithTotal};

/// Row lock taken by `find_many_by_ids`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// `FOR UPDATE`: the caller will mutate quantity.
    Update,
    /// `FOR SHARE`: the caller only needs the rows to stay put.
    Share,
}

impl LockMode {
    fn sql(&self) -> &'static str {
        match self {
            LockMode::Update => " FOR UPDATE",
            LockMode::Share => " FOR SHARE",
        }
    }
}

const PRODUCT_COLUMNS: &str =
    "id, user_id, name, slug, description, price, quantity, created_at, updated_at, deleted_at";

/// Fetch live products by id, locked, ordered by id. The ordering is what
/// keeps two baskets with overlapping product sets from deadlocking.
pub async fn find_many_by_ids(
    conn: &mut PgConnection,
    ids: &[Uuid],
    lock: LockMode,
) -> Result<Vec<Product>, sqlx::Error> {
    let query = format!(
        "SELECT {PRODUCT_COLUMNS} FROM products \
         WHERE id = ANY($1) AND deleted_at IS NULL \
         ORDER BY id{}",
        lock.sql()
    );

    sqlx::query_as::<_, Product>(&query)
        .bind(ids)
        .fetch_all(conn)
        .await
}

/// Decrement on-hand stock. Exactly one row must be affected; zero means the
/// product vanished (deleted) under us and the caller must roll back.
pub async fn reduce_quantity(
    conn: &mut PgConnection,
    id: Uuid,
    amount: i64,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE products SET quantity = quantity - $1, updated_at = NOW() \
         WHERE id = $2 AND deleted_at IS NULL",
    )
    .bind(amount)
    .bind(id)
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}

/// Return previously reserved stock to the shelf.
pub async fn restore_quantity(
    conn: &mut PgConnection,
    id: Uuid,
    amount: i64,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE products SET quantity = quantity + $1, updated_at = NOW() \
         WHERE id = $2 AND deleted_at IS NULL",
    )
    .bind(amount)
    .bind(id)
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}

pub async fn insert(
    pool: &PgPool,
    user_id: Uuid,
    name: &str,
    slug: &str,
    description: Option<&str>,
    price: i64,
    quantity: i64,
) -> Result<Product, sqlx::Error> {
    sqlx::query_as::<_, Product>(&format!(
        "INSERT INTO products (user_id, name, slug, description, price, quantity) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         RETURNING {PRODUCT_COLUMNS}"
    ))
    .bind(user_id)
    .bind(name)
    .bind(slug)
    .bind(description)
    .bind(price)
    .bind(quantity)
    .fetch_one(pool)
    .await
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Product>, sqlx::Error> {
    sqlx::query_as::<_, Product>(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1 AND deleted_at IS NULL"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn find_by_id_and_user_id(
    pool: &PgPool,
    id: Uuid,
    user_id: Uuid,
) -> Result<Option<Product>, sqlx::Error> {
    sqlx::query_as::<_, Product>(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM products \
         WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL"
    ))
    .bind(id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
}

pub async fn find_by_slug(pool: &PgPool, slug: &str) -> Result<Option<Product>, sqlx::Error> {
    sqlx::query_as::<_, Product>(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM products WHERE slug = $1 AND deleted_at IS NULL"
    ))
    .bind(slug)
    .fetch_optional(pool)
    .await
}

/// Does a live product with this name or slug already exist (optionally
/// excluding one id, for updates)?
pub async fn exists_by_name_or_slug(
    pool: &PgPool,
    name: &str,
    slug: &str,
    except: Option<Uuid>,
) -> Result<bool, sqlx::Error> {
    let count: i64 = match except {
        Some(id) => {
            sqlx::query_scalar(
                "SELECT COUNT(*) FROM products \
                 WHERE (name = $1 OR slug = $2) AND deleted_at IS NULL AND id != $3",
            )
            .bind(name)
            .bind(slug)
            .bind(id)
            .fetch_one(pool)
            .await?
        }
        None => {
            sqlx::query_scalar(
                "SELECT COUNT(*) FROM products \
                 WHERE (name = $1 OR slug = $2) AND deleted_at IS NULL",
            )
            .bind(name)
            .bind(slug)
            .fetch_one(pool)
            .await?
        }
    };

    Ok(count > 0)
}

pub async fn update_by_id(
    pool: &PgPool,
    id: Uuid,
    user_id: Uuid,
    name: Option<&str>,
    slug: Option<&str>,
    description: Option<&str>,
    price: Option<i64>,
    quantity: Option<i64>,
) -> Result<Option<Product>, sqlx::Error> {
    sqlx::query_as::<_, Product>(&format!(
        "UPDATE products SET \
            name = COALESCE($1, name), \
            slug = COALESCE($2, slug), \
            description = COALESCE($3, description), \
            price = COALESCE($4, price), \
            quantity = COALESCE($5, quantity), \
            updated_at = NOW() \
         WHERE id = $6 AND user_id = $7 AND deleted_at IS NULL \
         RETURNING {PRODUCT_COLUMNS}"
    ))
    .bind(name)
    .bind(slug)
    .bind(description)
    .bind(price)
    .bind(quantity)
    .bind(id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
}

/// Soft-delete. Returns the number of rows marked.
pub async fn delete_by_id_and_user_id(
    conn: &mut PgConnection,
    id: Uuid,
    user_id: Uuid,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE products SET deleted_at = NOW() \
         WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL",
    )
    .bind(id)
    .bind(user_id)
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}

pub async fn public_find_all(
    pool: &PgPool,
    page: i64,
    limit: i64,
) -> Result<Vec<ProductWithTotal>, sqlx::Error> {
    sqlx::query_as::<_, ProductWithTotal>(
        "SELECT COUNT(*) OVER () AS total_data, \
                id, user_id, name, slug, description, price, quantity, created_at, updated_at \
         FROM products WHERE deleted_at IS NULL \
         ORDER BY created_at DESC \
         LIMIT $1 OFFSET $2",
    )
    .bind(limit)
    .bind((page - 1) * limit)
    .fetch_all(pool)
    .await
}

pub async fn owner_find_all(
    pool: &PgPool,
    user_id: Uuid,
    page: i64,
    limit: i64,
) -> Result<Vec<ProductWithTotal>, sqlx::Error> {
    sqlx::query_as::<_, ProductWithTotal>(
        "SELECT COUNT(*) OVER () AS total_data, \
                id, user_id, name, slug, description, price, quantity, created_at, updated_at \
         FROM products WHERE user_id = $1 AND deleted_at IS NULL \
         ORDER BY created_at DESC \
         LIMIT $2 OFFSET $3",
    )
    .bind(user_id)
    .bind(limit)
    .bind((page - 1) * limit)
    .fetch_all(pool)
    .await
}
