//! Owner-facing product catalog operations.

use platform_contracts::pagination::{self, PageMetadata};
use platform_contracts::{AppError, AppResult, ErrorKind};
use sqlx::PgPool;
use uuid::Uuid;

use crate::entities::Product;
use crate::models::{slugify, CreateProductRequest, UpdateProductRequest};
use crate::repos::{product_repo, reservation_repo};

pub const MSG_NAME_OR_SLUG_TAKEN: &str = "Product with the same name or slug already exists";
pub const MSG_NOT_FOUND: &str = "Product not found for the given id";
pub const MSG_HAS_ACTIVE_RESERVATIONS: &str =
    "Product still has active reservations and cannot be deleted";

pub async fn create_product(
    pool: &PgPool,
    user_id: Uuid,
    request: &CreateProductRequest,
) -> AppResult<Product> {
    request.validate()?;

    let name = request.name.trim();
    let slug = slugify(name);

    if product_repo::exists_by_name_or_slug(pool, name, &slug, None)
        .await
        .map_err(|e| AppError::internal("failed to check product uniqueness", e))?
    {
        return Err(AppError::new(ErrorKind::AlreadyExists, MSG_NAME_OR_SLUG_TAKEN));
    }

    let product = product_repo::insert(
        pool,
        user_id,
        name,
        &slug,
        request.description.as_deref(),
        request.price,
        request.quantity,
    )
    .await
    .map_err(|e| AppError::internal("failed to insert product", e))?;

    tracing::info!(product_id = %product.id, user_id = %user_id, "product created");
    Ok(product)
}

pub async fn update_product(
    pool: &PgPool,
    user_id: Uuid,
    product_id: Uuid,
    request: &UpdateProductRequest,
) -> AppResult<Product> {
    request.validate()?;

    let name = request.name.as_deref().map(str::trim);
    let slug = name.map(slugify);

    if let (Some(name), Some(slug)) = (name, slug.as_deref()) {
        if product_repo::exists_by_name_or_slug(pool, name, slug, Some(product_id))
            .await
            .map_err(|e| AppError::internal("failed to check product uniqueness", e))?
        {
            return Err(AppError::new(ErrorKind::AlreadyExists, MSG_NAME_OR_SLUG_TAKEN));
        }
    }

    product_repo::update_by_id(
        pool,
        product_id,
        user_id,
        name,
        slug.as_deref(),
        request.description.as_deref(),
        request.price,
        request.quantity,
    )
    .await
    .map_err(|e| AppError::internal("failed to update product", e))?
    .ok_or_else(|| AppError::not_found(MSG_NOT_FOUND))
}

/// Soft-delete, refused while stock is still held by a live basket.
pub async fn delete_product(pool: &PgPool, user_id: Uuid, product_id: Uuid) -> AppResult<()> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| AppError::internal("failed to begin delete transaction", e))?;

    let active = reservation_repo::active_reservation_count(&mut *tx, product_id)
        .await
        .map_err(|e| AppError::internal("failed to count active reservations", e))?;
    if active > 0 {
        return Err(AppError::invalid_argument(MSG_HAS_ACTIVE_RESERVATIONS));
    }

    let affected = product_repo::delete_by_id_and_user_id(&mut *tx, product_id, user_id)
        .await
        .map_err(|e| AppError::internal("failed to delete product", e))?;
    if affected == 0 {
        return Err(AppError::not_found(MSG_NOT_FOUND));
    }

    tx.commit()
        .await
        .map_err(|e| AppError::internal("failed to commit delete transaction", e))?;

    tracing::info!(product_id = %product_id, user_id = %user_id, "product deleted");
    Ok(())
}

pub async fn get_by_slug(pool: &PgPool, slug: &str) -> AppResult<Product> {
    product_repo::find_by_slug(pool, slug)
        .await
        .map_err(|e| AppError::internal("failed to fetch product", e))?
        .ok_or_else(|| AppError::not_found(MSG_NOT_FOUND))
}

pub async fn public_list(
    pool: &PgPool,
    page: Option<i64>,
    limit: Option<i64>,
) -> AppResult<(Vec<crate::entities::ProductWithTotal>, PageMetadata)> {
    let (page, limit) = pagination::sanitize(page, limit);

    let products = product_repo::public_find_all(pool, page, limit)
        .await
        .map_err(|e| AppError::internal("failed to list products", e))?;

    let total = products.first().map(|p| p.total_data).unwrap_or(0);
    Ok((products, pagination::calculate(total, page, limit)))
}

pub async fn owner_list(
    pool: &PgPool,
    user_id: Uuid,
    page: Option<i64>,
    limit: Option<i64>,
) -> AppResult<(Vec<crate::entities::ProductWithTotal>, PageMetadata)> {
    let (page, limit) = pagination::sanitize(page, limit);

    let products = product_repo::owner_find_all(pool, user_id, page, limit)
        .await
        .map_err(|e| AppError::internal("failed to list owner products", e))?;

    let total = products.first().map(|p| p.total_data).unwrap_or(0);
    Ok((products, pagination::calculate(total, page, limit)))
}
