//! Service-internal RPC surface consumed by the transaction service through
//! `inventory-client`. Not exposed past the gateway.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use platform_contracts::http::WebResponse;
use platform_contracts::AppError;
use sqlx::PgPool;

use crate::models::{CheckAndReserveRequest, OwnerGetProductRequest, ProductResponse};
use crate::services::reservation_service;

pub fn rpc_router(pool: PgPool) -> Router {
    Router::new()
        .route("/rpc/v1/product/check-and-reserve", post(check_and_reserve))
        .route("/rpc/v1/product/owner-get", post(owner_get_product))
        .with_state(pool)
}

/// Reserve every basket line atomically; the saga's first distributed step.
async fn check_and_reserve(
    State(pool): State<PgPool>,
    Json(request): Json<CheckAndReserveRequest>,
) -> Result<(StatusCode, Json<WebResponse<Vec<ProductResponse>>>), AppError> {
    let products = reservation_service::check_and_reserve(&pool, &request).await?;

    let body = products.iter().map(ProductResponse::from).collect();
    Ok((StatusCode::OK, Json(WebResponse::ok(body))))
}

async fn owner_get_product(
    State(pool): State<PgPool>,
    Json(request): Json<OwnerGetProductRequest>,
) -> Result<(StatusCode, Json<WebResponse<ProductResponse>>), AppError> {
    let product =
        reservation_service::owner_get_product(&pool, request.user_id, request.product_id)
            .await?;

    Ok((
        StatusCode::OK,
        Json(WebResponse::ok(ProductResponse::from(&product))),
    ))
}
