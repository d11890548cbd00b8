//! Public and owner product HTTP API.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use platform_contracts::http::{UserContext, WebResponse};
use platform_contracts::AppError;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{CreateProductRequest, ListQuery, ProductResponse, UpdateProductRequest};
use crate::services::product_service;

pub fn product_router(pool: PgPool) -> Router {
    Router::new()
        // Owner endpoints (gateway-authenticated)
        .route("/api/v1/product", post(create_product).get(owner_list))
        .route(
            "/api/v1/product/{id}",
            put(update_product).delete(delete_product),
        )
        // Public endpoints
        .route("/api/v1/products", get(public_list))
        .route("/api/v1/products/{slug}", get(get_by_slug))
        .with_state(pool)
}

async fn create_product(
    State(pool): State<PgPool>,
    user: UserContext,
    Json(request): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<WebResponse<ProductResponse>>), AppError> {
    let product = product_service::create_product(&pool, user.user_id, &request).await?;
    Ok((
        StatusCode::CREATED,
        Json(WebResponse::ok(ProductResponse::from(&product))),
    ))
}

async fn update_product(
    State(pool): State<PgPool>,
    user: UserContext,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateProductRequest>,
) -> Result<Json<WebResponse<ProductResponse>>, AppError> {
    let product = product_service::update_product(&pool, user.user_id, id, &request).await?;
    Ok(Json(WebResponse::ok(ProductResponse::from(&product))))
}

async fn delete_product(
    State(pool): State<PgPool>,
    user: UserContext,
    Path(id): Path<Uuid>,
) -> Result<Json<WebResponse<()>>, AppError> {
    product_service::delete_product(&pool, user.user_id, id).await?;
    Ok(Json(WebResponse::<()>::empty()))
}

async fn owner_list(
    State(pool): State<PgPool>,
    user: UserContext,
    Query(query): Query<ListQuery>,
) -> Result<Json<WebResponse<Vec<ProductResponse>>>, AppError> {
    let (products, paging) =
        product_service::owner_list(&pool, user.user_id, query.page, query.limit).await?;

    let body = products.iter().map(ProductResponse::from).collect();
    Ok(Json(WebResponse::ok_paged(body, paging)))
}

async fn public_list(
    State(pool): State<PgPool>,
    Query(query): Query<ListQuery>,
) -> Result<Json<WebResponse<Vec<ProductResponse>>>, AppError> {
    let (products, paging) = product_service::public_list(&pool, query.page, query.limit).await?;

    let body = products.iter().map(ProductResponse::from).collect();
    Ok(Json(WebResponse::ok_paged(body, paging)))
}

async fn get_by_slug(
    State(pool): State<PgPool>,
    Path(slug): Path<String>,
) -> Result<Json<WebResponse<ProductResponse>>, AppError> {
    let product = product_service::get_by_slug(&pool, &slug).await?;
    Ok(Json(WebResponse::ok(ProductResponse::from(&product))))
}
