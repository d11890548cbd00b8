//! Buyer and owner transaction HTTP API.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use platform_contracts::http::{UserContext, WebResponse};
use platform_contracts::AppError;

use crate::models::{
    CreateTransactionRequest, CreateTransactionResponse, ListQuery, OwnerListQuery,
    TransactionResponse,
};
use crate::services::saga_service::{self, SagaDeps};

pub fn transaction_router(deps: SagaDeps) -> Router {
    Router::new()
        .route("/api/v1/transaction/buy", post(create_transaction))
        .route("/api/v1/transaction", get(user_search))
        .route("/api/v1/transaction/detail", get(user_search_with_detail))
        .route(
            "/api/v1/transaction/owner/detail",
            get(owner_search_with_detail),
        )
        .with_state(deps)
}

async fn create_transaction(
    State(deps): State<SagaDeps>,
    user: UserContext,
    Json(request): Json<CreateTransactionRequest>,
) -> Result<(StatusCode, Json<WebResponse<CreateTransactionResponse>>), AppError> {
    let response = saga_service::create_transaction(&deps, user.user_id, &request).await?;
    Ok((StatusCode::CREATED, Json(WebResponse::ok(response))))
}

async fn user_search(
    State(deps): State<SagaDeps>,
    user: UserContext,
    Query(query): Query<ListQuery>,
) -> Result<Json<WebResponse<Vec<TransactionResponse>>>, AppError> {
    let (transactions, paging) =
        saga_service::user_search(&deps.pool, user.user_id, query.page, query.limit).await?;
    Ok(Json(WebResponse::ok_paged(transactions, paging)))
}

async fn user_search_with_detail(
    State(deps): State<SagaDeps>,
    user: UserContext,
    Query(query): Query<ListQuery>,
) -> Result<Json<WebResponse<Vec<TransactionResponse>>>, AppError> {
    let (transactions, paging) =
        saga_service::user_search_with_detail(&deps.pool, user.user_id, query.page, query.limit)
            .await?;
    Ok(Json(WebResponse::ok_paged(transactions, paging)))
}

async fn owner_search_with_detail(
    State(deps): State<SagaDeps>,
    user: UserContext,
    Query(query): Query<OwnerListQuery>,
) -> Result<Json<WebResponse<Vec<TransactionResponse>>>, AppError> {
    let (transactions, paging) = saga_service::owner_search_with_detail(
        &deps,
        user.user_id,
        query.product_id,
        query.page,
        query.limit,
    )
    .await?;
    Ok(Json(WebResponse::ok_paged(transactions, paging)))
}
