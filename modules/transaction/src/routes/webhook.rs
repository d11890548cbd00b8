//! Provider webhook intake.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use platform_contracts::http::WebResponse;
use platform_contracts::AppError;
use uuid::Uuid;

use crate::models::WebhookNotifyRequest;
use crate::services::listener_service;
use crate::services::saga_service::SagaDeps;

pub fn webhook_router(deps: SagaDeps) -> Router {
    Router::new()
        .route("/api/v1/transaction/webhook/notify", post(notify_transaction))
        .with_state(deps)
}

/// The provider's notification: parse the minimum, keep the raw body, and
/// get it onto the durable stream. No database work on this path.
async fn notify_transaction(
    State(deps): State<SagaDeps>,
    body: Bytes,
) -> Result<(StatusCode, Json<WebResponse<()>>), AppError> {
    let request: WebhookNotifyRequest = serde_json::from_slice(&body)
        .map_err(|_| AppError::invalid_argument("malformed webhook body"))?;

    let order_id = Uuid::parse_str(&request.order_id)
        .map_err(|_| AppError::invalid_argument("invalid order id"))?;

    tracing::info!(
        order_id = %order_id,
        provider_status = %request.transaction_status,
        "webhook received"
    );

    listener_service::consume_and_produce_webhook(&deps.bus, order_id, &request, body.to_vec())
        .await?;

    Ok((StatusCode::OK, Json(WebResponse::<()>::empty())))
}
