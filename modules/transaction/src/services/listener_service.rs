//! Webhook intake: durably buffer the provider's notification, nothing more.
//!
//! The intake path must stay cheap and reliable: the provider gets its 200
//! the moment the event is on the stream, and the consumer does the real
//! work against the database.

use std::sync::Arc;

use event_bus::consumer_retry::{retry_with_backoff, RetryConfig};
use event_bus::EventBus;
use platform_contracts::events::{WebhookNotifyEvent, SUBJECT_WEBHOOK_NOTIFY};
use platform_contracts::{AppError, AppResult};
use uuid::Uuid;

use crate::models::WebhookNotifyRequest;

pub async fn consume_and_produce_webhook(
    bus: &Arc<dyn EventBus>,
    order_id: Uuid,
    request: &WebhookNotifyRequest,
    raw_body: Vec<u8>,
) -> AppResult<()> {
    let event = WebhookNotifyEvent {
        transaction_status: request.transaction_status.clone(),
        status_code: request.status_code.clone(),
        signature_key: request.signature_key.clone(),
        settlement_time: request.settlement_time.clone(),
        order_id,
        gross_amount: request.gross_amount.clone(),
        body: raw_body,
    };

    let payload = serde_json::to_vec(&event)
        .map_err(|e| AppError::internal("failed to encode webhook event", e))?;

    retry_with_backoff(
        || {
            let payload = payload.clone();
            async move { bus.publish(SUBJECT_WEBHOOK_NOTIFY, payload).await }
        },
        &RetryConfig::default(),
        "publish_webhook_notify",
    )
    .await
    .map_err(|e| AppError::internal("failed to publish webhook notify event", e))?;

    tracing::info!(
        order_id = %order_id,
        provider_status = %request.transaction_status,
        "webhook buffered on stream"
    );

    Ok(())
}
