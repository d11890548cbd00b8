//! Durable consumer for buffered provider webhooks.

use async_nats::jetstream::consumer::PullConsumer;
use async_nats::jetstream::{AckKind, Context};
use event_bus::jetstream::{
    durable_pull_consumer, ensure_stream, FETCH_BATCH, FETCH_MAX_WAIT, NAK_DELAY,
};
use futures::StreamExt;
use platform_contracts::events::{
    WebhookNotifyEvent, SUBJECT_WEBHOOK_NOTIFY, WEBHOOK_NOTIFY_STREAM,
};
use platform_contracts::ErrorKind;

use crate::models::CheckAndUpdateTransactionRequest;
use crate::services::reconcile;
use crate::services::saga_service::SagaDeps;

const DURABLE_NAME: &str = "webhook_durable";

/// Create the stream (idempotent) and spawn the consumer loop.
pub async fn start_webhook_consumer(context: Context, deps: SagaDeps) -> anyhow::Result<()> {
    ensure_stream(&context, WEBHOOK_NOTIFY_STREAM, &[SUBJECT_WEBHOOK_NOTIFY]).await?;

    let consumer = durable_pull_consumer(
        &context,
        WEBHOOK_NOTIFY_STREAM,
        DURABLE_NAME,
        SUBJECT_WEBHOOK_NOTIFY,
    )
    .await?;

    tokio::spawn(consume_webhooks(consumer, deps));
    Ok(())
}

async fn consume_webhooks(consumer: PullConsumer, deps: SagaDeps) {
    tracing::info!("webhook consumer started");

    loop {
        let mut batch = match consumer
            .fetch()
            .max_messages(FETCH_BATCH)
            .expires(FETCH_MAX_WAIT)
            .messages()
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!(error = %e, "failed to fetch webhook messages");
                tokio::time::sleep(FETCH_MAX_WAIT).await;
                continue;
            }
        };

        while let Some(msg) = batch.next().await {
            let msg = match msg {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::debug!(error = %e, "webhook fetch batch ended");
                    break;
                }
            };

            handle_webhook_message(&deps, &msg).await;
        }
    }
}

async fn handle_webhook_message(deps: &SagaDeps, msg: &async_nats::jetstream::Message) {
    let event: WebhookNotifyEvent = match serde_json::from_slice(&msg.payload) {
        Ok(event) => event,
        Err(e) => {
            tracing::error!(error = %e, "failed to decode webhook event");
            if let Err(e) = msg.ack_with(AckKind::Nak(Some(NAK_DELAY))).await {
                tracing::error!(error = %e, "failed to NAK webhook message");
            }
            return;
        }
    };

    let request = CheckAndUpdateTransactionRequest {
        provider_status: event.transaction_status,
        status_code: event.status_code,
        signature_key: event.signature_key,
        settlement_time: event.settlement_time,
        order_id: event.order_id,
        gross_amount: event.gross_amount,
        body: event.body,
    };

    match reconcile::check_and_update_transaction(
        &deps.pool,
        &deps.bus,
        deps.payment.server_key(),
        &request,
    )
    .await
    {
        Ok(()) => {
            if let Err(e) = msg.ack().await {
                tracing::error!(
                    order_id = %request.order_id,
                    error = %e,
                    "failed to ACK webhook message"
                );
            }
        }
        Err(err)
            if matches!(
                err.kind,
                ErrorKind::Internal | ErrorKind::DatabaseFailure | ErrorKind::External
            ) =>
        {
            tracing::error!(
                order_id = %request.order_id,
                kind = %err.kind,
                message = %err.message,
                "webhook processing failed, NAKing for redelivery"
            );
            if let Err(e) = msg.ack_with(AckKind::Nak(Some(NAK_DELAY))).await {
                tracing::error!(error = %e, "failed to NAK webhook message");
            }
        }
        Err(err) => {
            // Forged signatures, unknown baskets, malformed times: retrying
            // replays the same bytes, so take the message off the stream.
            tracing::warn!(
                order_id = %request.order_id,
                kind = %err.kind,
                message = %err.message,
                "webhook rejected, acknowledging"
            );
            if let Err(e) = msg.ack().await {
                tracing::error!(error = %e, "failed to ACK webhook message");
            }
        }
    }
}
