//! Durable consumers for the basket lifecycle stream.
//!
//! One durable pull consumer per subject: subjects process concurrently with
//! each other, while messages within a subject are worked serially by its
//! loop. Handlers are idempotent, so the at-least-once delivery of the
//! stream (and NAK-driven redelivery) is safe.

use async_nats::jetstream::consumer::PullConsumer;
use async_nats::jetstream::AckKind;
use async_nats::jetstream::Context;
use event_bus::jetstream::{
    durable_pull_consumer, ensure_stream, FETCH_BATCH, FETCH_MAX_WAIT, NAK_DELAY,
};
use futures::StreamExt;
use platform_contracts::events::{
    TransactionEvent, TransactionEventStatus, SUBJECT_TRANSACTION_CANCELED,
    SUBJECT_TRANSACTION_COMMITTED, SUBJECT_TRANSACTION_EXPIRED, SUBJECT_TRANSACTION_SETTLED,
    TRANSACTION_STREAM, TRANSACTION_SUBJECTS,
};
use sqlx::PgPool;

use crate::services::reservation_service;

fn durable_name(subject: &str) -> String {
    format!("transaction_{}_consumer", subject.rsplit('.').next().unwrap_or("unknown"))
}

fn status_for_subject(subject: &str) -> Option<TransactionEventStatus> {
    match subject {
        SUBJECT_TRANSACTION_COMMITTED => Some(TransactionEventStatus::Committed),
        SUBJECT_TRANSACTION_SETTLED => Some(TransactionEventStatus::Settled),
        SUBJECT_TRANSACTION_CANCELED => Some(TransactionEventStatus::Canceled),
        SUBJECT_TRANSACTION_EXPIRED => Some(TransactionEventStatus::Expired),
        _ => None,
    }
}

/// Create the stream (idempotent) and spawn one consumer task per subject.
pub async fn start_transaction_consumers(
    context: Context,
    pool: PgPool,
) -> anyhow::Result<()> {
    ensure_stream(&context, TRANSACTION_STREAM, &TRANSACTION_SUBJECTS).await?;

    for subject in TRANSACTION_SUBJECTS {
        let consumer =
            durable_pull_consumer(&context, TRANSACTION_STREAM, &durable_name(subject), subject)
                .await?;
        tokio::spawn(consume_subject(consumer, pool.clone(), subject));
    }

    Ok(())
}

async fn consume_subject(consumer: PullConsumer, pool: PgPool, subject: &'static str) {
    tracing::info!(subject, "transaction consumer started");

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
                tracing::error!(subject, error = %e, "failed to fetch messages");
                tokio::time::sleep(FETCH_MAX_WAIT).await;
                continue;
            }
        };

        while let Some(msg) = batch.next().await {
            let msg = match msg {
                Ok(msg) => msg,
                Err(e) => {
                    // An expired fetch window surfaces here; anything else is
                    // a transport hiccup worth logging.
                    tracing::debug!(subject, error = %e, "fetch batch ended");
                    break;
                }
            };

            handle_message(&pool, subject, &msg).await;
        }
    }
}

async fn handle_message(pool: &PgPool, subject: &'static str, msg: &async_nats::jetstream::Message) {
    let event: TransactionEvent = match serde_json::from_slice(&msg.payload) {
        Ok(event) => event,
        Err(e) => {
            tracing::error!(subject, error = %e, "failed to decode transaction event");
            if let Err(e) = msg.ack_with(AckKind::Nak(Some(NAK_DELAY))).await {
                tracing::error!(subject, error = %e, "failed to NAK message");
            }
            return;
        }
    };

    let Some(status) = status_for_subject(subject) else {
        tracing::error!(subject, "message on unexpected subject, acknowledging");
        if let Err(e) = msg.ack().await {
            tracing::error!(subject, error = %e, "failed to ACK message");
        }
        return;
    };

    match reservation_service::apply_transaction_event(pool, event.transaction_id, status).await
    {
        Ok(()) => {
            if let Err(e) = msg.ack().await {
                tracing::error!(
                    subject,
                    transaction_id = %event.transaction_id,
                    error = %e,
                    "failed to ACK message"
                );
            }
        }
        Err(err) if err.kind.is_terminal_for_consumer() => {
            // Redelivery cannot help (e.g. no reservations for this basket);
            // take the message off the stream.
            tracing::warn!(
                subject,
                transaction_id = %event.transaction_id,
                kind = %err.kind,
                message = %err.message,
                "terminal consumer error, acknowledging"
            );
            if let Err(e) = msg.ack().await {
                tracing::error!(subject, error = %e, "failed to ACK message");
            }
        }
        Err(err) => {
            tracing::error!(
                subject,
                transaction_id = %event.transaction_id,
                kind = %err.kind,
                message = %err.message,
                "failed to process transaction event, NAKing"
            );
            if let Err(e) = msg.ack_with(AckKind::Nak(Some(NAK_DELAY))).await {
                tracing::error!(subject, error = %e, "failed to NAK message");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durable_names_are_per_subject() {
        assert_eq!(
            durable_name(SUBJECT_TRANSACTION_COMMITTED),
            "transaction_committed_consumer"
        );
        assert_eq!(
            durable_name(SUBJECT_TRANSACTION_SETTLED),
            "transaction_settled_consumer"
        );
        assert_eq!(
            durable_name(SUBJECT_TRANSACTION_CANCELED),
            "transaction_canceled_consumer"
        );
        assert_eq!(
            durable_name(SUBJECT_TRANSACTION_EXPIRED),
            "transaction_expired_consumer"
        );
    }

    #[test]
    fn every_stream_subject_maps_to_a_status() {
        for subject in TRANSACTION_SUBJECTS {
            assert!(status_for_subject(subject).is_some(), "unmapped: {subject}");
        }
        assert!(status_for_subject("transaction.unknown").is_none());
    }
}
