//! Async token recovery for baskets whose snapshot creation failed.
//!
//! Phase one rides out transient provider errors with exponential backoff.
//! Once the breaker reports open there is no point hammering: phase two
//! parks on a blocking read of the `midtrans:recovery` stream and retries
//! once per recovery signal. Either a token eventually lands (and the expiry
//! clocks start) or the basket stays PENDING until the scheduler/expiry path
//! reclaims the stock. A provider outage can delay a basket, never deadlock
//! inventory.

use std::time::Duration;

use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use uuid::Uuid;

use super::adapter::RECOVERY_STREAM;
use super::client::SnapshotRequest;
use crate::services::saga_service::{self, SagaDeps};

const MAX_BACKOFF_RETRIES: u32 = 5;
const READ_ERROR_PAUSE: Duration = Duration::from_secs(5);

pub fn spawn_token_recovery(
    deps: SagaDeps,
    request: SnapshotRequest,
    transaction_id: Uuid,
    circuit_already_open: bool,
) {
    tokio::spawn(async move {
        if !circuit_already_open && backoff_phase(&deps, &request, transaction_id).await {
            return;
        }
        stream_phase(&deps, &request, transaction_id).await;
    });
}

/// Retry with 2s, 4s, 8s, … backoff while the breaker still admits calls.
/// Returns true once the token is secured.
async fn backoff_phase(deps: &SagaDeps, request: &SnapshotRequest, transaction_id: Uuid) -> bool {
    for attempt in 0..MAX_BACKOFF_RETRIES {
        tokio::time::sleep(Duration::from_secs(2u64 << attempt)).await;

        match deps.payment.create_snapshot(request).await {
            Ok(snapshot) => {
                tracing::info!(
                    transaction_id = %transaction_id,
                    attempt,
                    "snapshot retry succeeded"
                );
                store_token(deps, transaction_id, &snapshot.token).await;
                return true;
            }
            Err(err) if err.is_circuit_open() => {
                tracing::warn!(
                    transaction_id = %transaction_id,
                    attempt,
                    "circuit opened during retry, switching to recovery stream"
                );
                return false;
            }
            Err(err) => {
                tracing::warn!(
                    transaction_id = %transaction_id,
                    attempt,
                    error = %err,
                    "snapshot retry failed"
                );
            }
        }
    }

    false
}

/// Block on the recovery stream; every signal buys one retry.
async fn stream_phase(deps: &SagaDeps, request: &SnapshotRequest, transaction_id: Uuid) {
    let mut redis = deps.redis.clone();
    let mut last_seen_id = "0".to_string();

    loop {
        let options = StreamReadOptions::default().block(0).count(1);
        let reply: Result<StreamReadReply, redis::RedisError> = redis
            .xread_options(&[RECOVERY_STREAM], &[last_seen_id.as_str()], &options)
            .await;

        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(
                    transaction_id = %transaction_id,
                    error = %e,
                    "failed to read recovery stream"
                );
                tokio::time::sleep(READ_ERROR_PAUSE).await;
                continue;
            }
        };

        for stream in reply.keys {
            for entry in stream.ids {
                tracing::info!(
                    transaction_id = %transaction_id,
                    entry_id = %entry.id,
                    "received circuit recovery signal"
                );
                last_seen_id = entry.id.clone();

                match deps.payment.create_snapshot(request).await {
                    Ok(snapshot) => {
                        tracing::info!(
                            transaction_id = %transaction_id,
                            "snapshot recovered after circuit reopen"
                        );
                        store_token(deps, transaction_id, &snapshot.token).await;
                        return;
                    }
                    Err(err) => {
                        tracing::warn!(
                            transaction_id = %transaction_id,
                            error = %err,
                            "recovery retry failed, waiting for next signal"
                        );
                    }
                }
            }
        }
    }
}

async fn store_token(deps: &SagaDeps, transaction_id: Uuid, token: &str) {
    if let Err(err) =
        saga_service::update_transaction_token(&deps.pool, &deps.tasks, transaction_id, token)
            .await
    {
        tracing::error!(
            transaction_id = %transaction_id,
            kind = %err.kind,
            message = %err.message,
            "failed to store recovered token"
        );
    }
}
