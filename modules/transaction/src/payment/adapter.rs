//! Payment adapter: the provider client behind the circuit breaker, with a
//! hard per-call deadline and the recovery-signal forwarder.

use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::mpsc;

use super::breaker::{BreakerError, BreakerSettings, CircuitBreaker, StateChange};
use super::client::{
    ClientError, MidtransClient, SnapshotRequest, SnapshotResponse, TransactionStatusResponse,
};

/// Hard deadline per provider call, independent of the breaker's own
/// open-state timeout.
pub const CALL_DEADLINE: Duration = Duration::from_secs(5);

/// Redis stream announcing breaker recovery to blocked token workers.
pub const RECOVERY_STREAM: &str = "midtrans:recovery";

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    /// Breaker refused the call; the provider was not contacted.
    #[error("payment provider circuit is open")]
    CircuitOpen,

    /// Call exceeded the 5s deadline.
    #[error("payment provider call timed out")]
    Timeout,

    /// The provider answered with an error, or transport failed.
    #[error("payment provider error: {0}")]
    Provider(#[from] ClientError),
}

impl PaymentError {
    /// Open-circuit refusals tell the recovery worker to stop hammering and
    /// block on the recovery stream instead.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, PaymentError::CircuitOpen)
    }
}

/// Process-wide payment gateway facade: one breaker, one client.
pub struct PaymentAdapter {
    client: MidtransClient,
    breaker: CircuitBreaker,
}

impl PaymentAdapter {
    /// Build the adapter and spawn the forwarder that publishes breaker
    /// recovery transitions onto the Redis stream.
    pub fn new(client: MidtransClient, redis: ConnectionManager) -> Arc<Self> {
        let (breaker, state_rx) = CircuitBreaker::new("midtrans", BreakerSettings::default());

        tokio::spawn(forward_recovery_signals(state_rx, redis));

        Arc::new(Self { client, breaker })
    }

    pub fn server_key(&self) -> &str {
        self.client.server_key()
    }

    pub async fn create_snapshot(
        &self,
        request: &SnapshotRequest,
    ) -> Result<SnapshotResponse, PaymentError> {
        self.guarded(|client| {
            let request = request.clone();
            async move { client.create_snapshot(&request).await }
        })
        .await
    }

    pub async fn check_transaction_status(
        &self,
        order_id: &str,
    ) -> Result<TransactionStatusResponse, PaymentError> {
        let order_id = order_id.to_string();
        self.guarded(move |client| async move { client.transaction_status(&order_id).await })
            .await
    }

    async fn guarded<F, Fut, T>(&self, operation: F) -> Result<T, PaymentError>
    where
        F: FnOnce(MidtransClient) -> Fut,
        Fut: std::future::Future<Output = Result<T, ClientError>>,
    {
        let client = self.client.clone();
        let outcome = self
            .breaker
            .call(|| async move {
                match tokio::time::timeout(CALL_DEADLINE, operation(client)).await {
                    Ok(result) => result.map_err(PaymentError::Provider),
                    Err(_elapsed) => Err(PaymentError::Timeout),
                }
            })
            .await;

        match outcome {
            Ok(result) => result,
            Err(BreakerError::Open) | Err(BreakerError::TooManyRequests) => {
                Err(PaymentError::CircuitOpen)
            }
        }
    }
}

/// Turn Open→{Closed, HalfOpen} transitions into recovery stream entries.
async fn forward_recovery_signals(
    mut state_rx: mpsc::UnboundedReceiver<StateChange>,
    mut redis: ConnectionManager,
) {
    while let Some(change) = state_rx.recv().await {
        if !change.is_recovery() {
            continue;
        }

        let timestamp = chrono::Utc::now().timestamp().to_string();
        let result: Result<String, redis::RedisError> = redis
            .xadd(
                RECOVERY_STREAM,
                "*",
                &[
                    ("circuit", "midtrans"),
                    ("state", change.to.as_str()),
                    ("time", timestamp.as_str()),
                ],
            )
            .await;

        match result {
            Ok(entry_id) => {
                tracing::info!(
                    stream = RECOVERY_STREAM,
                    entry_id = %entry_id,
                    to = change.to.as_str(),
                    "published circuit recovery signal"
                );
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to publish circuit recovery signal");
            }
        }
    }
}
