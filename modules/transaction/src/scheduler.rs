//! Interval runner for the reconcile sweep.

use std::time::Duration;

use crate::services::saga_service::SagaDeps;
use crate::services::scheduler_service;

/// A cycle that cannot finish in this window is cancelled; in-flight workers
/// are dropped and the next tick starts clean.
pub const CYCLE_DEADLINE: Duration = Duration::from_secs(240);

pub fn start_scheduler(deps: SagaDeps, period: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(period_secs = period.as_secs(), "transaction check scheduler started");

        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;

            match tokio::time::timeout(
                CYCLE_DEADLINE,
                scheduler_service::run_reconcile_cycle(&deps),
            )
            .await
            {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::error!(
                        kind = %err.kind,
                        message = %err.message,
                        "reconcile cycle failed"
                    );
                }
                Err(_elapsed) => {
                    tracing::error!(
                        deadline_secs = CYCLE_DEADLINE.as_secs(),
                        "reconcile cycle exceeded deadline, cancelled"
                    );
                }
            }
        }
    })
}
