//! Bounded exponential-backoff retry for bus interactions.
//!
//! Used on the publish side (a lifecycle event that fails to persist is
//! retried a few times before the caller decides between surfacing the error
//! and logging it) and anywhere else a short transient window is worth
//! riding out in-process. Redelivery of *consumed* messages is the stream's
//! job, not this helper's.

use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of attempts (first try included)
    pub max_attempts: u32,
    /// Initial backoff, doubled after each failure
    pub initial_backoff: Duration,
    /// Ceiling for the doubling
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Run `operation` until it succeeds or `max_attempts` is exhausted.
/// Returns the last error on exhaustion.
pub async fn retry_with_backoff<F, Fut, T, E>(
    operation: F,
    config: &RetryConfig,
    context: &str,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display + Send,
{
    let mut attempt = 0;
    let mut backoff = config.initial_backoff;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(context, attempt, "operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) => {
                if attempt >= config.max_attempts {
                    warn!(context, attempts = attempt, error = %e, "operation failed after max retries");
                    return Err(e);
                }

                warn!(
                    context,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "operation failed, backing off"
                );

                sleep(backoff).await;
                backoff = std::cmp::min(backoff * 2, config.max_backoff);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn quick_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
        }
    }

    #[tokio::test]
    async fn first_attempt_success_needs_no_backoff() {
        let result = retry_with_backoff(
            || async { Ok::<_, String>("published") },
            &quick_config(3),
            "publish_committed",
        )
        .await;

        assert_eq!(result, Ok("published"));
    }

    #[tokio::test]
    async fn recovers_within_attempt_limit() {
        let calls = Arc::new(AtomicU32::new(0));
        let counted = calls.clone();

        let result = retry_with_backoff(
            || {
                let calls = counted.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("stream unavailable".to_string())
                    } else {
                        Ok(())
                    }
                }
            },
            &quick_config(3),
            "publish_settled",
        )
        .await;

        assert_eq!(result, Ok(()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn surfaces_last_error_on_exhaustion() {
        let result = retry_with_backoff(
            || async { Err::<(), _>("still down") },
            &quick_config(2),
            "publish_canceled",
        )
        .await;

        assert_eq!(result, Err("still down"));
    }
}
