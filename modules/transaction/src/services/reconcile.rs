//! The reconciliation state machine.
//!
//! One function subsumes the webhook and the scheduler: both deliver a
//! provider status snapshot, and [`check_and_update_transaction`] folds it
//! into the basket row under `FOR UPDATE`. The decision itself,
//! [`evaluate`], is a pure function over (saga position, provider status,
//! settlement time), which is where every tricky case lives: late
//! settlements, absorbing states, and the 5-minute grace window.

use chrono::{DateTime, Duration, Utc};
use event_bus::consumer_retry::{retry_with_backoff, RetryConfig};
use event_bus::EventBus;
use platform_contracts::events::{TransactionEvent, TransactionEventStatus};
use platform_contracts::timeparse::parse_provider_time;
use platform_contracts::{AppError, AppResult, ErrorKind};
use sha2::{Digest, Sha512};
use sqlx::PgPool;
use std::sync::Arc;

use crate::entities::{CustomerStatus, InternalStatus, ProviderStatus};
use crate::models::CheckAndUpdateTransactionRequest;
use crate::repos::transaction_repo;

pub const MSG_TRANSACTION_NOT_FOUND: &str = "Transaction not found for the given order id";
pub const MSG_INVALID_SIGNATURE: &str = "Invalid signature key";

/// Provider settlements reported up to this long after our own expiry are
/// still honoured.
pub fn late_settlement_grace() -> Duration {
    Duration::minutes(5)
}

/// `hex(SHA-512(order_id ‖ status_code ‖ gross_amount ‖ server_key))`,
/// the provider's notification signature. Comparison is case-sensitive on
/// the lowercase hex this function produces.
pub fn compute_signature(
    order_id: &str,
    status_code: &str,
    gross_amount: &str,
    server_key: &str,
) -> String {
    let mut hasher = Sha512::new();
    hasher.update(order_id.as_bytes());
    hasher.update(status_code.as_bytes());
    hasher.update(gross_amount.as_bytes());
    hasher.update(server_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// What the state machine decided for one notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    /// Internal status is already absorbing; nothing may change.
    Absorbed,
    /// Statuses stay as they are, but the provider echo is still persisted.
    NoTransition,
    /// Move the basket.
    Transition(Outcome),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub customer: CustomerStatus,
    pub internal: InternalStatus,
    pub clear_token: bool,
    pub set_payment_at_now: bool,
    pub settlement_at: Option<DateTime<Utc>>,
}

/// Decide the transition for a provider snapshot. Pure: all clock inputs
/// arrive as arguments.
///
/// `updated_at` is the basket row's last mutation time; for a short-TTL
/// expired basket that is the moment it expired, which anchors the
/// late-settlement grace window.
pub fn evaluate(
    internal: InternalStatus,
    updated_at: DateTime<Utc>,
    provider: &ProviderStatus,
    settlement_time: Option<DateTime<Utc>>,
) -> AppResult<Evaluation> {
    if !internal.is_checkable() {
        return Ok(Evaluation::Absorbed);
    }

    if internal == InternalStatus::Expired {
        // Tentatively expired: only a provider settlement can still rescue
        // (or strand) the basket.
        if *provider == ProviderStatus::Settlement {
            let settled_at = settlement_time.ok_or_else(|| {
                AppError::invalid_argument("settlement notification without settlement_time")
            })?;

            let grace_deadline = updated_at + late_settlement_grace();
            if settled_at <= grace_deadline {
                // Buyer paid in time from the provider's point of view.
                return Ok(Evaluation::Transition(Outcome {
                    customer: CustomerStatus::Success,
                    internal: InternalStatus::ExpiredCheckedValid,
                    clear_token: true,
                    set_payment_at_now: true,
                    settlement_at: Some(settled_at),
                }));
            }

            // Money arrived past the grace window: hold it for manual
            // resolution, customer outcome stays expired.
            return Ok(Evaluation::Transition(Outcome {
                customer: CustomerStatus::Expired,
                internal: InternalStatus::LateSettlement,
                clear_token: true,
                set_payment_at_now: false,
                settlement_at: Some(settled_at),
            }));
        }

        // Any non-settlement answer confirms the expiry.
        return Ok(Evaluation::Transition(Outcome {
            customer: CustomerStatus::Expired,
            internal: InternalStatus::ExpiredCheckedInvalid,
            clear_token: false,
            set_payment_at_now: false,
            settlement_at: None,
        }));
    }

    // Live basket: PENDING or TOKEN_READY.
    let outcome = match provider {
        ProviderStatus::Capture | ProviderStatus::Settlement => {
            let settled_at = settlement_time.ok_or_else(|| {
                AppError::invalid_argument("settlement notification without settlement_time")
            })?;
            Outcome {
                customer: CustomerStatus::Success,
                internal: InternalStatus::Settled,
                clear_token: true,
                set_payment_at_now: true,
                settlement_at: Some(settled_at),
            }
        }
        ProviderStatus::Pending => Outcome {
            customer: CustomerStatus::Pending,
            internal: InternalStatus::Pending,
            clear_token: false,
            set_payment_at_now: false,
            settlement_at: None,
        },
        ProviderStatus::Expire => Outcome {
            customer: CustomerStatus::Expired,
            internal: InternalStatus::ExpiredCheckedInvalid,
            clear_token: true,
            set_payment_at_now: false,
            settlement_at: None,
        },
        ProviderStatus::Failure | ProviderStatus::Deny => Outcome {
            customer: CustomerStatus::Failed,
            internal: InternalStatus::Failed,
            clear_token: true,
            set_payment_at_now: false,
            settlement_at: None,
        },
        ProviderStatus::Cancel => Outcome {
            customer: CustomerStatus::Canceled,
            internal: InternalStatus::CanceledBySystem,
            clear_token: true,
            set_payment_at_now: false,
            settlement_at: None,
        },
        ProviderStatus::Unknown(raw) => {
            // Persist the echo, change nothing.
            tracing::warn!(provider_status = %raw, "unknown provider status, statuses unchanged");
            return Ok(Evaluation::NoTransition);
        }
    };

    Ok(Evaluation::Transition(outcome))
}

/// The event a customer outcome demands on the bus, if any.
pub fn event_for_outcome(customer: CustomerStatus) -> Option<TransactionEventStatus> {
    match customer {
        CustomerStatus::Canceled => Some(TransactionEventStatus::Canceled),
        CustomerStatus::Expired | CustomerStatus::Failed => Some(TransactionEventStatus::Expired),
        CustomerStatus::Success => Some(TransactionEventStatus::Settled),
        CustomerStatus::Pending
        | CustomerStatus::Refunding
        | CustomerStatus::Refunded => None,
    }
}

/// Fold one provider notification into the basket, then emit the resulting
/// lifecycle event (best-effort, post-commit).
pub async fn check_and_update_transaction(
    pool: &PgPool,
    bus: &Arc<dyn EventBus>,
    server_key: &str,
    request: &CheckAndUpdateTransactionRequest,
) -> AppResult<()> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| AppError::internal("failed to begin reconcile transaction", e))?;

    let Some(mut transaction) =
        transaction_repo::find_by_id(&mut *tx, request.order_id, true)
            .await
            .map_err(|e| AppError::internal("failed to load transaction", e))?
    else {
        return Err(AppError::not_found(MSG_TRANSACTION_NOT_FOUND));
    };

    let expected = compute_signature(
        &transaction.id.to_string(),
        &request.status_code,
        &request.gross_amount,
        server_key,
    );
    if expected != request.signature_key {
        tracing::warn!(
            transaction_id = %transaction.id,
            "provider notification failed signature check"
        );
        return Err(AppError::forbidden(MSG_INVALID_SIGNATURE));
    }

    let provider = ProviderStatus::parse(&request.provider_status);
    let settlement_time = match request.settlement_time.as_deref() {
        Some(raw) if provider == ProviderStatus::Settlement || provider == ProviderStatus::Capture => {
            Some(parse_provider_time(raw)?)
        }
        _ => None,
    };

    let evaluation = evaluate(
        transaction.internal_status,
        transaction.updated_at,
        &provider,
        settlement_time,
    )?;

    let outcome = match evaluation {
        Evaluation::Absorbed => {
            tracing::warn!(
                transaction_id = %transaction.id,
                internal_status = ?transaction.internal_status,
                "transaction already final, ignoring notification"
            );
            tx.commit()
                .await
                .map_err(|e| AppError::internal("failed to commit no-op reconcile", e))?;
            return Ok(());
        }
        Evaluation::NoTransition => None,
        Evaluation::Transition(outcome) => Some(outcome),
    };

    let raw_callback: serde_json::Value = serde_json::from_slice(&request.body)
        .map_err(|_| AppError::invalid_argument("callback body is not valid JSON"))?;

    if let Some(outcome) = &outcome {
        transaction.transaction_status = outcome.customer;
        transaction.internal_status = outcome.internal;
        if outcome.clear_token {
            transaction.snap_token = None;
        }
        if outcome.set_payment_at_now {
            transaction.payment_at = Some(Utc::now());
        }
        if outcome.settlement_at.is_some() {
            transaction.external_settlement_at = outcome.settlement_at;
        }
    }
    transaction.external_status = Some(request.provider_status.clone());
    transaction.external_callback_response = Some(raw_callback);

    let affected = transaction_repo::update_callback(&mut *tx, &transaction)
        .await
        .map_err(|e| AppError::internal("failed to persist reconcile outcome", e))?;
    if affected == 0 {
        return Err(AppError::new(
            ErrorKind::Internal,
            "no rows affected persisting reconcile outcome",
        ));
    }

    tx.commit()
        .await
        .map_err(|e| AppError::internal("failed to commit reconcile transaction", e))?;

    tracing::info!(
        transaction_id = %transaction.id,
        customer_status = ?transaction.transaction_status,
        internal_status = ?transaction.internal_status,
        provider_status = %request.provider_status,
        "transaction reconciled"
    );

    // Post-commit, best-effort: the row is the source of truth, the event is
    // the inventory side's cue. Publish failures are logged; the scheduler
    // re-observing the row cannot re-emit (state is now absorbing), so the
    // retry here is the last line.
    if let Some(outcome) = outcome {
        if let Some(status) = event_for_outcome(outcome.customer) {
            publish_event(bus, transaction.id, status).await;
        }
    }

    Ok(())
}

pub(crate) async fn publish_event(
    bus: &Arc<dyn EventBus>,
    transaction_id: uuid::Uuid,
    status: TransactionEventStatus,
) {
    let event = TransactionEvent::new(transaction_id, status);
    let payload = match serde_json::to_vec(&event) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!(transaction_id = %transaction_id, error = %e, "failed to encode event");
            return;
        }
    };

    let subject = status.subject();
    let result = retry_with_backoff(
        || {
            let payload = payload.clone();
            async move { bus.publish(subject, payload).await }
        },
        &RetryConfig::default(),
        subject,
    )
    .await;

    if let Err(e) = result {
        tracing::error!(
            transaction_id = %transaction_id,
            subject,
            error = %e,
            "failed to publish lifecycle event"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn signature_matches_known_vector() {
        // SHA-512 of "order-1200450.00secret", independently computed.
        let signature = compute_signature("order-1", "200", "450.00", "secret");
        assert_eq!(signature.len(), 128);
        assert_eq!(signature, compute_signature("order-1", "200", "450.00", "secret"));
        // Any component change must alter the digest.
        assert_ne!(signature, compute_signature("order-2", "200", "450.00", "secret"));
        assert_ne!(signature, compute_signature("order-1", "201", "450.00", "secret"));
        assert_ne!(signature, compute_signature("order-1", "200", "450.01", "secret"));
        assert_ne!(signature, compute_signature("order-1", "200", "450.00", "Secret"));
    }

    #[test]
    fn live_settlement_settles() {
        let updated = at("2026-07-01T10:00:00Z");
        let evaluation = evaluate(
            InternalStatus::TokenReady,
            updated,
            &ProviderStatus::Settlement,
            Some(at("2026-07-01T10:00:30Z")),
        )
        .unwrap();

        let Evaluation::Transition(outcome) = evaluation else {
            panic!("expected transition");
        };
        assert_eq!(outcome.customer, CustomerStatus::Success);
        assert_eq!(outcome.internal, InternalStatus::Settled);
        assert!(outcome.clear_token);
        assert!(outcome.set_payment_at_now);
        assert_eq!(outcome.settlement_at, Some(at("2026-07-01T10:00:30Z")));
    }

    #[test]
    fn live_capture_settles_too() {
        let evaluation = evaluate(
            InternalStatus::Pending,
            at("2026-07-01T10:00:00Z"),
            &ProviderStatus::Capture,
            Some(at("2026-07-01T10:00:30Z")),
        )
        .unwrap();
        assert!(matches!(
            evaluation,
            Evaluation::Transition(Outcome {
                internal: InternalStatus::Settled,
                ..
            })
        ));
    }

    #[test]
    fn live_pending_stays_pending() {
        let evaluation = evaluate(
            InternalStatus::TokenReady,
            at("2026-07-01T10:00:00Z"),
            &ProviderStatus::Pending,
            None,
        )
        .unwrap();

        let Evaluation::Transition(outcome) = evaluation else {
            panic!("expected transition");
        };
        assert_eq!(outcome.customer, CustomerStatus::Pending);
        assert_eq!(outcome.internal, InternalStatus::Pending);
        assert!(!outcome.clear_token);
    }

    #[test]
    fn live_terminal_provider_statuses() {
        let updated = at("2026-07-01T10:00:00Z");

        let cases = [
            (
                ProviderStatus::Expire,
                CustomerStatus::Expired,
                InternalStatus::ExpiredCheckedInvalid,
            ),
            (
                ProviderStatus::Failure,
                CustomerStatus::Failed,
                InternalStatus::Failed,
            ),
            (
                ProviderStatus::Deny,
                CustomerStatus::Failed,
                InternalStatus::Failed,
            ),
            (
                ProviderStatus::Cancel,
                CustomerStatus::Canceled,
                InternalStatus::CanceledBySystem,
            ),
        ];

        for (provider, customer, internal) in cases {
            let Evaluation::Transition(outcome) =
                evaluate(InternalStatus::Pending, updated, &provider, None).unwrap()
            else {
                panic!("expected transition for {provider:?}");
            };
            assert_eq!(outcome.customer, customer, "{provider:?}");
            assert_eq!(outcome.internal, internal, "{provider:?}");
            assert!(outcome.clear_token, "{provider:?} must clear the token");
        }
    }

    #[test]
    fn expired_settlement_within_grace_is_valid() {
        // Expired at 10:00, settled 10:00:25 → 25s ≤ 5min.
        let evaluation = evaluate(
            InternalStatus::Expired,
            at("2026-07-01T10:00:00Z"),
            &ProviderStatus::Settlement,
            Some(at("2026-07-01T10:00:25Z")),
        )
        .unwrap();

        let Evaluation::Transition(outcome) = evaluation else {
            panic!("expected transition");
        };
        assert_eq!(outcome.customer, CustomerStatus::Success);
        assert_eq!(outcome.internal, InternalStatus::ExpiredCheckedValid);
        assert!(outcome.set_payment_at_now);
    }

    #[test]
    fn expired_settlement_at_exact_grace_boundary_is_valid() {
        let evaluation = evaluate(
            InternalStatus::Expired,
            at("2026-07-01T10:00:00Z"),
            &ProviderStatus::Settlement,
            Some(at("2026-07-01T10:05:00Z")),
        )
        .unwrap();

        assert!(matches!(
            evaluation,
            Evaluation::Transition(Outcome {
                internal: InternalStatus::ExpiredCheckedValid,
                ..
            })
        ));
    }

    #[test]
    fn expired_settlement_past_grace_is_late() {
        // Expired at 10:00, settled 10:05:40 → 340s > 300s.
        let evaluation = evaluate(
            InternalStatus::Expired,
            at("2026-07-01T10:00:00Z"),
            &ProviderStatus::Settlement,
            Some(at("2026-07-01T10:05:40Z")),
        )
        .unwrap();

        let Evaluation::Transition(outcome) = evaluation else {
            panic!("expected transition");
        };
        assert_eq!(outcome.customer, CustomerStatus::Expired);
        assert_eq!(outcome.internal, InternalStatus::LateSettlement);
        assert!(!outcome.set_payment_at_now);
        assert!(outcome.settlement_at.is_some(), "held money must be recorded");
    }

    #[test]
    fn expired_non_settlement_confirms_expiry() {
        for provider in [
            ProviderStatus::Pending,
            ProviderStatus::Expire,
            ProviderStatus::Deny,
            ProviderStatus::Capture,
        ] {
            let Evaluation::Transition(outcome) = evaluate(
                InternalStatus::Expired,
                at("2026-07-01T10:00:00Z"),
                &provider,
                Some(at("2026-07-01T10:00:10Z")),
            )
            .unwrap() else {
                panic!("expected transition for {provider:?}");
            };
            assert_eq!(outcome.internal, InternalStatus::ExpiredCheckedInvalid);
            assert_eq!(outcome.customer, CustomerStatus::Expired);
        }
    }

    #[test]
    fn absorbing_states_ignore_everything() {
        for internal in [
            InternalStatus::Settled,
            InternalStatus::ExpiredCheckedInvalid,
            InternalStatus::ExpiredCheckedValid,
            InternalStatus::LateSettlement,
            InternalStatus::CanceledBySystem,
            InternalStatus::CanceledByUser,
            InternalStatus::Failed,
            InternalStatus::Refunded,
        ] {
            let evaluation = evaluate(
                internal,
                at("2026-07-01T10:00:00Z"),
                &ProviderStatus::Settlement,
                Some(at("2026-07-01T10:00:10Z")),
            )
            .unwrap();
            assert_eq!(evaluation, Evaluation::Absorbed, "{internal:?}");
        }
    }

    #[test]
    fn unknown_provider_status_changes_nothing() {
        let evaluation = evaluate(
            InternalStatus::TokenReady,
            at("2026-07-01T10:00:00Z"),
            &ProviderStatus::Unknown("chargeback".into()),
            None,
        )
        .unwrap();
        assert_eq!(evaluation, Evaluation::NoTransition);
    }

    #[test]
    fn settlement_without_time_is_rejected() {
        let err = evaluate(
            InternalStatus::Pending,
            at("2026-07-01T10:00:00Z"),
            &ProviderStatus::Settlement,
            None,
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }

    #[test]
    fn outcome_events_follow_customer_status() {
        assert_eq!(
            event_for_outcome(CustomerStatus::Success),
            Some(TransactionEventStatus::Settled)
        );
        assert_eq!(
            event_for_outcome(CustomerStatus::Canceled),
            Some(TransactionEventStatus::Canceled)
        );
        assert_eq!(
            event_for_outcome(CustomerStatus::Expired),
            Some(TransactionEventStatus::Expired)
        );
        assert_eq!(
            event_for_outcome(CustomerStatus::Failed),
            Some(TransactionEventStatus::Expired)
        );
        assert_eq!(event_for_outcome(CustomerStatus::Pending), None);
    }
}
