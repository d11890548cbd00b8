//! Two-tier expiry transitions driven by the delayed-task queue.
//!
//! Both handlers are idempotent no-ops for any basket that already advanced
//! past the live states, which is what makes the tasks safe under
//! at-least-once task delivery and racing webhooks.

use std::sync::Arc;

use event_bus::EventBus;
use platform_contracts::events::TransactionEventStatus;
use platform_contracts::{AppError, AppResult};
use sqlx::PgPool;
use uuid::Uuid;

use crate::entities::{CustomerStatus, InternalStatus};
use crate::repos::transaction_repo;
use crate::services::reconcile;

/// Short-TTL expiry: tentatively expire a basket the buyer never paid.
///
/// No event is published: a settlement may still arrive inside the grace
/// window, and the final-TTL task settles the ambiguity.
pub async fn expire_pending_transaction(pool: &PgPool, transaction_id: Uuid) -> AppResult<()> {
    let transitioned = update_status_if_live(
        pool,
        transaction_id,
        CustomerStatus::Expired,
        InternalStatus::Expired,
    )
    .await?;

    if transitioned {
        tracing::info!(transaction_id = %transaction_id, "transaction tentatively expired");
    }
    Ok(())
}

/// Final-TTL expiry: a basket still unresolved after the full waiting period
/// is declared invalid, and only now does inventory learn about it.
pub async fn expire_final_transaction(
    pool: &PgPool,
    bus: &Arc<dyn EventBus>,
    transaction_id: Uuid,
) -> AppResult<()> {
    let transitioned = update_status_if_live(
        pool,
        transaction_id,
        CustomerStatus::Expired,
        InternalStatus::ExpiredCheckedInvalid,
    )
    .await?;

    // Emit only when this task performed the transition: a basket that
    // late-settled (or was already invalidated by the reconciler) must not
    // trigger a stock restore.
    if transitioned {
        tracing::info!(transaction_id = %transaction_id, "transaction finally expired");
        reconcile::publish_event(bus, transaction_id, TransactionEventStatus::Expired).await;
    }

    Ok(())
}

/// Guarded status update: only baskets still in a live saga state move.
/// Returns whether a transition happened.
async fn update_status_if_live(
    pool: &PgPool,
    transaction_id: Uuid,
    customer: CustomerStatus,
    internal: InternalStatus,
) -> AppResult<bool> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| AppError::internal("failed to begin expiry transaction", e))?;

    let Some(transaction) = transaction_repo::find_by_id(&mut *tx, transaction_id, true)
        .await
        .map_err(|e| AppError::internal("failed to load transaction for expiry", e))?
    else {
        return Err(AppError::not_found(reconcile::MSG_TRANSACTION_NOT_FOUND));
    };

    if !transaction.internal_status.is_checkable() {
        tracing::info!(
            transaction_id = %transaction_id,
            internal_status = ?transaction.internal_status,
            "transaction already resolved, expiry is a no-op"
        );
        tx.commit()
            .await
            .map_err(|e| AppError::internal("failed to commit no-op expiry", e))?;
        return Ok(false);
    }

    let affected =
        transaction_repo::update_status(&mut *tx, transaction_id, customer, internal, true)
            .await
            .map_err(|e| AppError::internal("failed to update transaction status", e))?;
    if affected == 0 {
        tracing::error!(
            transaction_id = %transaction_id,
            "no rows affected updating status under lock"
        );
        return Err(AppError::new(
            platform_contracts::ErrorKind::Internal,
            "no rows affected updating transaction status",
        ));
    }

    tx.commit()
        .await
        .map_err(|e| AppError::internal("failed to commit expiry transaction", e))?;

    Ok(true)
}
