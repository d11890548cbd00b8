//! The purchase saga's create path and read API.
//!
//! Create sequencing is what guarantees the stock invariant: inventory
//! reserves first (its own transaction), the basket persists second (local
//! transaction), and a local failure after a successful reservation
//! publishes `transaction.canceled` so inventory compensates. After that the
//! basket is in the stream's hands; expiry tasks and the reconciler drive
//! it to a terminal state.

use std::sync::Arc;

use event_bus::EventBus;
use inventory_client::{InventoryClient, ReserveLine};
use platform_contracts::events::TransactionEventStatus;
use platform_contracts::pagination::{self, PageMetadata};
use platform_contracts::{AppError, AppResult};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{
    CreateTransactionRequest, CreateTransactionResponse, TransactionDetailResponse,
    TransactionResponse,
};
use crate::payment::{PaymentAdapter, SnapshotRequest};
use crate::repos::{detail_repo, transaction_repo};
use crate::services::reconcile;
use crate::tasks::ExpiryTasks;

/// Everything the saga paths need, wired once in `main`.
#[derive(Clone)]
pub struct SagaDeps {
    pub pool: PgPool,
    pub bus: Arc<dyn EventBus>,
    pub inventory: InventoryClient,
    pub payment: Arc<PaymentAdapter>,
    pub tasks: ExpiryTasks,
    pub redis: redis::aio::ConnectionManager,
}

pub async fn create_transaction(
    deps: &SagaDeps,
    user_id: Uuid,
    request: &CreateTransactionRequest,
) -> AppResult<CreateTransactionResponse> {
    request.validate()?;

    let transaction_id = Uuid::new_v4();
    tracing::info!(
        transaction_id = %transaction_id,
        user_id = %user_id,
        lines = request.products.len(),
        "creating transaction"
    );

    // Step 1: reserve stock. A failure here ends the saga with nothing
    // persisted anywhere.
    let reserve_lines: Vec<ReserveLine> = request
        .products
        .iter()
        .map(|line| ReserveLine {
            product_id: line.product_id,
            quantity: line.quantity,
            price: line.price,
        })
        .collect();

    deps.inventory
        .check_product_and_reserve(transaction_id, &reserve_lines)
        .await
        .map_err(|err| {
            tracing::warn!(
                transaction_id = %transaction_id,
                kind = %err.kind,
                message = %err.message,
                "reservation refused"
            );
            err
        })?;

    // Step 2: persist basket + lines locally. From here on inventory holds
    // stock for us, so a failure must publish the compensation event.
    if let Err(err) = insert_basket(&deps.pool, transaction_id, user_id, request).await {
        tracing::error!(
            transaction_id = %transaction_id,
            message = %err.message,
            "basket persist failed after reservation, compensating"
        );
        reconcile::publish_event(&deps.bus, transaction_id, TransactionEventStatus::Canceled)
            .await;
        return Err(err);
    }

    // Step 3: announce the commit; inventory moves reservations to
    // COMMITTED (no stock movement).
    reconcile::publish_event(&deps.bus, transaction_id, TransactionEventStatus::Committed).await;

    // Step 4: mint the payment token. Failure is not fatal: the basket
    // stays PENDING, the recovery worker keeps trying, and the scheduler or
    // the expiry path reclaims the stock if no token ever arrives.
    let snapshot_request = SnapshotRequest {
        order_id: transaction_id.to_string(),
        gross_amount: request.total_price(),
        email: None,
    };

    match deps.payment.create_snapshot(&snapshot_request).await {
        Ok(snapshot) => {
            update_transaction_token(&deps.pool, &deps.tasks, transaction_id, &snapshot.token)
                .await?;

            tracing::info!(transaction_id = %transaction_id, "transaction created with token");
            Ok(CreateTransactionResponse {
                transaction_id,
                snap_token: Some(snapshot.token),
                redirect_url: Some(snapshot.redirect_url),
            })
        }
        Err(err) => {
            tracing::warn!(
                transaction_id = %transaction_id,
                error = %err,
                "snapshot creation failed, handing off to recovery worker"
            );
            crate::payment::recovery::spawn_token_recovery(
                deps.clone(),
                snapshot_request,
                transaction_id,
                err.is_circuit_open(),
            );

            Ok(CreateTransactionResponse {
                transaction_id,
                snap_token: None,
                redirect_url: None,
            })
        }
    }
}

async fn insert_basket(
    pool: &PgPool,
    transaction_id: Uuid,
    user_id: Uuid,
    request: &CreateTransactionRequest,
) -> AppResult<()> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| AppError::internal("failed to begin create transaction", e))?;

    transaction_repo::insert(&mut *tx, transaction_id, user_id, request.total_price())
        .await
        .map_err(|e| AppError::internal("failed to insert transaction", e))?;

    detail_repo::insert_many(&mut *tx, transaction_id, &request.products)
        .await
        .map_err(|e| AppError::internal("failed to insert transaction details", e))?;

    tx.commit()
        .await
        .map_err(|e| AppError::internal("failed to commit create transaction", e))?;

    Ok(())
}

/// Attach a freshly minted token and start both expiry clocks.
///
/// Guarded: if the basket already left PENDING (expired while the provider
/// was slow), the token is discarded and no deadlines are scheduled.
pub async fn update_transaction_token(
    pool: &PgPool,
    tasks: &ExpiryTasks,
    transaction_id: Uuid,
    token: &str,
) -> AppResult<()> {
    let mut conn = pool
        .acquire()
        .await
        .map_err(|e| AppError::internal("failed to acquire connection", e))?;

    let affected = transaction_repo::update_token_if_pending(&mut *conn, transaction_id, token)
        .await
        .map_err(|e| AppError::internal("failed to persist snapshot token", e))?;

    if affected == 0 {
        tracing::warn!(
            transaction_id = %transaction_id,
            "token arrived for a basket no longer pending, discarding"
        );
        return Ok(());
    }

    tasks.enqueue_expire(transaction_id).await?;
    tasks.enqueue_expire_final(transaction_id).await?;

    tracing::info!(transaction_id = %transaction_id, "token ready, expiry deadlines scheduled");
    Ok(())
}

// --- read API ---

pub async fn user_search(
    pool: &PgPool,
    user_id: Uuid,
    page: Option<i64>,
    limit: Option<i64>,
) -> AppResult<(Vec<TransactionResponse>, PageMetadata)> {
    let (page, limit) = pagination::sanitize(page, limit);

    let rows = transaction_repo::find_many_by_user_id(pool, user_id, page, limit)
        .await
        .map_err(|e| AppError::internal("failed to list transactions", e))?;

    let total = rows.first().map(|r| r.total_data).unwrap_or(0);
    let responses = rows.iter().map(TransactionResponse::from).collect();
    Ok((responses, pagination::calculate(total, page, limit)))
}

pub async fn user_search_with_detail(
    pool: &PgPool,
    user_id: Uuid,
    page: Option<i64>,
    limit: Option<i64>,
) -> AppResult<(Vec<TransactionResponse>, PageMetadata)> {
    let (page, limit) = pagination::sanitize(page, limit);

    let rows =
        transaction_repo::find_many_with_detail_by_user_id(pool, user_id, page, limit)
            .await
            .map_err(|e| AppError::internal("failed to list transaction details", e))?;

    Ok(group_joined_rows(rows, page, limit))
}

pub async fn owner_search_with_detail(
    deps: &SagaDeps,
    user_id: Uuid,
    product_id: Uuid,
    page: Option<i64>,
    limit: Option<i64>,
) -> AppResult<(Vec<TransactionResponse>, PageMetadata)> {
    // Ownership gate: the inventory service is the authority on who owns
    // the product.
    deps.inventory.owner_get_product(user_id, product_id).await?;

    let (page, limit) = pagination::sanitize(page, limit);

    let rows =
        transaction_repo::find_many_with_detail_by_product_id(&deps.pool, product_id, page, limit)
            .await
            .map_err(|e| AppError::internal("failed to list owner transactions", e))?;

    Ok(group_joined_rows(rows, page, limit))
}

fn group_joined_rows(
    rows: Vec<crate::entities::TransactionDetailJoined>,
    page: i64,
    limit: i64,
) -> (Vec<TransactionResponse>, PageMetadata) {
    let total = rows.first().map(|r| r.total_data).unwrap_or(0);

    let mut responses: Vec<TransactionResponse> = Vec::new();
    for row in rows {
        let detail = TransactionDetailResponse {
            id: row.detail_id,
            product_id: row.detail_product_id,
            quantity: row.detail_quantity,
            price: row.detail_price,
        };

        match responses.last_mut().filter(|r| r.id == row.id) {
            Some(existing) => {
                if let Some(details) = existing.transaction_details.as_mut() {
                    details.push(detail);
                }
            }
            None => {
                responses.push(TransactionResponse {
                    id: row.id,
                    user_id: row.user_id,
                    total_price: row.total_price,
                    transaction_status: row.transaction_status,
                    checkout_at: row.checkout_at,
                    payment_at: row.payment_at,
                    updated_at: row.updated_at,
                    transaction_details: Some(vec![detail]),
                });
            }
        }
    }

    (responses, pagination::calculate(total, page, limit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{CustomerStatus, TransactionDetailJoined};
    use chrono::Utc;

    fn joined_row(
        basket: Uuid,
        detail: Uuid,
        total_data: i64,
    ) -> TransactionDetailJoined {
        TransactionDetailJoined {
            total_data,
            id: basket,
            user_id: Uuid::new_v4(),
            total_price: 450,
            transaction_status: CustomerStatus::Pending,
            checkout_at: Utc::now(),
            payment_at: None,
            updated_at: Utc::now(),
            detail_id: detail,
            detail_product_id: Uuid::new_v4(),
            detail_quantity: 1,
            detail_price: 450,
        }
    }

    #[test]
    fn joined_rows_group_by_basket() {
        let basket_a = Uuid::new_v4();
        let basket_b = Uuid::new_v4();

        let rows = vec![
            joined_row(basket_a, Uuid::new_v4(), 2),
            joined_row(basket_a, Uuid::new_v4(), 2),
            joined_row(basket_b, Uuid::new_v4(), 2),
        ];

        let (responses, paging) = group_joined_rows(rows, 1, 10);
        assert_eq!(responses.len(), 2);
        assert_eq!(
            responses[0].transaction_details.as_ref().unwrap().len(),
            2
        );
        assert_eq!(
            responses[1].transaction_details.as_ref().unwrap().len(),
            1
        );
        assert_eq!(paging.total_items, 2);
    }

    #[test]
    fn empty_join_produces_empty_page() {
        let (responses, paging) = group_joined_rows(vec![], 1, 10);
        assert!(responses.is_empty());
        assert_eq!(paging.total_items, 0);
        assert_eq!(paging.total_pages, 0);
    }
}
