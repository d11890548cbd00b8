//! Pull-mode reconciliation: the periodic sweep over every checkable basket.
//!
//! A single coordinator fetches the checkable set, then feeds a bounded
//! two-stage pipeline: stage A polls the provider for each basket's status,
//! stage B folds each answer through the same `check_and_update_transaction`
//! the webhook path uses. Stage errors are logged and skipped; the next
//! cycle sees whatever is still unresolved, and the circuit breaker absorbs
//! provider-wide failure.

use std::sync::Arc;

use platform_contracts::{AppError, AppResult};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::entities::Transaction;
use crate::models::CheckAndUpdateTransactionRequest;
use crate::payment::TransactionStatusResponse;
use crate::repos::transaction_repo;
use crate::services::reconcile;
use crate::services::saga_service::SagaDeps;

const CHECK_WORKERS: usize = 10;
const UPDATE_WORKERS: usize = 5;
const CHANNEL_CAPACITY: usize = 10;

struct Job {
    transaction: Transaction,
    response: TransactionStatusResponse,
}

/// One reconciliation sweep.
pub async fn run_reconcile_cycle(deps: &SagaDeps) -> AppResult<()> {
    let transactions = transaction_repo::find_many_checkable(&deps.pool)
        .await
        .map_err(|e| AppError::internal("failed to find checkable transactions", e))?;

    if transactions.is_empty() {
        tracing::info!("no checkable transactions, skipping reconcile cycle");
        return Ok(());
    }

    tracing::info!(count = transactions.len(), "reconcile cycle started");

    let (check_tx, check_rx) = mpsc::channel::<Transaction>(CHANNEL_CAPACITY);
    let (update_tx, update_rx) = mpsc::channel::<Job>(CHANNEL_CAPACITY);
    let check_rx = Arc::new(Mutex::new(check_rx));
    let update_rx = Arc::new(Mutex::new(update_rx));

    // Stage A: poll provider status.
    let mut check_workers = JoinSet::new();
    for _ in 0..CHECK_WORKERS {
        let deps = deps.clone();
        let check_rx = check_rx.clone();
        let update_tx = update_tx.clone();
        check_workers.spawn(async move {
            loop {
                let Some(transaction) = check_rx.lock().await.recv().await else {
                    break;
                };

                let order_id = transaction.id.to_string();
                match deps.payment.check_transaction_status(&order_id).await {
                    Ok(response) => {
                        if update_tx.send(Job { transaction, response }).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::error!(
                            transaction_id = %order_id,
                            error = %err,
                            "status check failed, skipping basket this cycle"
                        );
                    }
                }
            }
        });
    }
    // Workers hold their own clones.
    drop(update_tx);

    // Stage B: fold answers into the state machine.
    let mut update_workers = JoinSet::new();
    for _ in 0..UPDATE_WORKERS {
        let deps = deps.clone();
        let update_rx = update_rx.clone();
        update_workers.spawn(async move {
            loop {
                let Some(job) = update_rx.lock().await.recv().await else {
                    break;
                };
                apply_job(&deps, job).await;
            }
        });
    }

    // Dispatch, then close stage A's input.
    for transaction in transactions {
        if check_tx.send(transaction).await.is_err() {
            break;
        }
    }
    drop(check_tx);

    // Stage A drains, which closes stage B's input; then stage B drains.
    while check_workers.join_next().await.is_some() {}
    while update_workers.join_next().await.is_some() {}

    tracing::info!("reconcile cycle finished");
    Ok(())
}

async fn apply_job(deps: &SagaDeps, job: Job) {
    let transaction_id = job.transaction.id;

    // Serialize the provider response into canonical bytes: that is the
    // body the signature audit trail stores, same as a webhook's raw body.
    let body = match serde_json::to_vec(&job.response) {
        Ok(body) => body,
        Err(e) => {
            tracing::error!(
                transaction_id = %transaction_id,
                error = %e,
                "failed to serialize provider response"
            );
            return;
        }
    };

    let request = match scheduler_request(transaction_id, &job.response, body) {
        Ok(request) => request,
        Err(err) => {
            tracing::error!(
                transaction_id = %transaction_id,
                message = %err.message,
                "provider response unusable"
            );
            return;
        }
    };

    if let Err(err) = reconcile::check_and_update_transaction(
        &deps.pool,
        &deps.bus,
        deps.payment.server_key(),
        &request,
    )
    .await
    {
        tracing::error!(
            transaction_id = %transaction_id,
            kind = %err.kind,
            message = %err.message,
            "scheduler reconcile failed for basket"
        );
    }
}

fn scheduler_request(
    transaction_id: Uuid,
    response: &TransactionStatusResponse,
    body: Vec<u8>,
) -> AppResult<CheckAndUpdateTransactionRequest> {
    let order_id = Uuid::parse_str(&response.order_id)
        .map_err(|_| AppError::invalid_argument("provider echoed a malformed order id"))?;
    if order_id != transaction_id {
        return Err(AppError::invalid_argument(
            "provider echoed a different order id",
        ));
    }

    Ok(CheckAndUpdateTransactionRequest {
        provider_status: response.transaction_status.clone(),
        status_code: response.status_code.clone(),
        signature_key: response.signature_key.clone(),
        settlement_time: response.settlement_time.clone(),
        order_id,
        gross_amount: response.gross_amount.clone(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(order_id: &str) -> TransactionStatusResponse {
        TransactionStatusResponse {
            order_id: order_id.to_string(),
            transaction_status: "settlement".into(),
            status_code: "200".into(),
            signature_key: "sig".into(),
            gross_amount: "450.00".into(),
            settlement_time: Some("2026-07-01 10:00:00".into()),
            payment_type: None,
        }
    }

    #[test]
    fn scheduler_request_carries_canonical_bytes() {
        let id = Uuid::new_v4();
        let resp = response(&id.to_string());
        let body = serde_json::to_vec(&resp).unwrap();

        let request = scheduler_request(id, &resp, body.clone()).unwrap();
        assert_eq!(request.order_id, id);
        assert_eq!(request.provider_status, "settlement");
        assert_eq!(request.body, body);
    }

    #[test]
    fn mismatched_order_id_is_rejected() {
        let id = Uuid::new_v4();
        let resp = response(&Uuid::new_v4().to_string());
        assert!(scheduler_request(id, &resp, vec![]).is_err());

        let resp = response("not-a-uuid");
        assert!(scheduler_request(id, &resp, vec![]).is_err());
    }
}
