//! Expiry task definitions: the producer facade enqueuing the two-tier
//! deadlines and the handlers the task worker dispatches to.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use event_bus::EventBus;
use platform_contracts::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use taskqueue::{TaskError, TaskHandler, TaskQueue};
use uuid::Uuid;

use crate::services::cancelation_service;

pub const TASK_TRANSACTION_EXPIRE: &str = "transaction:expire";
pub const TASK_TRANSACTION_EXPIRE_FINAL: &str = "transaction:expire:final";

#[derive(Debug, Serialize, Deserialize)]
pub struct TransactionExpirePayload {
    pub transaction_id: Uuid,
}

/// Producer facade: enqueues both deadlines for a basket whose token just
/// became ready.
#[derive(Clone)]
pub struct ExpiryTasks {
    queue: TaskQueue,
    short_ttl: Duration,
    final_ttl: Duration,
}

impl ExpiryTasks {
    pub fn new(queue: TaskQueue, short_ttl: Duration, final_ttl: Duration) -> Self {
        Self {
            queue,
            short_ttl,
            final_ttl,
        }
    }

    pub async fn enqueue_expire(&self, transaction_id: Uuid) -> AppResult<()> {
        self.queue
            .enqueue_in(
                TASK_TRANSACTION_EXPIRE,
                &TransactionExpirePayload { transaction_id },
                self.short_ttl,
            )
            .await
            .map_err(|e| AppError::internal("failed to enqueue expire task", e))?;
        Ok(())
    }

    pub async fn enqueue_expire_final(&self, transaction_id: Uuid) -> AppResult<()> {
        self.queue
            .enqueue_in(
                TASK_TRANSACTION_EXPIRE_FINAL,
                &TransactionExpirePayload { transaction_id },
                self.final_ttl,
            )
            .await
            .map_err(|e| AppError::internal("failed to enqueue final expire task", e))?;
        Ok(())
    }
}

fn parse_payload(payload: serde_json::Value) -> Result<Uuid, TaskError> {
    let payload: TransactionExpirePayload = serde_json::from_value(payload)
        .map_err(|e| TaskError::Skip(format!("malformed expire payload: {e}")))?;
    if payload.transaction_id.is_nil() {
        return Err(TaskError::Skip("transaction_id is required".to_string()));
    }
    Ok(payload.transaction_id)
}

fn task_outcome(result: AppResult<()>) -> Result<(), TaskError> {
    match result {
        Ok(()) => Ok(()),
        Err(err) if err.kind.is_terminal_for_consumer() => {
            Err(TaskError::Skip(err.message))
        }
        Err(err) => Err(TaskError::Retry(err.message)),
    }
}

/// Handler for the short-TTL deadline.
pub struct ExpireTaskHandler {
    pub pool: PgPool,
}

#[async_trait]
impl TaskHandler for ExpireTaskHandler {
    async fn handle(&self, payload: serde_json::Value) -> Result<(), TaskError> {
        let transaction_id = parse_payload(payload)?;
        task_outcome(
            cancelation_service::expire_pending_transaction(&self.pool, transaction_id).await,
        )
    }
}

/// Handler for the final-TTL deadline.
pub struct ExpireFinalTaskHandler {
    pub pool: PgPool,
    pub bus: Arc<dyn EventBus>,
}

#[async_trait]
impl TaskHandler for ExpireFinalTaskHandler {
    async fn handle(&self, payload: serde_json::Value) -> Result<(), TaskError> {
        let transaction_id = parse_payload(payload)?;
        task_outcome(
            cancelation_service::expire_final_transaction(&self.pool, &self.bus, transaction_id)
                .await,
        )
    }
}
