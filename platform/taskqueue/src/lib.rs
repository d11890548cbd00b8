//! # Delayed-Task Queue
//!
//! A Redis-backed queue for work that must run *later*: a task is enqueued
//! with a delay, persisted in a sorted set scored by its fire time, and
//! claimed atomically by a polling worker once due. Surviving a process
//! restart is the whole point: a basket's expiry deadline must fire even if
//! the service that scheduled it died in between.
//!
//! Delivery is at-least-once: a worker that crashes mid-handler loses the
//! claim, so handlers are expected to be idempotent (every expiry handler
//! re-checks basket state under a row lock before acting).
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use taskqueue::{TaskQueue, TaskWorker};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = TaskQueue::connect("redis://localhost:6379", "saga").await?;
//! queue.enqueue_in(
//!     "transaction:expire",
//!     &serde_json::json!({"transaction_id": "..."}),
//!     Duration::from_secs(60),
//! ).await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How often the worker polls for due tasks.
const POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Claimed per poll.
const CLAIM_BATCH: usize = 32;
/// Re-fire delay after a retriable handler failure.
const RETRY_DELAY: Duration = Duration::from_secs(10);
/// Attempts before a task is dropped with an error log.
const MAX_ATTEMPTS: u32 = 5;

/// Atomically pop every due member (up to a batch limit) from the schedule.
/// Claim and removal happen in one script so two workers never both run the
/// same task.
const CLAIM_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
for _, member in ipairs(due) do
  redis.call('ZREM', KEYS[1], member)
end
return due
"#;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("task serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Handler outcome that decides what happens to a failed task.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// Permanent: drop the task, retrying cannot help (malformed payload,
    /// violated precondition).
    #[error("task skipped: {0}")]
    Skip(String),

    /// Transient: re-enqueue with the retry delay until attempts run out.
    #[error("task failed: {0}")]
    Retry(String),
}

/// One scheduled unit of work as stored in Redis.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ScheduledTask {
    id: Uuid,
    task_type: String,
    payload: serde_json::Value,
    #[serde(default)]
    attempt: u32,
}

#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, payload: serde_json::Value) -> Result<(), TaskError>;
}

/// Producer half: schedules tasks onto the sorted set.
#[derive(Clone)]
pub struct TaskQueue {
    conn: ConnectionManager,
    schedule_key: String,
}

impl TaskQueue {
    pub async fn connect(url: &str, namespace: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self::new(conn, namespace))
    }

    pub fn new(conn: ConnectionManager, namespace: &str) -> Self {
        Self {
            conn,
            schedule_key: format!("{namespace}:tasks:scheduled"),
        }
    }

    /// Schedule `payload` to be handled as `task_type` after `delay`.
    pub async fn enqueue_in<T: Serialize>(
        &self,
        task_type: &str,
        payload: &T,
        delay: Duration,
    ) -> Result<Uuid, QueueError> {
        let task = ScheduledTask {
            id: Uuid::new_v4(),
            task_type: task_type.to_string(),
            payload: serde_json::to_value(payload)?,
            attempt: 0,
        };
        let fire_at = fire_at_millis(delay);

        let mut conn = self.conn.clone();
        let member = serde_json::to_string(&task)?;
        let _: () = conn.zadd(&self.schedule_key, member, fire_at).await?;

        tracing::debug!(
            task_id = %task.id,
            task_type,
            fire_at,
            "task scheduled"
        );
        Ok(task.id)
    }

    async fn requeue(&self, task: &ScheduledTask, delay: Duration) -> Result<(), QueueError> {
        let fire_at = fire_at_millis(delay);
        let mut conn = self.conn.clone();
        let member = serde_json::to_string(task)?;
        let _: () = conn.zadd(&self.schedule_key, member, fire_at).await?;
        Ok(())
    }
}

fn fire_at_millis(delay: Duration) -> i64 {
    chrono::Utc::now().timestamp_millis() + delay.as_millis() as i64
}

/// Consumer half: polls the schedule and dispatches due tasks to registered
/// handlers.
pub struct TaskWorker {
    queue: TaskQueue,
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl TaskWorker {
    pub fn new(queue: TaskQueue) -> Self {
        Self {
            queue,
            handlers: HashMap::new(),
        }
    }

    pub fn register(mut self, task_type: &str, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.insert(task_type.to_string(), handler);
        self
    }

    /// Spawn the polling loop. Runs until the process exits.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                handlers = ?self.handlers.keys().collect::<Vec<_>>(),
                "task worker started"
            );
            let mut ticker = tokio::time::interval(POLL_INTERVAL);
            loop {
                ticker.tick().await;
                if let Err(e) = self.drain_due().await {
                    tracing::error!(error = %e, "task claim cycle failed");
                }
            }
        })
    }

    /// Claim every currently-due task and run it. Public so tests can drive
    /// the worker without the polling loop.
    pub async fn drain_due(&self) -> Result<(), QueueError> {
        let now = chrono::Utc::now().timestamp_millis();
        let mut conn = self.queue.conn.clone();

        let members: Vec<String> = redis::Script::new(CLAIM_SCRIPT)
            .key(&self.queue.schedule_key)
            .arg(now)
            .arg(CLAIM_BATCH)
            .invoke_async(&mut conn)
            .await?;

        for member in members {
            let task: ScheduledTask = match serde_json::from_str(&member) {
                Ok(task) => task,
                Err(e) => {
                    tracing::error!(error = %e, raw = %member, "dropping undecodable task");
                    continue;
                }
            };
            self.dispatch(task).await;
        }

        Ok(())
    }

    async fn dispatch(&self, mut task: ScheduledTask) {
        let Some(handler) = self.handlers.get(&task.task_type) else {
            tracing::error!(task_type = %task.task_type, task_id = %task.id, "no handler registered, dropping task");
            return;
        };

        match handler.handle(task.payload.clone()).await {
            Ok(()) => {
                tracing::debug!(task_id = %task.id, task_type = %task.task_type, "task handled");
            }
            Err(TaskError::Skip(reason)) => {
                tracing::warn!(task_id = %task.id, task_type = %task.task_type, reason, "task skipped");
            }
            Err(TaskError::Retry(reason)) => {
                task.attempt += 1;
                if task.attempt >= MAX_ATTEMPTS {
                    tracing::error!(
                        task_id = %task.id,
                        task_type = %task.task_type,
                        attempts = task.attempt,
                        reason,
                        "task dropped after max attempts"
                    );
                    return;
                }

                tracing::warn!(
                    task_id = %task.id,
                    task_type = %task.task_type,
                    attempt = task.attempt,
                    reason,
                    "task failed, re-scheduling"
                );
                if let Err(e) = self.queue.requeue(&task, RETRY_DELAY).await {
                    tracing::error!(task_id = %task.id, error = %e, "failed to re-schedule task");
                }
            }
        }
    }
}
