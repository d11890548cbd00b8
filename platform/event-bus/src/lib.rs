//! # EventBus Abstraction
//!
//! Platform-level messaging shared by the inventory and transaction services.
//!
//! The publish side goes through the [`EventBus`] trait so services and tests
//! can swap transports:
//!
//! - **JetStreamBus**: production implementation over NATS JetStream with
//!   file-backed durable streams
//! - **InMemoryBus**: broadcast-channel implementation for tests and local
//!   development
//!
//! The consume side is JetStream-specific on purpose: durable pull consumers
//! with explicit ack and server-driven redelivery cannot be faked faithfully
//! in memory, so consumer loops build on [`jetstream::durable_pull_consumer`]
//! directly and keep their message handlers transport-free for testing.
//!
//! ```rust,no_run
//! use event_bus::{EventBus, InMemoryBus};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());
//! let payload = serde_json::to_vec(&serde_json::json!({
//!     "transaction_id": "5f7c9bde-08a4-4a2b-9fb2-5f4c4d7e9a01",
//!     "status": "COMMITTED",
//! }))?;
//! bus.publish("transaction.committed", payload).await?;
//! # Ok(())
//! # }
//! ```

pub mod consumer_retry;
mod inmemory_bus;
pub mod jetstream;

pub use inmemory_bus::InMemoryBus;
pub use jetstream::JetStreamBus;

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;

/// A message received from the event bus.
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// The subject this message was published to
    pub subject: String,
    /// The message payload (raw bytes)
    pub payload: Vec<u8>,
}

impl BusMessage {
    pub fn new(subject: String, payload: Vec<u8>) -> Self {
        Self { subject, payload }
    }
}

/// Errors that can occur when using the event bus.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to publish message: {0}")]
    PublishError(String),

    #[error("failed to subscribe to subject: {0}")]
    SubscribeError(String),

    #[error("stream setup failed: {0}")]
    StreamError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),
}

/// Result type for event bus operations.
pub type BusResult<T> = Result<T, BusError>;

/// Publish-subscribe abstraction over the durable message transport.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish a message to a subject. For durable implementations this
    /// resolves only once the stream has acknowledged persistence.
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()>;

    /// Subscribe to messages matching a subject pattern (`*` one token,
    /// `>` one or more). Durable consumption uses the jetstream module
    /// instead; this is the ephemeral tap used by tests and tooling.
    async fn subscribe(&self, subject: &str) -> BusResult<BoxStream<'static, BusMessage>>;
}

impl fmt::Debug for dyn EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventBus")
    }
}
