//! In-memory implementation of the EventBus trait for tests and local runs.

use crate::{BusMessage, BusResult, EventBus};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast;

/// EventBus over a Tokio broadcast channel.
///
/// No durability, no redelivery: a message published with no live subscriber
/// is gone. That is exactly what unit tests want: deterministic, in-process,
/// no Docker.
#[derive(Clone)]
pub struct InMemoryBus {
    sender: Arc<broadcast::Sender<BusMessage>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// NATS-style subject matching: `*` is one token, `>` the rest.
    fn matches(subject: &str, pattern: &str) -> bool {
        let mut subject_tokens = subject.split('.');
        let mut pattern_tokens = pattern.split('.').peekable();

        loop {
            match (subject_tokens.next(), pattern_tokens.next()) {
                (_, Some(">")) => return true,
                (Some(_), Some("*")) => continue,
                (Some(s), Some(p)) => {
                    if s != p {
                        return false;
                    }
                }
                (None, None) => return true,
                _ => return false,
            }
        }
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()> {
        // A send error only means there is no subscriber yet.
        let _ = self.sender.send(BusMessage::new(subject.to_string(), payload));
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> BusResult<BoxStream<'static, BusMessage>> {
        let mut receiver = self.sender.subscribe();
        let pattern = pattern.to_string();

        let stream = async_stream::stream! {
            loop {
                match receiver.recv().await {
                    Ok(msg) => {
                        if Self::matches(&msg.subject, &pattern) {
                            yield msg;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "in-memory bus subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    #[test]
    fn subject_matching() {
        assert!(InMemoryBus::matches("transaction.settled", "transaction.settled"));
        assert!(InMemoryBus::matches("transaction.settled", "transaction.*"));
        assert!(InMemoryBus::matches("transaction.settled", "transaction.>"));
        assert!(InMemoryBus::matches("transaction.settled", ">"));
        assert!(!InMemoryBus::matches("transaction.settled", "transaction.canceled"));
        assert!(!InMemoryBus::matches("transaction.settled", "webhook.*"));
        assert!(!InMemoryBus::matches("transaction.settled.extra", "transaction.*"));
        assert!(!InMemoryBus::matches("transaction", "transaction.settled"));
    }

    #[tokio::test]
    async fn delivers_in_publish_order() {
        let bus = InMemoryBus::new();
        let mut stream = bus.subscribe("transaction.>").await.unwrap();

        for subject in [
            "transaction.committed",
            "transaction.settled",
        ] {
            bus.publish(subject, subject.as_bytes().to_vec()).await.unwrap();
        }

        for expected in ["transaction.committed", "transaction.settled"] {
            let msg = tokio::time::timeout(Duration::from_secs(1), stream.next())
                .await
                .expect("timeout")
                .expect("stream ended");
            assert_eq!(msg.subject, expected);
        }
    }

    #[tokio::test]
    async fn filters_by_pattern() {
        let bus = InMemoryBus::new();
        let mut stream = bus.subscribe("webhook.notify").await.unwrap();

        bus.publish("transaction.expired", b"skip".to_vec()).await.unwrap();
        bus.publish("webhook.notify", b"take".to_vec()).await.unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("timeout")
            .expect("stream ended");
        assert_eq!(msg.subject, "webhook.notify");
        assert_eq!(msg.payload, b"take");
    }

    #[tokio::test]
    async fn broadcasts_to_every_subscriber() {
        let bus = InMemoryBus::new();
        let mut first = bus.subscribe("transaction.>").await.unwrap();
        let mut second = bus.subscribe("transaction.>").await.unwrap();

        bus.publish("transaction.canceled", b"both".to_vec()).await.unwrap();

        for stream in [&mut first, &mut second] {
            let msg = tokio::time::timeout(Duration::from_secs(1), stream.next())
                .await
                .expect("timeout")
                .expect("stream ended");
            assert_eq!(msg.payload, b"both");
        }
    }
}
