//! JetStream-backed implementation: durable streams, durable pull consumers.

use std::time::Duration;

use async_nats::jetstream::consumer::{pull, AckPolicy, PullConsumer};
use async_nats::jetstream::stream::{Config as StreamConfig, StorageType};
use async_nats::jetstream::Context;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};

use crate::{BusError, BusMessage, BusResult, EventBus};

/// Redelivery settings every durable consumer in the platform shares.
///
/// Explicit ack, at most 5 deliveries with a 1s/5s/10s back-off ladder, and a
/// 30s ack window. A handler that cannot make progress NAKs with
/// [`NAK_DELAY`]; fetches wait at most [`FETCH_MAX_WAIT`] before reporting
/// "no work".
pub const MAX_DELIVER: i64 = 5;
pub const BACKOFF_SCHEDULE: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(5),
    Duration::from_secs(10),
];
pub const ACK_WAIT: Duration = Duration::from_secs(30);
pub const NAK_DELAY: Duration = Duration::from_secs(10);
pub const FETCH_MAX_WAIT: Duration = Duration::from_secs(2);
pub const FETCH_BATCH: usize = 10;

/// Create the stream if it does not exist yet (file storage, explicit
/// subject list). Safe to call from every service at startup.
pub async fn ensure_stream(
    context: &Context,
    name: &str,
    subjects: &[&str],
) -> BusResult<()> {
    context
        .get_or_create_stream(StreamConfig {
            name: name.to_string(),
            subjects: subjects.iter().map(|s| s.to_string()).collect(),
            storage: StorageType::File,
            ..Default::default()
        })
        .await
        .map_err(|e| BusError::StreamError(format!("{name}: {e}")))?;

    tracing::info!(stream = %name, ?subjects, "JetStream stream ready");
    Ok(())
}

/// Create (or look up) a durable pull consumer bound to one subject of a
/// stream, configured with the platform redelivery settings.
pub async fn durable_pull_consumer(
    context: &Context,
    stream_name: &str,
    durable_name: &str,
    filter_subject: &str,
) -> BusResult<PullConsumer> {
    let stream = context
        .get_stream(stream_name)
        .await
        .map_err(|e| BusError::StreamError(format!("{stream_name}: {e}")))?;

    let consumer = stream
        .get_or_create_consumer(
            durable_name,
            pull::Config {
                durable_name: Some(durable_name.to_string()),
                ack_policy: AckPolicy::Explicit,
                max_deliver: MAX_DELIVER,
                backoff: BACKOFF_SCHEDULE.to_vec(),
                ack_wait: ACK_WAIT,
                filter_subject: filter_subject.to_string(),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| BusError::SubscribeError(format!("{durable_name}: {e}")))?;

    tracing::info!(
        stream = %stream_name,
        durable = %durable_name,
        subject = %filter_subject,
        "durable pull consumer ready"
    );

    Ok(consumer)
}

/// EventBus implementation over NATS JetStream.
///
/// Publishes go through the JetStream context, so `publish` resolves only
/// after the stream has persisted the message, the producer-side half of the
/// at-least-once contract.
#[derive(Clone)]
pub struct JetStreamBus {
    client: async_nats::Client,
    context: Context,
}

impl JetStreamBus {
    /// Wrap an existing NATS connection.
    pub fn new(client: async_nats::Client) -> Self {
        let context = async_nats::jetstream::new(client.clone());
        Self { client, context }
    }

    /// Connect to a NATS server and return the bus plus the raw context for
    /// consumer setup.
    pub async fn connect(url: &str) -> BusResult<(Self, Context)> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| BusError::ConnectionError(format!("{url}: {e}")))?;
        let bus = Self::new(client);
        let context = bus.context.clone();
        Ok((bus, context))
    }
}

#[async_trait]
impl EventBus for JetStreamBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()> {
        let ack = self
            .context
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| BusError::PublishError(e.to_string()))?;

        // Await the server ack so the caller knows the message is durable.
        ack.await
            .map_err(|e| BusError::PublishError(e.to_string()))?;

        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> BusResult<BoxStream<'static, BusMessage>> {
        // Ephemeral core subscription; durable consumption goes through
        // `durable_pull_consumer`.
        let subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| BusError::SubscribeError(e.to_string()))?;

        let stream = subscriber
            .map(|msg| BusMessage::new(msg.subject.to_string(), msg.payload.to_vec()));

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    // Requires a NATS server with JetStream enabled:
    // docker run -p 4222:4222 nats:2.10-alpine -js

    #[tokio::test]
    #[ignore] // Requires NATS server
    async fn durable_consumer_redelivers_unacked_messages() {
        let (bus, context) = JetStreamBus::connect("nats://localhost:4222")
            .await
            .expect("NATS server must be running on localhost:4222");

        ensure_stream(&context, "EVENT_BUS_TEST_STREAM", &["event-bus-test.one"])
            .await
            .unwrap();

        bus.publish("event-bus-test.one", b"payload".to_vec())
            .await
            .unwrap();

        let consumer = durable_pull_consumer(
            &context,
            "EVENT_BUS_TEST_STREAM",
            "event_bus_test_consumer",
            "event-bus-test.one",
        )
        .await
        .unwrap();

        let mut batch = consumer
            .fetch()
            .max_messages(FETCH_BATCH)
            .expires(FETCH_MAX_WAIT)
            .messages()
            .await
            .unwrap();

        let msg = batch
            .next()
            .await
            .expect("stream ended")
            .expect("fetch error");
        assert_eq!(msg.payload.as_ref(), b"payload");
        msg.ack().await.unwrap();
    }
}
