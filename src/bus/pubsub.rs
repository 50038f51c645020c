//! Transient publish/subscribe over named channels.
//!
//! At-most-once and best-effort: nothing is stored, and a subscriber that
//! joins after a publish never sees it.

use std::sync::Arc;
use std::time::Duration;

use crate::connection::ConnectionManager;
use crate::protocol::{codec, MessageEnvelope};

/// Default wait for [`PubSubBus::poll`].
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(10);

pub struct PubSubBus {
    conn: Arc<ConnectionManager>,
}

impl PubSubBus {
    pub fn new(conn: Arc<ConnectionManager>) -> Self {
        Self { conn }
    }

    /// Subscribe to `channel`. Idempotent; no-op while disconnected.
    pub async fn subscribe(&self, channel: &str) {
        let done = self
            .conn
            .guarded("subscribe", |broker| async move { broker.subscribe(channel).await })
            .await;
        if done.is_some() {
            tracing::debug!("Subscribed to channel: {}", channel);
        }
    }

    /// Unsubscribe from `channel`. Idempotent; no-op while disconnected.
    pub async fn unsubscribe(&self, channel: &str) {
        let done = self
            .conn
            .guarded("unsubscribe", |broker| async move { broker.unsubscribe(channel).await })
            .await;
        if done.is_some() {
            tracing::debug!("Unsubscribed from channel: {}", channel);
        }
    }

    /// Publish to every current subscriber of `channel`.
    pub async fn publish(&self, channel: &str, envelope: &MessageEnvelope) {
        let payload = codec::encode(envelope);
        let reached = self
            .conn
            .guarded("publish", |broker| async move {
                broker.publish(channel, &payload).await
            })
            .await;
        if let Some(reached) = reached {
            tracing::debug!(
                "Published {} to {} ({} subscribers)",
                envelope.type_name(),
                channel,
                reached
            );
        }
    }

    /// Next envelope from any subscribed channel, waiting at most `timeout`.
    pub async fn poll(&self, timeout: Duration) -> Option<MessageEnvelope> {
        let message = self
            .conn
            .guarded("poll", |broker| async move { broker.next_message(timeout).await })
            .await
            .flatten()?;

        let envelope = codec::decode(&message.payload);
        tracing::debug!("Received {} on {}", envelope.type_name(), message.channel);
        Some(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryHub;

    fn bus_on(hub: &MemoryHub) -> PubSubBus {
        PubSubBus::new(Arc::new(ConnectionManager::with_broker(
            "memory://",
            Arc::new(hub.connect()),
        )))
    }

    #[tokio::test]
    async fn test_broadcast_fan_out() {
        let hub = MemoryHub::new();
        let first = bus_on(&hub);
        let second = bus_on(&hub);
        let sender = bus_on(&hub);

        first.subscribe("aider:broadcast").await;
        second.subscribe("aider:broadcast").await;

        let envelope = MessageEnvelope::ai_output("done", "C");
        sender.publish("aider:broadcast", &envelope).await;

        assert_eq!(first.poll(DEFAULT_POLL_TIMEOUT).await, Some(envelope.clone()));
        assert_eq!(second.poll(DEFAULT_POLL_TIMEOUT).await, Some(envelope));
    }

    #[tokio::test]
    async fn test_poll_times_out_empty() {
        let hub = MemoryHub::new();
        let bus = bus_on(&hub);
        bus.subscribe("quiet").await;

        let started = tokio::time::Instant::now();
        assert!(bus.poll(Duration::from_millis(30)).await.is_none());
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let hub = MemoryHub::new();
        let listener = bus_on(&hub);
        let sender = bus_on(&hub);

        listener.subscribe("news").await;
        listener.unsubscribe("news").await;
        listener.unsubscribe("news").await;
        sender
            .publish("news", &MessageEnvelope::user_input("hi", "S"))
            .await;

        assert!(listener.poll(DEFAULT_POLL_TIMEOUT).await.is_none());
    }

    #[tokio::test]
    async fn test_raw_payload_is_delivered_as_raw() {
        let hub = MemoryHub::new();
        let listener = bus_on(&hub);
        listener.subscribe("news").await;

        let foreign = hub.connect();
        crate::broker::Broker::publish(&foreign, "news", b"hello from a shell")
            .await
            .unwrap();

        let envelope = listener.poll(DEFAULT_POLL_TIMEOUT).await.unwrap();
        assert_eq!(envelope, MessageEnvelope::raw("hello from a shell"));
    }

    #[tokio::test]
    async fn test_degraded_bus_is_silent() {
        let hub = MemoryHub::new();
        let bus = bus_on(&hub);
        bus.subscribe("news").await;

        hub.set_online(false);
        bus.publish("news", &MessageEnvelope::user_input("x", "A")).await;
        bus.subscribe("other").await;
        assert!(bus.poll(DEFAULT_POLL_TIMEOUT).await.is_none());
    }
}
