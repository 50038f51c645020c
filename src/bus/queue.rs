//! Durable point-to-point queues.
//!
//! Queues are broker-resident lists: push appends to the tail, pop removes
//! from the head. Items survive until popped whether or not a consumer is
//! around, and the broker guarantees that concurrent poppers never receive the
//! same item.

use std::sync::Arc;
use std::time::Duration;

use crate::connection::ConnectionManager;
use crate::protocol::{codec, MessageEnvelope};

pub struct QueueChannel {
    conn: Arc<ConnectionManager>,
}

impl QueueChannel {
    pub fn new(conn: Arc<ConnectionManager>) -> Self {
        Self { conn }
    }

    /// Append `envelope` to the tail of `queue`.
    pub async fn push(&self, queue: &str, envelope: &MessageEnvelope) {
        let payload = codec::encode(envelope);
        let pushed = self
            .conn
            .guarded("push", |broker| async move { broker.push_back(queue, &payload).await })
            .await;
        if pushed.is_some() {
            tracing::debug!("Pushed {} to {}", envelope.type_name(), queue);
        }
    }

    /// Pop the head of `queue`.
    ///
    /// A zero `timeout` returns immediately; otherwise the call waits up to
    /// `timeout` for an item to arrive.
    pub async fn pop(&self, queue: &str, timeout: Duration) -> Option<MessageEnvelope> {
        let payload = self
            .conn
            .guarded("pop", |broker| async move {
                if timeout.is_zero() {
                    broker.pop_front(queue).await
                } else {
                    broker.pop_front_blocking(queue, timeout).await
                }
            })
            .await
            .flatten()?;

        let envelope = codec::decode(&payload);
        tracing::debug!("Popped {} from {}", envelope.type_name(), queue);
        Some(envelope)
    }

    /// Number of items waiting in `queue`; zero while disconnected.
    pub async fn len(&self, queue: &str) -> usize {
        self.conn
            .guarded("len", |broker| async move { broker.list_len(queue).await })
            .await
            .unwrap_or(0)
    }

    pub async fn is_empty(&self, queue: &str) -> bool {
        self.len(queue).await == 0
    }

    /// Drop every item waiting in `queue`.
    pub async fn clear(&self, queue: &str) {
        let cleared = self
            .conn
            .guarded("clear", |broker| async move { broker.delete(queue).await })
            .await;
        if cleared.is_some() {
            tracing::debug!("Cleared queue {}", queue);
        }
    }
}
