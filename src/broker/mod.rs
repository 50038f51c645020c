//! Broker seam.
//!
//! The messaging layer needs three families of primitives from the shared
//! service it talks to:
//! - pub/sub over named channels
//! - list semantics (push tail, pop head, optionally blocking) over named keys
//! - key enumeration by glob pattern
//!
//! `RedisBroker` is the production implementation. `MemoryBroker` keeps the
//! same semantics inside one process.

pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub use self::memory::{MemoryBroker, MemoryHub};
pub use self::redis::RedisBroker;

/// A payload received on a subscribed channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    pub channel: String,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Liveness round trip.
    async fn ping(&self) -> Result<()>;

    /// Fire-and-forget publish. Returns the number of subscribers reached.
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<usize>;

    async fn subscribe(&self, channel: &str) -> Result<()>;

    async fn unsubscribe(&self, channel: &str) -> Result<()>;

    /// Next message on any subscribed channel, waiting at most `timeout`.
    async fn next_message(&self, timeout: Duration) -> Result<Option<ChannelMessage>>;

    /// Release the subscription context. Later subscription calls are no-ops.
    async fn close_subscriptions(&self) -> Result<()>;

    /// Append to the tail of the list at `key`.
    async fn push_back(&self, key: &str, payload: &[u8]) -> Result<()>;

    /// Remove and return the head of the list at `key` without waiting.
    async fn pop_front(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Remove and return the head of the list at `key`, waiting at most `timeout`.
    async fn pop_front_blocking(&self, key: &str, timeout: Duration) -> Result<Option<Vec<u8>>>;

    async fn list_len(&self, key: &str) -> Result<usize>;

    /// Existing keys matching a glob pattern.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    async fn set_with_expiry(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}
