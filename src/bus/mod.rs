//! Delivery models over one broker connection.
//!
//! - `PubSubBus`: transient fan-out, at-most-once
//! - `QueueChannel`: durable FIFO queues, consumed once

pub mod pubsub;
pub mod queue;

pub use pubsub::{PubSubBus, DEFAULT_POLL_TIMEOUT};
pub use queue::QueueChannel;
