//! Wire protocol for agent messaging.
//!
//! This module defines what crosses the broker:
//! - Channel and queue names derived from a prefix and agent id
//! - The message envelope sum type
//! - The JSON codec with its raw fallback

pub mod addressing;
pub mod codec;
pub mod envelope;
pub mod types;

pub use addressing::{ChannelAddressing, Role, DEFAULT_PREFIX};
pub use codec::{decode, encode};
pub use envelope::MessageEnvelope;
pub use types::{current_timestamp, AgentMessage, MessageKind};
