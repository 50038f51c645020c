//! agentbus library root.
//!
//! Redis-backed messaging between cooperating agents: transient broadcast over
//! pub/sub, durable per-agent queues over lists, and agent discovery by key
//! enumeration. [`AgentMessenger`] ties them together.

pub mod broker;
pub mod bus;
pub mod cli;
pub mod config;
pub mod connection;
pub mod directory;
pub mod error;
pub mod heartbeat;
pub mod logging;
pub mod messenger;
pub mod protocol;

pub use broker::{Broker, MemoryBroker, MemoryHub, RedisBroker};
pub use bus::{PubSubBus, QueueChannel};
pub use cli::Commands;
pub use config::{load_settings, Settings};
pub use connection::{ConnectionManager, ConnectionState};
pub use directory::AgentDirectory;
pub use error::{Error, Result};
pub use heartbeat::{Heartbeat, HeartbeatHandle};
pub use messenger::AgentMessenger;
pub use protocol::{decode, encode, AgentMessage, ChannelAddressing, MessageEnvelope, MessageKind, Role};
