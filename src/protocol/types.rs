//! Message kinds and the body shared by every agent-authored envelope.

use serde::{Deserialize, Serialize};

use super::addressing::Role;

/// Kind of an agent-authored message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Input typed by a user
    UserInput,
    /// Completion produced by a model
    AiOutput,
    /// Output of a tool invocation
    ToolOutput,
}

impl MessageKind {
    /// Wire name of this kind (the envelope's `type` field).
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::UserInput => "user_input",
            MessageKind::AiOutput => "ai_output",
            MessageKind::ToolOutput => "tool_output",
        }
    }

    /// Durable queue role a directed message of this kind is pushed onto.
    pub fn queue_role(self) -> Role {
        match self {
            MessageKind::UserInput => Role::InputQueue,
            MessageKind::AiOutput | MessageKind::ToolOutput => Role::OutputQueue,
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user_input" | "user" => Ok(MessageKind::UserInput),
            "ai_output" | "ai" => Ok(MessageKind::AiOutput),
            "tool_output" | "tool" => Ok(MessageKind::ToolOutput),
            other => Err(format!(
                "unknown message kind '{}' (expected user_input, ai_output or tool_output)",
                other
            )),
        }
    }
}

/// Body of a user, AI or tool message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentMessage {
    /// Message body content, opaque to this layer
    pub content: String,
    /// Sender agent ID
    pub from_agent: String,
    /// Creation time in seconds since the Unix epoch
    pub timestamp: f64,
}

impl AgentMessage {
    /// Create a message stamped with the current time.
    pub fn new(content: impl Into<String>, from_agent: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            from_agent: from_agent.into(),
            timestamp: current_timestamp(),
        }
    }

    /// Override the timestamp.
    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Seconds since the Unix epoch with microsecond resolution.
pub fn current_timestamp() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let msg = AgentMessage::new("Fix the bug", "agent-a");
        assert_eq!(msg.content, "Fix the bug");
        assert_eq!(msg.from_agent, "agent-a");
        assert!(msg.timestamp > 1_600_000_000.0);
    }

    #[test]
    fn test_kind_queue_roles() {
        assert_eq!(MessageKind::UserInput.queue_role(), Role::InputQueue);
        assert_eq!(MessageKind::AiOutput.queue_role(), Role::OutputQueue);
        assert_eq!(MessageKind::ToolOutput.queue_role(), Role::OutputQueue);
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("user_input".parse::<MessageKind>(), Ok(MessageKind::UserInput));
        assert_eq!("tool".parse::<MessageKind>(), Ok(MessageKind::ToolOutput));
        assert!("raw".parse::<MessageKind>().is_err());
        assert_eq!(MessageKind::AiOutput.to_string(), "ai_output");
    }
}
