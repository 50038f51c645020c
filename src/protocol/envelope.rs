//! The envelope exchanged between agents.

use serde::{Deserialize, Serialize};

use super::types::{AgentMessage, MessageKind};

/// Every payload that crosses the broker.
///
/// On the wire this is a flat JSON object whose `type` field selects the
/// variant: `{"type": "user_input", "content": .., "from_agent": .., "timestamp": ..}`.
/// `Raw` is never produced by a sender; the codec substitutes it for
/// payloads it cannot decode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageEnvelope {
    UserInput(AgentMessage),
    AiOutput(AgentMessage),
    ToolOutput(AgentMessage),
    Raw { content: String },
}

impl MessageEnvelope {
    /// Wrap a message body under the given kind.
    pub fn new(kind: MessageKind, message: AgentMessage) -> Self {
        match kind {
            MessageKind::UserInput => MessageEnvelope::UserInput(message),
            MessageKind::AiOutput => MessageEnvelope::AiOutput(message),
            MessageKind::ToolOutput => MessageEnvelope::ToolOutput(message),
        }
    }

    /// Build an envelope from `from_agent`, stamped now.
    pub fn compose(kind: MessageKind, content: impl Into<String>, from_agent: impl Into<String>) -> Self {
        Self::new(kind, AgentMessage::new(content, from_agent))
    }

    pub fn user_input(content: impl Into<String>, from_agent: impl Into<String>) -> Self {
        Self::compose(MessageKind::UserInput, content, from_agent)
    }

    pub fn ai_output(content: impl Into<String>, from_agent: impl Into<String>) -> Self {
        Self::compose(MessageKind::AiOutput, content, from_agent)
    }

    pub fn tool_output(content: impl Into<String>, from_agent: impl Into<String>) -> Self {
        Self::compose(MessageKind::ToolOutput, content, from_agent)
    }

    pub fn raw(content: impl Into<String>) -> Self {
        MessageEnvelope::Raw {
            content: content.into(),
        }
    }

    /// Kind of the envelope, `None` for raw fallbacks.
    pub fn kind(&self) -> Option<MessageKind> {
        match self {
            MessageEnvelope::UserInput(_) => Some(MessageKind::UserInput),
            MessageEnvelope::AiOutput(_) => Some(MessageKind::AiOutput),
            MessageEnvelope::ToolOutput(_) => Some(MessageKind::ToolOutput),
            MessageEnvelope::Raw { .. } => None,
        }
    }

    /// Wire name of the envelope type.
    pub fn type_name(&self) -> &'static str {
        self.kind().map_or("raw", MessageKind::as_str)
    }

    /// Body of an agent-authored envelope.
    pub fn message(&self) -> Option<&AgentMessage> {
        match self {
            MessageEnvelope::UserInput(m)
            | MessageEnvelope::AiOutput(m)
            | MessageEnvelope::ToolOutput(m) => Some(m),
            MessageEnvelope::Raw { .. } => None,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            MessageEnvelope::Raw { content } => content,
            _ => self.message().map_or("", |m| m.content.as_str()),
        }
    }

    pub fn from_agent(&self) -> Option<&str> {
        self.message().map(|m| m.from_agent.as_str())
    }

    pub fn timestamp(&self) -> Option<f64> {
        self.message().map(|m| m.timestamp)
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, MessageEnvelope::Raw { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_creation() {
        let envelope = MessageEnvelope::user_input("hello", "agent-a");

        assert_eq!(envelope.kind(), Some(MessageKind::UserInput));
        assert_eq!(envelope.content(), "hello");
        assert_eq!(envelope.from_agent(), Some("agent-a"));
        assert!(envelope.timestamp().is_some());
        assert!(!envelope.is_raw());
    }

    #[test]
    fn test_raw_has_no_sender() {
        let envelope = MessageEnvelope::raw("not json");

        assert_eq!(envelope.kind(), None);
        assert_eq!(envelope.type_name(), "raw");
        assert_eq!(envelope.content(), "not json");
        assert!(envelope.from_agent().is_none());
        assert!(envelope.timestamp().is_none());
    }

    #[test]
    fn test_wire_shape_has_exactly_four_keys() {
        let envelope = MessageEnvelope::new(
            MessageKind::ToolOutput,
            AgentMessage::new("ls output", "agent-b").with_timestamp(1700000000.5),
        );
        let value = serde_json::to_value(&envelope).unwrap();
        let object = value.as_object().unwrap();

        assert_eq!(object.len(), 4);
        assert_eq!(object["type"], "tool_output");
        assert_eq!(object["content"], "ls output");
        assert_eq!(object["from_agent"], "agent-b");
        assert_eq!(object["timestamp"], 1700000000.5);
    }
}
