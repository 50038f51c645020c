//! Agent-level messaging.
//!
//! `AgentMessenger` is the one entry point an orchestration layer needs. A send
//! with a target agent lands on that agent's durable queue; a send without one
//! is broadcast to whoever is subscribed right now.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::bus::{PubSubBus, QueueChannel};
use crate::config::{default_agent_id, validate_settings, Settings};
use crate::connection::{ConnectionManager, ConnectionState};
use crate::directory::AgentDirectory;
use crate::error::Result;
use crate::heartbeat::{Heartbeat, HeartbeatHandle, DEFAULT_HEARTBEAT_INTERVAL};
use crate::protocol::{ChannelAddressing, MessageEnvelope, MessageKind, Role};

pub struct AgentMessenger {
    agent_id: String,
    names: ChannelAddressing,
    conn: Arc<ConnectionManager>,
    bus: PubSubBus,
    queues: QueueChannel,
    directory: AgentDirectory,
    poll_timeout: Duration,
    heartbeat_interval: Duration,
    heartbeat: Mutex<Option<HeartbeatHandle>>,
}

impl AgentMessenger {
    /// Connect to the configured Redis broker.
    ///
    /// Only invalid settings are an error. An unreachable broker leaves the
    /// messenger in degraded mode where every operation is a silent no-op.
    pub async fn connect(settings: Settings) -> Result<Self> {
        validate_settings(&settings)?;
        let conn = ConnectionManager::connect(&settings.redis_url).await;
        Self::with_connection(Arc::new(conn), settings)
    }

    /// Build on an existing connection, which may be shared with other components.
    pub fn with_connection(conn: Arc<ConnectionManager>, settings: Settings) -> Result<Self> {
        validate_settings(&settings)?;

        let agent_id = settings.agent_id.clone().unwrap_or_else(default_agent_id);
        let names = ChannelAddressing::new(settings.channel_prefix.clone());

        tracing::debug!("Messenger for {} on {}", agent_id, conn.url());

        Ok(Self {
            bus: PubSubBus::new(conn.clone()),
            queues: QueueChannel::new(conn.clone()),
            directory: AgentDirectory::new(conn.clone(), names.clone()),
            poll_timeout: settings.poll_timeout(),
            heartbeat_interval: settings
                .heartbeat_interval()
                .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL),
            heartbeat: Mutex::new(None),
            agent_id,
            names,
            conn,
        })
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn names(&self) -> &ChannelAddressing {
        &self.names
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.conn
    }

    pub fn bus(&self) -> &PubSubBus {
        &self.bus
    }

    pub fn queues(&self) -> &QueueChannel {
        &self.queues
    }

    pub fn directory(&self) -> &AgentDirectory {
        &self.directory
    }

    pub async fn is_connected(&self) -> bool {
        self.conn.is_connected().await
    }

    pub async fn state(&self) -> ConnectionState {
        self.conn.probe().await
    }

    pub fn input_channel(&self) -> String {
        self.names.input(&self.agent_id)
    }

    pub fn output_channel(&self) -> String {
        self.names.output(&self.agent_id)
    }

    pub fn broadcast_channel(&self) -> String {
        self.names.broadcast()
    }

    pub fn input_queue(&self) -> String {
        self.names.input_queue(&self.agent_id)
    }

    pub fn output_queue(&self) -> String {
        self.names.output_queue(&self.agent_id)
    }

    /// Send `content` as this agent.
    ///
    /// With a non-empty `target` the envelope is pushed onto the target's
    /// input queue (user input) or output queue (AI and tool output);
    /// otherwise it is published on the broadcast channel. Returns the
    /// envelope that was sent.
    pub async fn send(&self, kind: MessageKind, content: &str, target: Option<&str>) -> MessageEnvelope {
        let envelope = MessageEnvelope::compose(kind, content, self.agent_id.as_str());

        match target.filter(|t| !t.is_empty()) {
            Some(target) => {
                let queue = self.names.name(kind.queue_role(), target);
                self.queues.push(&queue, &envelope).await;
            }
            None => {
                self.bus.publish(&self.broadcast_channel(), &envelope).await;
            }
        }
        envelope
    }

    pub async fn send_user_input(&self, content: &str, target: Option<&str>) -> MessageEnvelope {
        self.send(MessageKind::UserInput, content, target).await
    }

    pub async fn send_ai_output(&self, content: &str, target: Option<&str>) -> MessageEnvelope {
        self.send(MessageKind::AiOutput, content, target).await
    }

    pub async fn send_tool_output(&self, content: &str, target: Option<&str>) -> MessageEnvelope {
        self.send(MessageKind::ToolOutput, content, target).await
    }

    /// Pop from this agent's input queue. Zero timeout does not wait.
    pub async fn receive_input(&self, timeout: Duration) -> Option<MessageEnvelope> {
        self.queues.pop(&self.input_queue(), timeout).await
    }

    /// Pop from this agent's output queue. Zero timeout does not wait.
    pub async fn receive_output(&self, timeout: Duration) -> Option<MessageEnvelope> {
        self.queues.pop(&self.output_queue(), timeout).await
    }

    pub async fn receive(&self, role: Role, timeout: Duration) -> Option<MessageEnvelope> {
        match role {
            Role::OutputQueue => self.receive_output(timeout).await,
            _ => self.receive_input(timeout).await,
        }
    }

    /// Subscribe to the shared broadcast channel.
    pub async fn listen_broadcast(&self) {
        self.bus.subscribe(&self.broadcast_channel()).await;
    }

    /// Poll subscribed channels using the configured timeout.
    pub async fn poll(&self) -> Option<MessageEnvelope> {
        self.bus.poll(self.poll_timeout).await
    }

    pub async fn list_agents(&self) -> BTreeSet<String> {
        self.directory.list_agents().await
    }

    pub async fn list_live_agents(&self) -> BTreeSet<String> {
        self.directory.list_live_agents().await
    }

    /// Start the presence heartbeat if it is not already running.
    pub async fn start_heartbeat(&self) {
        let mut slot = self.heartbeat.lock().await;
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let heartbeat = Heartbeat::new(
            self.conn.clone(),
            &self.names,
            &self.agent_id,
            self.heartbeat_interval,
        );
        *slot = Some(heartbeat.spawn());
    }

    /// Release the subscription context and stop the heartbeat.
    ///
    /// The broker connection itself stays open: it may be shared with
    /// components this messenger does not own.
    pub async fn cleanup(&self) {
        if let Some(handle) = self.heartbeat.lock().await.take() {
            handle.stop().await;
        }
        if let Some(broker) = self.conn.broker() {
            if let Err(e) = broker.close_subscriptions().await {
                tracing::warn!("Failed to close subscriptions: {}", e);
            }
        }
        tracing::debug!("Messenger for {} cleaned up", self.agent_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryHub;
    use crate::bus::DEFAULT_POLL_TIMEOUT;

    fn messenger_on(hub: &MemoryHub, agent_id: &str) -> AgentMessenger {
        crate::logging::init_test();
        let conn = ConnectionManager::with_broker("memory://", Arc::new(hub.connect()));
        AgentMessenger::with_connection(Arc::new(conn), Settings::default().with_agent_id(agent_id)).unwrap()
    }

    #[tokio::test]
    async fn test_directed_user_input() {
        let hub = MemoryHub::new();
        let a = messenger_on(&hub, "A");
        let b = messenger_on(&hub, "B");

        let sent = a.send_user_input("hello", Some("B")).await;

        assert_eq!(a.queues().len("aider:input_queue:B").await, 1);
        let received = a
            .queues()
            .pop("aider:input_queue:B", Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(received, sent);
        assert_eq!(received.kind(), Some(MessageKind::UserInput));
        assert_eq!(received.content(), "hello");
        assert_eq!(received.from_agent(), Some("A"));
        assert!(b.receive_input(Duration::ZERO).await.is_none());
    }

    #[tokio::test]
    async fn test_outputs_land_on_output_queue() {
        let hub = MemoryHub::new();
        let a = messenger_on(&hub, "A");
        let b = messenger_on(&hub, "B");

        a.send_ai_output("answer", Some("B")).await;
        a.send_tool_output("stdout", Some("B")).await;

        assert!(b.receive_input(Duration::ZERO).await.is_none());
        let first = b.receive_output(Duration::ZERO).await.unwrap();
        let second = b.receive(Role::OutputQueue, Duration::ZERO).await.unwrap();
        assert_eq!(first.kind(), Some(MessageKind::AiOutput));
        assert_eq!(second.kind(), Some(MessageKind::ToolOutput));
    }

    #[tokio::test]
    async fn test_untargeted_send_broadcasts() {
        let hub = MemoryHub::new();
        let a = messenger_on(&hub, "A");
        let b = messenger_on(&hub, "B");
        let c = messenger_on(&hub, "C");

        a.listen_broadcast().await;
        b.listen_broadcast().await;
        let sent = c.send_ai_output("to everyone", None).await;

        assert_eq!(a.poll().await, Some(sent.clone()));
        assert_eq!(b.poll().await, Some(sent));
        assert!(c.list_agents().await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_target_broadcasts() {
        let hub = MemoryHub::new();
        let a = messenger_on(&hub, "A");
        let b = messenger_on(&hub, "B");
        a.listen_broadcast().await;

        b.send_user_input("hi", Some("")).await;
        assert!(a.poll().await.is_some());
    }

    #[tokio::test]
    async fn test_directory_after_sends() {
        let hub = MemoryHub::new();
        let a = messenger_on(&hub, "A");
        let b = messenger_on(&hub, "B");

        a.send_user_input("ping", Some("B")).await;
        b.send_user_input("pong", Some("A")).await;
        b.send_user_input("again", Some("A")).await;

        let expected: BTreeSet<String> = ["A", "B"].iter().map(|s| s.to_string()).collect();
        assert_eq!(a.list_agents().await, expected);
    }

    #[tokio::test]
    async fn test_channel_names() {
        let hub = MemoryHub::new();
        let a = messenger_on(&hub, "A");

        assert_eq!(a.input_channel(), "aider:input:A");
        assert_eq!(a.output_channel(), "aider:output:A");
        assert_eq!(a.broadcast_channel(), "aider:broadcast");
        assert_eq!(a.input_queue(), "aider:input_queue:A");
        assert_eq!(a.output_queue(), "aider:output_queue:A");
    }

    #[tokio::test]
    async fn test_default_agent_id() {
        let conn = Arc::new(ConnectionManager::unconnected("memory://"));
        let messenger = AgentMessenger::with_connection(conn, Settings::default()).unwrap();
        assert!(messenger.agent_id().starts_with("agent:"));
    }

    #[tokio::test]
    async fn test_cleanup_releases_subscriptions_only() {
        let hub = MemoryHub::new();
        let a = messenger_on(&hub, "A");
        let b = messenger_on(&hub, "B");

        a.listen_broadcast().await;
        a.start_heartbeat().await;
        a.cleanup().await;

        b.send_user_input("after cleanup", None).await;
        assert!(a.bus().poll(DEFAULT_POLL_TIMEOUT).await.is_none());

        assert!(a.is_connected().await);
        b.send_user_input("queued", Some("A")).await;
        assert_eq!(a.receive_input(Duration::ZERO).await.unwrap().content(), "queued");
        assert!(a.directory().present_agents().await.is_empty());
    }

    #[tokio::test]
    async fn test_live_agents_follow_heartbeat() {
        let hub = MemoryHub::new();
        let a = messenger_on(&hub, "A");
        let b = messenger_on(&hub, "B");

        a.send_user_input("x", Some("B")).await;
        b.send_user_input("y", Some("A")).await;
        b.start_heartbeat().await;
        b.start_heartbeat().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(
            a.list_live_agents().await.into_iter().collect::<Vec<_>>(),
            vec!["B".to_string()]
        );
        b.cleanup().await;
        assert!(a.list_live_agents().await.is_empty());
    }

    #[tokio::test]
    async fn test_degraded_messenger() {
        let hub = MemoryHub::new();
        let a = messenger_on(&hub, "A");
        a.listen_broadcast().await;
        hub.set_online(false);

        assert!(!a.is_connected().await);
        assert_eq!(a.state().await, ConnectionState::Disconnected);
        a.send_user_input("lost", Some("B")).await;
        a.send_ai_output("lost", None).await;
        assert!(a.poll().await.is_none());
        assert!(a.receive_input(Duration::ZERO).await.is_none());
        assert!(a.receive_input(Duration::from_millis(20)).await.is_none());
        assert!(a.list_agents().await.is_empty());
        a.cleanup().await;
    }

    #[tokio::test]
    async fn test_unconnected_messenger() {
        let conn = Arc::new(ConnectionManager::unconnected("redis://127.0.0.1:1/0"));
        let a = AgentMessenger::with_connection(conn, Settings::default().with_agent_id("A")).unwrap();

        assert_eq!(a.state().await, ConnectionState::Unconnected);
        a.send_tool_output("nothing", Some("B")).await;
        assert!(a.poll().await.is_none());
        assert!(a.list_agents().await.is_empty());
        a.cleanup().await;
    }

    #[tokio::test]
    async fn test_invalid_settings_rejected() {
        let conn = Arc::new(ConnectionManager::unconnected("memory://"));
        assert!(AgentMessenger::with_connection(conn, Settings::default().with_prefix("")).is_err());
    }
}
