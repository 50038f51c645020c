//! Agent discovery by key enumeration.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::connection::ConnectionManager;
use crate::protocol::{ChannelAddressing, Role};

/// Point-in-time view of the agents known to the broker.
///
/// An agent is listed while its input queue exists, which outlives the
/// owning process. [`AgentDirectory::list_live_agents`] narrows that down to
/// agents whose heartbeat is still fresh.
pub struct AgentDirectory {
    conn: Arc<ConnectionManager>,
    names: ChannelAddressing,
}

impl AgentDirectory {
    pub fn new(conn: Arc<ConnectionManager>, names: ChannelAddressing) -> Self {
        Self { conn, names }
    }

    /// Agents that currently have an input queue.
    pub async fn list_agents(&self) -> BTreeSet<String> {
        self.agents_with(Role::InputQueue).await
    }

    /// Agents with a live presence key.
    pub async fn present_agents(&self) -> BTreeSet<String> {
        self.agents_with(Role::Presence).await
    }

    /// Agents that have an input queue and a live heartbeat.
    pub async fn list_live_agents(&self) -> BTreeSet<String> {
        let present = self.present_agents().await;
        if present.is_empty() {
            return present;
        }
        self.list_agents()
            .await
            .into_iter()
            .filter(|agent| present.contains(agent))
            .collect()
    }

    async fn agents_with(&self, role: Role) -> BTreeSet<String> {
        let pattern = self.names.pattern(role);
        let keys = self
            .conn
            .guarded("keys", |broker| async move { broker.keys(&pattern).await })
            .await
            .unwrap_or_default();

        keys.iter()
            .filter_map(|key| self.names.agent_from_key(role, key))
            .map(str::to_string)
            .collect()
    }
}
