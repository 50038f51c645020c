//! Channel and queue naming.
//!
//! Names are never stored: every process derives them from the shared prefix
//! and an agent id, so two agents configured with the same prefix agree on
//! every address without a registry.

/// Default prefix for channels and keys.
pub const DEFAULT_PREFIX: &str = "aider:";

/// What a derived name is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Transient per-agent input channel
    Input,
    /// Transient per-agent output channel
    Output,
    /// The single shared transient channel
    Broadcast,
    /// Durable per-agent input queue
    InputQueue,
    /// Durable per-agent output queue
    OutputQueue,
    /// Expiring per-agent presence key written by heartbeats
    Presence,
}

impl Role {
    pub fn token(self) -> &'static str {
        match self {
            Role::Input => "input",
            Role::Output => "output",
            Role::Broadcast => "broadcast",
            Role::InputQueue => "input_queue",
            Role::OutputQueue => "output_queue",
            Role::Presence => "presence",
        }
    }

    /// Whether names of this role address broker-resident lists.
    pub fn is_durable(self) -> bool {
        matches!(self, Role::InputQueue | Role::OutputQueue)
    }

    /// Whether names of this role carry an agent suffix.
    pub fn is_per_agent(self) -> bool {
        !matches!(self, Role::Broadcast)
    }
}

/// Pure name derivation for one prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelAddressing {
    prefix: String,
}

impl Default for ChannelAddressing {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

impl ChannelAddressing {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Canonical name for `role`. The agent id is ignored for `Broadcast`.
    pub fn name(&self, role: Role, agent_id: &str) -> String {
        if role.is_per_agent() {
            format!("{}{}:{}", self.prefix, role.token(), agent_id)
        } else {
            format!("{}{}", self.prefix, role.token())
        }
    }

    pub fn input(&self, agent_id: &str) -> String {
        self.name(Role::Input, agent_id)
    }

    pub fn output(&self, agent_id: &str) -> String {
        self.name(Role::Output, agent_id)
    }

    pub fn broadcast(&self) -> String {
        self.name(Role::Broadcast, "")
    }

    pub fn input_queue(&self, agent_id: &str) -> String {
        self.name(Role::InputQueue, agent_id)
    }

    pub fn output_queue(&self, agent_id: &str) -> String {
        self.name(Role::OutputQueue, agent_id)
    }

    pub fn presence(&self, agent_id: &str) -> String {
        self.name(Role::Presence, agent_id)
    }

    /// Glob matching every per-agent name of `role`, prefix metacharacters escaped.
    pub fn pattern(&self, role: Role) -> String {
        format!("{}{}:*", escape_glob(&self.prefix), role.token())
    }

    /// Agent id of `key`, if `key` is a name of `role` under this prefix.
    ///
    /// The id is the text after the final `:`, which is how every peer on the
    /// bus reads key names. An id that itself contains `:` comes back as its
    /// last segment only.
    pub fn agent_from_key<'a>(&self, role: Role, key: &'a str) -> Option<&'a str> {
        let rest = key.strip_prefix(self.prefix.as_str())?;
        rest.strip_prefix(role.token())?.strip_prefix(':')?;
        let (_, id) = key.rsplit_once(':')?;
        if id.is_empty() {
            None
        } else {
            Some(id)
        }
    }
}

fn escape_glob(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
