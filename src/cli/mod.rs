//! CLI commands for agentbus using clap.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::time::Duration;

use crate::config::{load_settings_or_default, Settings};
use crate::messenger::AgentMessenger;
use crate::protocol::{MessageEnvelope, MessageKind};

/// agentbus - Redis-backed messaging between cooperating agents.
#[derive(Parser)]
#[command(name = "agentbus")]
#[command(version)]
#[command(about = "Redis-backed messaging between cooperating agents", long_about = None)]
pub struct Commands {
    /// Redis connection URL
    #[arg(long, global = true, env = "AGENTBUS_REDIS_URL")]
    pub redis_url: Option<String>,

    /// Prefix for every channel and queue name
    #[arg(long, global = true, env = "AGENTBUS_PREFIX")]
    pub prefix: Option<String>,

    /// Identity of this agent
    #[arg(long, global = true, env = "AGENTBUS_AGENT_ID")]
    pub agent_id: Option<String>,

    /// Log per-message traffic
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show broker connectivity and this agent's names
    Status,

    /// List agents with an input queue
    Agents {
        /// Only agents with a fresh heartbeat
        #[arg(long)]
        live: bool,
    },

    /// Send a message, to one agent or to everyone
    Send {
        /// Message kind: user_input, ai_output or tool_output
        kind: MessageKind,

        /// Message content
        content: String,

        /// Target agent; broadcast when omitted
        #[arg(long)]
        to: Option<String>,
    },

    /// Pop one message from this agent's queue
    Recv {
        /// Queue to read
        #[arg(long, value_enum, default_value_t = QueueArg::Input)]
        queue: QueueArg,

        /// Seconds to wait; 0 returns immediately
        #[arg(long, default_value_t = 0.0)]
        timeout: f64,
    },

    /// Print messages published on a channel until interrupted
    Listen {
        /// Channel name; the broadcast channel when omitted
        #[arg(long)]
        channel: Option<String>,
    },

    /// Keep this agent's presence key alive until interrupted
    Heartbeat {
        /// Seconds between beats
        #[arg(long)]
        interval: Option<u64>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum QueueArg {
    Input,
    Output,
}

impl Commands {
    /// Settings from ~/.agentbus/settings.json with flags layered on top.
    pub fn settings(&self) -> Settings {
        self.overlay(load_settings_or_default())
    }

    /// Layer the command line flags over `settings`.
    pub fn overlay(&self, mut settings: Settings) -> Settings {
        if let Some(url) = &self.redis_url {
            settings.redis_url = url.clone();
        }
        if let Some(prefix) = &self.prefix {
            settings.channel_prefix = prefix.clone();
        }
        if let Some(agent_id) = &self.agent_id {
            settings.agent_id = Some(agent_id.clone());
        }
        settings.verbose |= self.verbose;
        settings
    }

    /// Run the command with already resolved settings.
    pub async fn run(&self, settings: Settings) -> Result<()> {
        match &self.command {
            Command::Status => cmd_status(settings).await,
            Command::Agents { live } => cmd_agents(settings, *live).await,
            Command::Send { kind, content, to } => cmd_send(settings, *kind, content, to.as_deref()).await,
            Command::Recv { queue, timeout } => cmd_recv(settings, *queue, *timeout).await,
            Command::Listen { channel } => cmd_listen(settings, channel.as_deref()).await,
            Command::Heartbeat { interval } => cmd_heartbeat(settings, *interval).await,
        }
    }
}

// Command implementations

async fn cmd_status(settings: Settings) -> Result<()> {
    let messenger = AgentMessenger::connect(settings).await?;
    let state = messenger.state().await;

    println!("Broker:    {} ({})", messenger.connection().url(), state);
    println!("Agent:     {}", messenger.agent_id());
    println!("Prefix:    {}", messenger.names().prefix());
    println!("Input:     {}", messenger.input_queue());
    println!("Output:    {}", messenger.output_queue());
    println!("Broadcast: {}", messenger.broadcast_channel());

    if messenger.is_connected().await {
        let agents = messenger.list_agents().await;
        let live = messenger.list_live_agents().await;
        println!("\nAgents: {} known, {} live", agents.len(), live.len());
        println!(
            "Pending: input={} output={}",
            messenger.queues().len(&messenger.input_queue()).await,
            messenger.queues().len(&messenger.output_queue()).await
        );
    }
    Ok(())
}

async fn cmd_agents(settings: Settings, live: bool) -> Result<()> {
    let messenger = AgentMessenger::connect(settings).await?;
    if !messenger.is_connected().await {
        anyhow::bail!("Broker unavailable at {}", messenger.connection().url());
    }

    let agents = if live {
        messenger.list_live_agents().await
    } else {
        messenger.list_agents().await
    };

    if agents.is_empty() {
        println!("No agents found.");
        return Ok(());
    }
    for agent in agents {
        println!("{}", agent);
    }
    Ok(())
}

async fn cmd_send(settings: Settings, kind: MessageKind, content: &str, to: Option<&str>) -> Result<()> {
    let messenger = AgentMessenger::connect(settings).await?;
    if !messenger.is_connected().await {
        anyhow::bail!("Broker unavailable at {}, message not sent", messenger.connection().url());
    }

    let envelope = messenger.send(kind, content, to).await;
    match to.filter(|t| !t.is_empty()) {
        Some(target) => println!("Queued {} for {}", envelope.type_name(), target),
        None => println!("Broadcast {} on {}", envelope.type_name(), messenger.broadcast_channel()),
    }
    Ok(())
}

async fn cmd_recv(settings: Settings, queue: QueueArg, timeout: f64) -> Result<()> {
    let timeout = parse_timeout(timeout)?;
    let messenger = AgentMessenger::connect(settings).await?;

    let received = match queue {
        QueueArg::Input => messenger.receive_input(timeout).await,
        QueueArg::Output => messenger.receive_output(timeout).await,
    };

    match received {
        Some(envelope) => println!("{}", format_envelope(&envelope)),
        None => println!("No message."),
    }
    Ok(())
}

async fn cmd_listen(settings: Settings, channel: Option<&str>) -> Result<()> {
    let messenger = AgentMessenger::connect(settings).await?;
    if !messenger.is_connected().await {
        anyhow::bail!("Broker unavailable at {}", messenger.connection().url());
    }

    let channel = channel
        .map(str::to_string)
        .unwrap_or_else(|| messenger.broadcast_channel());
    messenger.bus().subscribe(&channel).await;
    println!("Listening on {} (Ctrl+C to stop)", channel);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            received = messenger.bus().poll(Duration::from_millis(500)) => {
                if let Some(envelope) = received {
                    println!("{}", format_envelope(&envelope));
                }
            }
        }
    }

    messenger.cleanup().await;
    Ok(())
}

async fn cmd_heartbeat(settings: Settings, interval: Option<u64>) -> Result<()> {
    let mut settings = settings;
    if interval.is_some() {
        settings.heartbeat_interval_secs = interval;
    }
    let messenger = AgentMessenger::connect(settings).await?;

    messenger.start_heartbeat().await;
    println!("Heartbeat running for {} (Ctrl+C to stop)", messenger.agent_id());

    tokio::signal::ctrl_c().await.ok();
    messenger.cleanup().await;
    println!("Heartbeat stopped.");
    Ok(())
}

fn parse_timeout(seconds: f64) -> Result<Duration> {
    match Duration::try_from_secs_f64(seconds) {
        Ok(timeout) => Ok(timeout),
        Err(_) => anyhow::bail!("timeout must be a non-negative number of seconds, got {}", seconds),
    }
}

fn format_envelope(envelope: &MessageEnvelope) -> String {
    let when = envelope
        .timestamp()
        .map(format_ts)
        .unwrap_or_else(|| "-".to_string());
    let from = envelope.from_agent().unwrap_or("?");
    format!("[{}] {} from {}: {}", when, envelope.type_name(), from, envelope.content())
}

fn format_ts(ts: f64) -> String {
    let micros = (ts * 1_000_000.0) as i64;
    chrono::DateTime::<chrono::Utc>::from_timestamp_micros(micros)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}
