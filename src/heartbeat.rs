//! Presence heartbeats.
//!
//! A running heartbeat keeps `{prefix}presence:{agent}` alive with an expiry
//! of several intervals. When the process dies the key lapses on its own,
//! which is what lets the directory tell live agents from stale queues.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::connection::ConnectionManager;
use crate::protocol::{current_timestamp, ChannelAddressing};

/// Intervals a presence key survives without being refreshed.
const MISSED_BEATS_BEFORE_EXPIRY: u32 = 3;

/// Default interval between beats.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct Heartbeat {
    conn: Arc<ConnectionManager>,
    key: String,
    interval: Duration,
}

impl Heartbeat {
    pub fn new(conn: Arc<ConnectionManager>, names: &ChannelAddressing, agent_id: &str, interval: Duration) -> Self {
        Self {
            conn,
            key: names.presence(agent_id),
            interval,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn ttl(&self) -> Duration {
        self.interval * MISSED_BEATS_BEFORE_EXPIRY
    }

    /// Refresh the presence key once. Returns whether the broker took it.
    pub async fn beat(&self) -> bool {
        let value = current_timestamp().to_string();
        let ttl = self.ttl();
        let key = self.key.as_str();
        self.conn
            .guarded("heartbeat", |broker| async move {
                broker.set_with_expiry(key, value.as_bytes(), ttl).await
            })
            .await
            .is_some()
    }

    /// Remove the presence key.
    pub async fn clear(&self) {
        let key = self.key.as_str();
        self.conn
            .guarded("heartbeat clear", |broker| async move { broker.delete(key).await })
            .await;
    }

    /// Beat every interval on a background task until stopped.
    pub fn spawn(self) -> HeartbeatHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let heartbeat = self;

        let task = tokio::spawn(async move {
            tracing::info!("Heartbeat started for {} every {:?}", heartbeat.key, heartbeat.interval);
            let mut ticker = tokio::time::interval(heartbeat.interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !heartbeat.beat().await {
                            tracing::debug!("Heartbeat for {} skipped, broker unavailable", heartbeat.key);
                        }
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            heartbeat.clear().await;
            tracing::info!("Heartbeat stopped for {}", heartbeat.key);
        });

        HeartbeatHandle {
            stop: stop_tx,
            task,
        }
    }
}

/// Stops a spawned heartbeat.
pub struct HeartbeatHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    /// Stop beating and remove the presence key.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!("Heartbeat task ended abnormally: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
