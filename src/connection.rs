//! Broker connection ownership and the degraded-mode guard.
//!
//! Every broker-touching operation in this crate goes through
//! [`ConnectionManager::guarded`], which probes liveness first and either runs
//! the operation or yields `None`. Callers never see an error: a dead broker
//! looks exactly like an empty one unless they ask [`ConnectionManager::is_connected`].

use std::future::Future;
use std::sync::{Arc, Mutex};

use crate::broker::{Broker, RedisBroker};

/// Default broker URL.
pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379/0";

/// Broker reachability as of the latest probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No handle: establishing the connection failed.
    Unconnected,
    /// Handle present and the last probe succeeded.
    Connected,
    /// Handle present but the last probe failed.
    Disconnected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Unconnected => "unconnected",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// Owns the broker handle for one agent process.
pub struct ConnectionManager {
    url: String,
    broker: Option<Arc<dyn Broker>>,
    last_state: Mutex<ConnectionState>,
}

impl ConnectionManager {
    /// Connect to the Redis broker at `url`.
    ///
    /// Never fails: an unreachable broker is logged once and leaves the
    /// manager `Unconnected`, after which every guarded operation is a no-op.
    pub async fn connect(url: &str) -> Self {
        match RedisBroker::connect(url).await {
            Ok(broker) => Self::with_broker(url, Arc::new(broker)),
            Err(e) => {
                tracing::error!("Error connecting to Redis at {}: {}", url, e);
                Self::unconnected(url)
            }
        }
    }

    /// Wrap an already established broker handle.
    pub fn with_broker(url: impl Into<String>, broker: Arc<dyn Broker>) -> Self {
        Self {
            url: url.into(),
            broker: Some(broker),
            last_state: Mutex::new(ConnectionState::Connected),
        }
    }

    /// A manager with no broker at all.
    pub fn unconnected(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            broker: None,
            last_state: Mutex::new(ConnectionState::Unconnected),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Probe the broker and return the resulting state.
    pub async fn probe(&self) -> ConnectionState {
        let state = match &self.broker {
            None => ConnectionState::Unconnected,
            Some(broker) => match broker.ping().await {
                Ok(()) => ConnectionState::Connected,
                Err(e) => {
                    tracing::debug!("Ping to {} broker failed: {}", broker.name(), e);
                    ConnectionState::Disconnected
                }
            },
        };
        self.record(state);
        state
    }

    /// Liveness check. Never errors.
    pub async fn is_connected(&self) -> bool {
        self.probe().await == ConnectionState::Connected
    }

    /// State seen by the most recent probe, without probing.
    pub fn last_state(&self) -> ConnectionState {
        self.last_state
            .lock()
            .map(|s| *s)
            .unwrap_or(ConnectionState::Disconnected)
    }

    /// The broker handle if the broker answers right now.
    pub async fn live_broker(&self) -> Option<Arc<dyn Broker>> {
        if self.is_connected().await {
            self.broker.clone()
        } else {
            None
        }
    }

    /// Run `op` against the broker if it is live.
    ///
    /// Returns `None` when the broker is unavailable or when the operation
    /// itself fails; failures after a successful probe are logged.
    pub async fn guarded<T, F, Fut>(&self, op: &'static str, f: F) -> Option<T>
    where
        F: FnOnce(Arc<dyn Broker>) -> Fut,
        Fut: Future<Output = crate::error::Result<T>>,
    {
        let broker = self.live_broker().await?;
        match f(broker).await {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Broker operation {} failed: {}", op, e);
                None
            }
        }
    }

    /// Handle regardless of liveness, for scoped teardown.
    pub(crate) fn broker(&self) -> Option<&Arc<dyn Broker>> {
        self.broker.as_ref()
    }

    fn record(&self, state: ConnectionState) {
        let Ok(mut last) = self.last_state.lock() else {
            return;
        };
        if *last == state {
            return;
        }
        match state {
            ConnectionState::Connected => tracing::info!("Broker at {} is reachable again", self.url),
            ConnectionState::Disconnected => tracing::warn!("Lost broker at {}", self.url),
            ConnectionState::Unconnected => {}
        }
        *last = state;
    }
}
