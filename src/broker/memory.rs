//! In-process broker.
//!
//! A [`MemoryHub`] plays the role of the shared server. Each
//! [`MemoryBroker`] handed out by [`MemoryHub::connect`] is one client with
//! its own subscription context, so several handles on one hub behave like
//! several agent processes talking to the same Redis. Taking the hub offline
//! makes every client operation fail, which models an outage.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;

use super::{Broker, ChannelMessage};
use crate::error::{Error, Result};

#[derive(Default)]
struct HubState {
    lists: HashMap<String, VecDeque<Vec<u8>>>,
    values: HashMap<String, (Vec<u8>, Instant)>,
    subscribers: HashMap<String, HashMap<u64, mpsc::UnboundedSender<ChannelMessage>>>,
}

impl HubState {
    fn pop(&mut self, key: &str) -> Option<Vec<u8>> {
        let list = self.lists.get_mut(key)?;
        let item = list.pop_front();
        // Emptied lists disappear, as in Redis.
        if list.is_empty() {
            self.lists.remove(key);
        }
        item
    }

    fn purge_expired(&mut self) {
        let now = Instant::now();
        self.values.retain(|_, (_, expires_at)| *expires_at > now);
    }
}

struct HubInner {
    state: Mutex<HubState>,
    pushed: Notify,
    online: AtomicBool,
    next_client: AtomicU64,
}

/// Shared in-process broker state.
#[derive(Clone)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                state: Mutex::new(HubState::default()),
                pushed: Notify::new(),
                online: AtomicBool::new(true),
                next_client: AtomicU64::new(0),
            }),
        }
    }

    /// Open a new client on this hub.
    pub fn connect(&self) -> MemoryBroker {
        let (sender, receiver) = mpsc::unbounded_channel();
        MemoryBroker {
            hub: self.inner.clone(),
            id: self.inner.next_client.fetch_add(1, Ordering::Relaxed),
            sender,
            inbox: tokio::sync::Mutex::new(receiver),
            subscriptions: Mutex::new(HashSet::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Bring the hub up or down for every client.
    pub fn set_online(&self, online: bool) {
        self.inner.online.store(online, Ordering::SeqCst);
        if !online {
            // Wake blocked pops so they observe the outage.
            self.inner.pushed.notify_waiters();
        }
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }
}

/// One client of a [`MemoryHub`].
pub struct MemoryBroker {
    hub: Arc<HubInner>,
    id: u64,
    sender: mpsc::UnboundedSender<ChannelMessage>,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<ChannelMessage>>,
    subscriptions: Mutex<HashSet<String>>,
    closed: AtomicBool,
}

impl MemoryBroker {
    /// A client on a fresh private hub.
    pub fn standalone() -> Self {
        MemoryHub::new().connect()
    }

    fn state(&self) -> Result<MutexGuard<'_, HubState>> {
        if !self.hub.online.load(Ordering::SeqCst) {
            return Err(Error::Broker("memory broker is offline".to_string()));
        }
        self.hub
            .state
            .lock()
            .map_err(|_| Error::Broker("memory broker state poisoned".to_string()))
    }

    fn subscriptions(&self) -> Result<MutexGuard<'_, HashSet<String>>> {
        self.subscriptions
            .lock()
            .map_err(|_| Error::Broker("subscription set poisoned".to_string()))
    }
}

impl Drop for MemoryBroker {
    fn drop(&mut self) {
        let channels: Vec<String> = match self.subscriptions.lock() {
            Ok(subs) => subs.iter().cloned().collect(),
            Err(_) => return,
        };
        if let Ok(mut state) = self.hub.state.lock() {
            for channel in channels {
                if let Some(subs) = state.subscribers.get_mut(&channel) {
                    subs.remove(&self.id);
                }
            }
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<()> {
        self.state().map(|_| ())
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<usize> {
        let state = self.state()?;
        let Some(subs) = state.subscribers.get(channel) else {
            return Ok(0);
        };

        let mut reached = 0;
        for sender in subs.values() {
            let message = ChannelMessage {
                channel: channel.to_string(),
                payload: payload.to_vec(),
            };
            if sender.send(message).is_ok() {
                reached += 1;
            }
        }
        Ok(reached)
    }

    async fn subscribe(&self, channel: &str) -> Result<()> {
        let mut state = self.state()?;
        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.subscriptions()?.insert(channel.to_string());
        state
            .subscribers
            .entry(channel.to_string())
            .or_default()
            .insert(self.id, self.sender.clone());
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        let mut state = self.state()?;
        self.subscriptions()?.remove(channel);
        if let Some(subs) = state.subscribers.get_mut(channel) {
            subs.remove(&self.id);
            if subs.is_empty() {
                state.subscribers.remove(channel);
            }
        }
        Ok(())
    }

    async fn next_message(&self, timeout: Duration) -> Result<Option<ChannelMessage>> {
        drop(self.state()?);
        if self.closed.load(Ordering::SeqCst) {
            return Ok(None);
        }

        let mut inbox = self.inbox.lock().await;
        match tokio::time::timeout(timeout, inbox.recv()).await {
            Ok(message) => Ok(message),
            Err(_) => Ok(None),
        }
    }

    async fn close_subscriptions(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        let channels: Vec<String> = self.subscriptions()?.drain().collect();
        if let Ok(mut state) = self.hub.state.lock() {
            for channel in channels {
                if let Some(subs) = state.subscribers.get_mut(&channel) {
                    subs.remove(&self.id);
                }
            }
        }
        Ok(())
    }

    async fn push_back(&self, key: &str, payload: &[u8]) -> Result<()> {
        let mut state = self.state()?;
        state
            .lists
            .entry(key.to_string())
            .or_default()
            .push_back(payload.to_vec());
        self.hub.pushed.notify_waiters();
        Ok(())
    }

    async fn pop_front(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.state()?.pop(key))
    }

    async fn pop_front_blocking(&self, key: &str, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let deadline = Instant::now() + timeout;
        loop {
            let pushed = {
                let mut state = self.state()?;
                if let Some(item) = state.pop(key) {
                    return Ok(Some(item));
                }
                // Registered before the lock is released, so a push between
                // here and the await below still wakes us.
                self.hub.pushed.notified()
            };

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || tokio::time::timeout(remaining, pushed).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn list_len(&self, key: &str) -> Result<usize> {
        Ok(self.state()?.lists.get(key).map_or(0, VecDeque::len))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let matcher = glob::Pattern::new(&redis_pattern_to_glob(pattern))
            .map_err(|e| Error::Broker(format!("invalid key pattern '{}': {}", pattern, e)))?;

        let mut state = self.state()?;
        state.purge_expired();
        let mut keys: Vec<String> = state
            .lists
            .keys()
            .chain(state.values.keys())
            .filter(|key| matcher.matches(key))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn set_with_expiry(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut state = self.state()?;
        state.lists.remove(key);
        state
            .values
            .insert(key.to_string(), (value.to_vec(), Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut state = self.state()?;
        state.lists.remove(key);
        state.values.remove(key);
        Ok(())
    }
}

/// Translate Redis backslash escapes into `glob` bracket escapes.
fn redis_pattern_to_glob(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(escaped) => {
                    out.push('[');
                    out.push(escaped);
                    out.push(']');
                }
                None => out.push_str("[\\]"),
            }
        } else {
            out.push(c);
        }
    }
    out
}
