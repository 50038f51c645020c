//! Redis-backed broker.

use std::sync::Mutex as StdMutex;
use std::time::Duration;

use ::redis::aio::MultiplexedConnection;
use ::redis::{AsyncCommands, Client, Connection, PubSub, RedisResult};
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Mutex};

use super::{Broker, ChannelMessage};
use crate::error::{Error, Result};

/// Upper bound on a liveness round trip.
const PING_TIMEOUT: Duration = Duration::from_secs(2);

/// Smallest timeout BLPOP distinguishes from "wait forever".
const MIN_BLOCKING_TIMEOUT_SECS: f64 = 0.001;

/// Idle connections kept around for blocking pops.
const MAX_IDLE_BLOCKING_CONNECTIONS: usize = 4;

/// How long the subscriber thread waits on the socket before checking for
/// subscription changes.
const SUBSCRIBER_TICK: Duration = Duration::from_millis(20);

/// Read timeout while waiting for a SUBSCRIBE or UNSUBSCRIBE reply.
const SUBSCRIBE_REPLY_TIMEOUT: Duration = Duration::from_secs(2);

/// Broker speaking to a Redis server.
///
/// Ordinary commands share one multiplexed connection. Redis serves blocked
/// commands one at a time per connection, so every BLPOP runs on a connection
/// of its own, taken from a small idle pool. The subscription context is a
/// dedicated connection owned by a [`Subscriber`] thread.
pub struct RedisBroker {
    url: String,
    client: Client,
    commands: MultiplexedConnection,
    blocking_idle: StdMutex<Vec<MultiplexedConnection>>,
    subscriber: Subscriber,
}

impl RedisBroker {
    /// Open the command connection and start the subscriber.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let commands = client.get_multiplexed_async_connection().await?;
        let subscriber = Subscriber::start(&client).await?;

        tracing::info!("Connected to Redis at {}", url);

        Ok(Self {
            url: url.to_string(),
            client,
            commands,
            blocking_idle: StdMutex::new(Vec::new()),
            subscriber,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn blocking_connection(&self) -> Result<MultiplexedConnection> {
        let idle = self.blocking_idle.lock().ok().and_then(|mut idle| idle.pop());
        match idle {
            Some(conn) => Ok(conn),
            None => Ok(self.client.get_multiplexed_async_connection().await?),
        }
    }

    fn release_blocking_connection(&self, conn: MultiplexedConnection) {
        if let Ok(mut idle) = self.blocking_idle.lock() {
            if idle.len() < MAX_IDLE_BLOCKING_CONNECTIONS {
                idle.push(conn);
            }
        }
    }
}

#[async_trait]
impl Broker for RedisBroker {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.commands.clone();
        let ping = async move {
            let reply: String = ::redis::cmd("PING").query_async(&mut conn).await?;
            Ok::<_, Error>(reply)
        };
        let reply = tokio::time::timeout(PING_TIMEOUT, ping)
            .await
            .map_err(|_| Error::Broker(format!("PING to {} timed out", self.url)))??;

        if reply == "PONG" {
            Ok(())
        } else {
            Err(Error::Broker(format!("unexpected PING reply: {}", reply)))
        }
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<usize> {
        let mut conn = self.commands.clone();
        let receivers: usize = conn.publish(channel, payload).await?;
        Ok(receivers)
    }

    async fn subscribe(&self, channel: &str) -> Result<()> {
        self.subscriber.subscribe(channel).await
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        self.subscriber.unsubscribe(channel).await
    }

    async fn next_message(&self, timeout: Duration) -> Result<Option<ChannelMessage>> {
        self.subscriber.next_message(timeout).await
    }

    async fn close_subscriptions(&self) -> Result<()> {
        self.subscriber.close();
        Ok(())
    }

    async fn push_back(&self, key: &str, payload: &[u8]) -> Result<()> {
        let mut conn = self.commands.clone();
        let _len: usize = conn.rpush(key, payload).await?;
        Ok(())
    }

    async fn pop_front(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.commands.clone();
        Ok(conn.lpop(key, None).await?)
    }

    async fn pop_front_blocking(&self, key: &str, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let mut conn = self.blocking_connection().await?;
        let seconds = timeout.as_secs_f64().max(MIN_BLOCKING_TIMEOUT_SECS);
        let popped: Option<(String, Vec<u8>)> = conn.blpop(key, seconds).await?;
        self.release_blocking_connection(conn);
        Ok(popped.map(|(_, payload)| payload))
    }

    async fn list_len(&self, key: &str) -> Result<usize> {
        let mut conn = self.commands.clone();
        Ok(conn.llen(key).await?)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.commands.clone();
        Ok(conn.keys(pattern).await?)
    }

    async fn set_with_expiry(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut conn = self.commands.clone();
        let seconds = ttl.as_secs().max(1);
        let _: () = conn.set_ex(key, value, seconds).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.commands.clone();
        let _removed: usize = conn.del(key).await?;
        Ok(())
    }
}

enum SubscriberCommand {
    Subscribe(String, oneshot::Sender<RedisResult<()>>),
    Unsubscribe(String, oneshot::Sender<RedisResult<()>>),
}

/// Subscription context on a dedicated connection.
///
/// A thread owns the connection for its whole life and forwards every
/// message into an inbox, so frames that arrive together or while a
/// SUBSCRIBE is in flight are all kept. Subscription changes reach the thread
/// over a command channel. Dropping the command sender stops the thread and
/// closes the connection.
struct Subscriber {
    commands: StdMutex<Option<mpsc::UnboundedSender<SubscriberCommand>>>,
    inbox: Mutex<mpsc::UnboundedReceiver<ChannelMessage>>,
}

impl Subscriber {
    async fn start(client: &Client) -> Result<Self> {
        let client = client.clone();
        let conn = tokio::task::spawn_blocking(move || client.get_connection())
            .await
            .map_err(|e| Error::Broker(format!("subscriber connect task failed: {}", e)))??;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();

        std::thread::Builder::new()
            .name("agentbus-pubsub".to_string())
            .spawn(move || run_subscriber(conn, command_rx, inbox_tx))?;

        Ok(Self {
            commands: StdMutex::new(Some(command_tx)),
            inbox: Mutex::new(inbox_rx),
        })
    }

    async fn subscribe(&self, channel: &str) -> Result<()> {
        self.request(|reply| SubscriberCommand::Subscribe(channel.to_string(), reply))
            .await
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        self.request(|reply| SubscriberCommand::Unsubscribe(channel.to_string(), reply))
            .await
    }

    async fn request<F>(&self, command: F) -> Result<()>
    where
        F: FnOnce(oneshot::Sender<RedisResult<()>>) -> SubscriberCommand,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let commands = self
                .commands
                .lock()
                .map_err(|_| Error::Broker("subscriber state poisoned".to_string()))?;
            let Some(sender) = commands.as_ref() else {
                tracing::debug!("Subscription context closed, ignoring request");
                return Ok(());
            };
            sender
                .send(command(reply_tx))
                .map_err(|_| Error::Broker("pub/sub connection closed".to_string()))?;
        }

        let reply = reply_rx
            .await
            .map_err(|_| Error::Broker("pub/sub connection closed".to_string()))?;
        Ok(reply?)
    }

    async fn next_message(&self, timeout: Duration) -> Result<Option<ChannelMessage>> {
        if self.is_closed() {
            return Ok(None);
        }

        let mut inbox = self.inbox.lock().await;
        match tokio::time::timeout(timeout, inbox.recv()).await {
            Ok(Some(message)) => Ok(Some(message)),
            Ok(None) => Err(Error::Broker("pub/sub connection closed".to_string())),
            Err(_) => Ok(None),
        }
    }

    fn close(&self) {
        let closed = self
            .commands
            .lock()
            .map(|mut commands| commands.take().is_some())
            .unwrap_or(false);
        if closed {
            tracing::debug!("Closed Redis pub/sub connection");
        }
    }

    fn is_closed(&self) -> bool {
        self.commands.lock().map(|c| c.is_none()).unwrap_or(true)
    }
}

fn run_subscriber(
    mut conn: Connection,
    mut commands: mpsc::UnboundedReceiver<SubscriberCommand>,
    inbox: mpsc::UnboundedSender<ChannelMessage>,
) {
    let mut pubsub = conn.as_pubsub();
    if let Err(e) = pubsub.set_read_timeout(Some(SUBSCRIBER_TICK)) {
        tracing::warn!("Failed to configure pub/sub connection: {}", e);
        return;
    }

    loop {
        loop {
            let (result, reply) = match commands.try_recv() {
                Ok(SubscriberCommand::Subscribe(channel, reply)) => {
                    (with_reply_timeout(&mut pubsub, |p| p.subscribe(channel.as_str())), reply)
                }
                Ok(SubscriberCommand::Unsubscribe(channel, reply)) => {
                    (with_reply_timeout(&mut pubsub, |p| p.unsubscribe(channel.as_str())), reply)
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => return,
            };
            let _ = reply.send(result);
        }

        match pubsub.get_message() {
            Ok(msg) => {
                let message = ChannelMessage {
                    channel: msg.get_channel_name().to_string(),
                    payload: msg.get_payload_bytes().to_vec(),
                };
                if inbox.send(message).is_err() {
                    return;
                }
            }
            Err(e) if e.is_timeout() => {}
            Err(e) => {
                tracing::warn!("Redis pub/sub connection failed: {}", e);
                return;
            }
        }
    }
}

fn with_reply_timeout<'a, F>(pubsub: &mut PubSub<'a>, f: F) -> RedisResult<()>
where
    F: FnOnce(&mut PubSub<'a>) -> RedisResult<()>,
{
    pubsub.set_read_timeout(Some(SUBSCRIBE_REPLY_TIMEOUT))?;
    let result = f(pubsub);
    pubsub.set_read_timeout(Some(SUBSCRIBER_TICK))?;
    result
}
