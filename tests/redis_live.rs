//! Tests against a real Redis server.
//!
//! Ignored by default. Run with
//! `AGENTBUS_TEST_REDIS_URL=redis://localhost:6379/15 cargo test -- --ignored`.
//! Every test uses its own channel prefix so runs do not see each other.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use agentbus::{AgentMessenger, ConnectionManager, ConnectionState, MessageKind, Settings};

fn redis_url() -> String {
    std::env::var("AGENTBUS_TEST_REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379/15".to_string())
}

fn unique_prefix(test: &str) -> String {
    format!("agentbus-test:{}:{}:", test, agentbus::protocol::current_timestamp())
}

async fn messenger(prefix: &str, agent_id: &str) -> AgentMessenger {
    let settings = Settings::default()
        .with_redis_url(redis_url())
        .with_prefix(prefix)
        .with_agent_id(agent_id);
    let messenger = AgentMessenger::connect(settings).await.unwrap();
    assert!(messenger.is_connected().await, "redis not reachable at {}", redis_url());
    messenger
}

#[tokio::test]
#[ignore]
async fn test_directed_delivery_and_directory() {
    let prefix = unique_prefix("directed");
    let a = messenger(&prefix, "A").await;
    let b = messenger(&prefix, "B").await;

    b.send_user_input("to A", Some("A")).await;
    let sent = a.send_user_input("hello", Some("B")).await;

    let expected: BTreeSet<String> = ["A", "B"].iter().map(|s| s.to_string()).collect();
    assert_eq!(a.list_agents().await, expected);

    let received = b.receive_input(Duration::from_secs(1)).await.unwrap();
    assert_eq!(received, sent);
    assert_eq!(received.kind(), Some(MessageKind::UserInput));

    a.queues().clear(&a.input_queue()).await;
    assert!(a.list_agents().await.is_empty());
}

#[tokio::test]
#[ignore]
async fn test_broadcast_fan_out() {
    let prefix = unique_prefix("broadcast");
    let a = messenger(&prefix, "A").await;
    let b = messenger(&prefix, "B").await;
    let c = messenger(&prefix, "C").await;

    a.listen_broadcast().await;
    b.listen_broadcast().await;
    let sent = c.send_ai_output("to everyone", None).await;

    assert_eq!(a.bus().poll(Duration::from_secs(1)).await, Some(sent.clone()));
    assert_eq!(b.bus().poll(Duration::from_secs(1)).await, Some(sent));

    a.cleanup().await;
    b.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn test_back_to_back_broadcasts_all_arrive() {
    let prefix = unique_prefix("burst");
    let a = messenger(&prefix, "A").await;
    let b = messenger(&prefix, "B").await;

    a.listen_broadcast().await;
    let mut sent = Vec::new();
    for i in 0..5 {
        sent.push(b.send_ai_output(&format!("burst {}", i), None).await);
    }

    for expected in sent {
        assert_eq!(a.bus().poll(Duration::from_secs(1)).await, Some(expected));
    }
    assert_eq!(a.bus().poll(Duration::from_millis(50)).await, None);

    a.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn test_blocking_pop_times_out() {
    let prefix = unique_prefix("timeout");
    let a = messenger(&prefix, "A").await;

    let started = Instant::now();
    assert!(a.receive_input(Duration::from_secs(1)).await.is_none());
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(900), "returned after {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(3), "returned after {:?}", elapsed);
}

#[tokio::test]
#[ignore]
async fn test_heartbeat_marks_agent_live() {
    let prefix = unique_prefix("heartbeat");
    let a = messenger(&prefix, "A").await;
    let b = messenger(&prefix, "B").await;

    a.send_user_input("x", Some("B")).await;
    b.start_heartbeat().await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(a.list_live_agents().await.contains("B"));

    b.cleanup().await;
    assert!(a.list_live_agents().await.is_empty());
    b.queues().clear(&b.input_queue()).await;
}

#[tokio::test]
async fn test_unreachable_server_degrades() {
    let conn = Arc::new(ConnectionManager::connect("redis://127.0.0.1:1/0").await);
    assert_eq!(conn.probe().await, ConnectionState::Unconnected);

    let a = AgentMessenger::with_connection(conn, Settings::default().with_agent_id("A")).unwrap();
    a.send_user_input("lost", Some("B")).await;
    assert!(a.receive_input(Duration::from_millis(50)).await.is_none());
    assert!(a.list_agents().await.is_empty());
}
