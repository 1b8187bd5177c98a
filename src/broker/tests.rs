use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tungstenite::protocol::Message as WsMessage;

use super::TopicsManager;
use super::bridge::{self, BridgeState};
use super::topic::Topic;
use crate::client::Connection;
use crate::config::BridgeSettings;
use crate::transport::message::{BroadcastMessage, EventMessage, Message};
use crate::utils::{BrokerError, NODE_ID};

fn new_connection() -> (Arc<Connection>, UnboundedReceiver<WsMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(Connection::new(tx)), rx)
}

fn sample_event() -> EventMessage {
    EventMessage {
        subscription_id: 0,
        publication_id: 42,
        details: json!({}),
        args: vec![json!({ "text": "hi" })],
        kwargs: json!({}),
    }
}

fn sample_broadcast(
    topic_name: &str,
    origin_connection: Option<&str>,
    origin_node: &str,
) -> BroadcastMessage {
    BroadcastMessage {
        topic_name: topic_name.to_string(),
        event: sample_event(),
        origin_connection_id: origin_connection.map(str::to_owned),
        origin_node_id: origin_node.to_string(),
    }
}

// Loopback port 1 has no listener, so every connect attempt is refused.
fn unreachable_bridge() -> BridgeSettings {
    BridgeSettings {
        host: "127.0.0.1".to_string(),
        port: 1,
        db: None,
        password: None,
    }
}

fn recv_event(rx: &mut UnboundedReceiver<WsMessage>) -> Option<EventMessage> {
    let msg = rx.try_recv().ok()?;
    let WsMessage::Text(text) = msg else {
        panic!("expected a text frame, got {msg:?}");
    };
    match Message::from_text(&text).unwrap() {
        Message::Event(event) => Some(event),
        other => panic!("expected an EVENT, got code {}", other.code()),
    }
}

#[tokio::test]
async fn publish_excludes_the_originator() {
    let registry = TopicsManager::new();
    let (a, mut a_rx) = new_connection();
    let (b, mut b_rx) = new_connection();
    registry
        .add_subscriber("chat", Arc::clone(&a), None)
        .await
        .unwrap();
    registry
        .add_subscriber("chat", Arc::clone(&b), None)
        .await
        .unwrap();

    let broadcast = sample_broadcast("chat", Some(&a.id), &NODE_ID);
    let ack = registry.publish("chat", &broadcast).await.unwrap();

    // No bridge: no broker acknowledgment.
    assert_eq!(ack, None);
    let event = recv_event(&mut b_rx).expect("B should receive the event");
    assert_eq!(event.args, vec![json!({ "text": "hi" })]);
    assert!(recv_event(&mut a_rx).is_none(), "originator must not echo");
}

#[tokio::test]
async fn publish_without_originator_delivers_to_all() {
    let registry = TopicsManager::new();
    let (a, mut a_rx) = new_connection();
    let (b, mut b_rx) = new_connection();
    registry
        .add_subscriber("chat", Arc::clone(&a), None)
        .await
        .unwrap();
    registry
        .add_subscriber("chat", Arc::clone(&b), None)
        .await
        .unwrap();

    let broadcast = sample_broadcast("chat", None, &NODE_ID);
    registry.publish("chat", &broadcast).await.unwrap();

    assert!(recv_event(&mut a_rx).is_some());
    assert!(recv_event(&mut b_rx).is_some());
}

#[tokio::test]
async fn delivered_events_carry_the_receiving_subscription_id() {
    let registry = TopicsManager::new();
    let (a, mut a_rx) = new_connection();
    registry
        .add_subscriber("chat", Arc::clone(&a), Some(7))
        .await
        .unwrap();

    registry
        .publish("chat", &sample_broadcast("chat", None, &NODE_ID))
        .await
        .unwrap();

    let event = recv_event(&mut a_rx).unwrap();
    assert_eq!(event.subscription_id, 7);
    assert_eq!(event.publication_id, 42);
}

#[tokio::test]
async fn remote_broadcast_from_another_node_delivers_to_all() {
    let topic = Arc::new(Topic::new("chat", None));
    let (a, mut a_rx) = new_connection();
    let (b, mut b_rx) = new_connection();
    topic.subscribe(1, Arc::clone(&a)).await.unwrap();
    topic.subscribe(2, Arc::clone(&b)).await.unwrap();

    // Cross-node origin: no local echo suppression applies, even with an
    // origin connection id set.
    let broadcast = sample_broadcast("chat", Some(&a.id), "some-other-node");
    topic.handle_remote("chat", broadcast).unwrap();

    assert!(recv_event(&mut a_rx).is_some());
    assert!(recv_event(&mut b_rx).is_some());
}

#[tokio::test]
async fn own_node_broadcast_is_discarded() {
    let topic = Arc::new(Topic::new("chat", None));
    let (a, mut a_rx) = new_connection();
    topic.subscribe(1, Arc::clone(&a)).await.unwrap();

    // Already delivered locally at publish time; redelivering would double-deliver.
    let broadcast = sample_broadcast("chat", None, &NODE_ID);
    topic.handle_remote("chat", broadcast).unwrap();

    assert!(recv_event(&mut a_rx).is_none());
}

#[tokio::test]
async fn mismatched_channel_is_a_protocol_violation() {
    let topic = Arc::new(Topic::new("chat", None));
    let (a, mut a_rx) = new_connection();
    topic.subscribe(1, Arc::clone(&a)).await.unwrap();

    let broadcast = sample_broadcast("news", None, "some-other-node");
    let err = topic.handle_remote("chat", broadcast).unwrap_err();

    assert!(matches!(err, BrokerError::ProtocolViolation(_)));
    assert!(recv_event(&mut a_rx).is_none());
}

#[tokio::test]
async fn dropping_subscribers_closes_their_transports() {
    let topic = Arc::new(Topic::new("chat", None));
    let (a, mut a_rx) = new_connection();
    let (b, mut b_rx) = new_connection();
    topic.subscribe(1, Arc::clone(&a)).await.unwrap();
    topic.subscribe(2, Arc::clone(&b)).await.unwrap();
    a.add_subscription_channel(1, "chat");
    b.add_subscription_channel(2, "chat");

    topic.drop_subscribers();

    assert!(topic.subscriber_ids().is_empty());
    assert!(a.subscription_channels().is_empty());
    assert!(b.subscription_channels().is_empty());
    assert!(matches!(a_rx.try_recv(), Ok(WsMessage::Close(_))));
    assert!(matches!(b_rx.try_recv(), Ok(WsMessage::Close(_))));
}

#[tokio::test]
async fn unsubscribe_returns_the_connection_and_clears_the_index() {
    let registry = TopicsManager::new();
    let (a, _a_rx) = new_connection();
    let id = registry
        .add_subscriber("chat", Arc::clone(&a), None)
        .await
        .unwrap();
    assert_eq!(a.subscription_channels().get("chat"), Some(&id));

    let topic = registry.get("chat").unwrap();
    let removed = topic.unsubscribe(id).unwrap();
    assert_eq!(removed.id, a.id);
    assert!(a.subscription_channels().is_empty());
    assert!(topic.unsubscribe(id).is_none());
}

#[test]
fn remove_subscriber_is_a_noop_for_unknown_topic_or_id() {
    let registry = TopicsManager::new();
    registry.remove_subscriber("nope", 1);
    registry.remove_publisher("nope", 1);
}

#[test]
fn add_publisher_registers_in_memory_only() {
    let registry = TopicsManager::new();
    let (a, _a_rx) = new_connection();

    let id = registry.add_publisher("chat", Arc::clone(&a), None);

    assert_eq!(a.publishing_channels().get("chat"), Some(&id));
    assert_eq!(registry.get_connection("chat", id).unwrap().id, a.id);

    registry.remove_publisher("chat", id);
    assert!(a.publishing_channels().is_empty());
    assert!(registry.get_connection("chat", id).is_none());
}

#[tokio::test]
async fn remove_connection_only_touches_its_own_topics() {
    let registry = TopicsManager::new();
    let (a, _a_rx) = new_connection();
    let (b, _b_rx) = new_connection();
    let a_sub = registry
        .add_subscriber("chat", Arc::clone(&a), None)
        .await
        .unwrap();
    let a_pub = registry.add_publisher("news", Arc::clone(&a), None);
    let b_sub = registry
        .add_subscriber("chat", Arc::clone(&b), None)
        .await
        .unwrap();

    registry.remove_connection(&a);

    assert!(registry.get_connection("chat", a_sub).is_none());
    assert!(registry.get_connection("news", a_pub).is_none());
    assert_eq!(registry.get_connection("chat", b_sub).unwrap().id, b.id);
}

#[tokio::test]
async fn get_connection_checks_subscribers_before_publishers() {
    let registry = TopicsManager::new();
    let (a, _a_rx) = new_connection();
    let (b, _b_rx) = new_connection();
    registry
        .add_subscriber("chat", Arc::clone(&a), Some(5))
        .await
        .unwrap();
    registry.add_publisher("chat", Arc::clone(&b), Some(5));

    assert_eq!(registry.get_connection("chat", 5).unwrap().id, a.id);
    assert!(registry.get_connection("chat", 99).is_none());
    assert!(registry.get_connection("unknown", 5).is_none());
}

#[tokio::test]
async fn connections_union_prefers_publishers_on_collision() {
    let topic = Arc::new(Topic::new("chat", None));
    let (a, _a_rx) = new_connection();
    let (b, _b_rx) = new_connection();
    topic.subscribe(5, Arc::clone(&a)).await.unwrap();
    topic.add_publisher(5, Arc::clone(&b));
    topic.add_publisher(6, Arc::clone(&b));

    let conns = topic.connections();
    assert_eq!(conns.len(), 2);
    assert_eq!(conns[&5].id, b.id);
    assert_eq!(conns[&6].id, b.id);
}

#[tokio::test]
async fn snapshot_reflects_current_registrations() {
    let registry = TopicsManager::new();
    let (a, _a_rx) = new_connection();
    let (b, _b_rx) = new_connection();
    let a_sub = registry
        .add_subscriber("chat", Arc::clone(&a), None)
        .await
        .unwrap();
    let b_pub = registry.add_publisher("chat", Arc::clone(&b), None);
    registry.add_publisher("news", Arc::clone(&b), None);

    let snapshot = registry.snapshot();

    assert_eq!(snapshot.len(), 2);
    let chat = &snapshot["chat"];
    assert_eq!(chat.name, "chat");
    assert_eq!(chat.subscribers[&a_sub].id, a.id);
    assert_eq!(chat.publishers[&b_pub].id, b.id);
    assert!(serde_json::to_string(&snapshot).is_ok());

    registry.remove_subscriber("chat", a_sub);
    assert!(registry.snapshot()["chat"].subscribers.is_empty());
}

#[tokio::test]
async fn received_frames_reach_local_subscribers() {
    let topic = Arc::new(Topic::new("chat", None));
    let (a, mut a_rx) = new_connection();
    topic.subscribe(1, Arc::clone(&a)).await.unwrap();

    let payload = sample_broadcast("chat", None, "some-other-node")
        .json()
        .unwrap();
    bridge::handle_frame(&topic, "chat", &payload).unwrap();

    let event = recv_event(&mut a_rx).unwrap();
    assert_eq!(event.subscription_id, 1);
}

#[tokio::test]
async fn undecodable_frames_are_protocol_violations() {
    let topic = Arc::new(Topic::new("chat", None));
    let (a, mut a_rx) = new_connection();
    topic.subscribe(1, Arc::clone(&a)).await.unwrap();

    let err = bridge::handle_frame(&topic, "chat", "not json").unwrap_err();

    assert!(matches!(err, BrokerError::ProtocolViolation(_)));
    assert!(recv_event(&mut a_rx).is_none());
}

#[tokio::test]
async fn failed_subscribe_leaves_no_local_registration() {
    let settings = unreachable_bridge();
    let topic = Arc::new(Topic::new("chat", Some(&settings)));
    let (a, _a_rx) = new_connection();

    let err = topic.subscribe(1, Arc::clone(&a)).await.unwrap_err();

    assert!(matches!(err, BrokerError::BrokerUnavailable(_)));
    assert!(topic.subscriber_ids().is_empty());
    assert_eq!(topic.bridge().unwrap().state().await, BridgeState::Disconnected);
}

#[tokio::test]
async fn established_channel_is_shared_by_concurrent_subscribers() {
    let settings = unreachable_bridge();
    let topic = Arc::new(Topic::new("chat", Some(&settings)));
    let bridge = topic.bridge().unwrap();
    // With the channel already established, a second connect attempt would
    // hit the unreachable address and fail. Every subscribe succeeding
    // below shows the existing channel is reused.
    bridge.force_state(BridgeState::Subscribed).await;
    let (a, _a_rx) = new_connection();
    let (b, _b_rx) = new_connection();
    let (c, _c_rx) = new_connection();

    let (ra, rb, rc) = tokio::join!(
        topic.subscribe(1, Arc::clone(&a)),
        topic.subscribe(2, Arc::clone(&b)),
        topic.subscribe(3, Arc::clone(&c)),
    );

    ra.unwrap();
    rb.unwrap();
    rc.unwrap();
    assert_eq!(topic.subscriber_ids().len(), 3);
    assert_eq!(bridge.state().await, BridgeState::Subscribed);
}

#[tokio::test]
async fn publish_delivers_locally_before_the_bridge_fails() {
    let settings = unreachable_bridge();
    let topic = Arc::new(Topic::new("chat", Some(&settings)));
    topic
        .bridge()
        .unwrap()
        .force_state(BridgeState::Subscribed)
        .await;
    let (a, _a_rx) = new_connection();
    let (b, mut b_rx) = new_connection();
    topic.subscribe(2, Arc::clone(&b)).await.unwrap();

    let broadcast = sample_broadcast("chat", Some(&a.id), &NODE_ID);
    let err = topic.publish(&broadcast).await.unwrap_err();

    assert!(matches!(err, BrokerError::BrokerUnavailable(_)));
    // Local subscribers were served before the cross-node attempt.
    assert!(recv_event(&mut b_rx).is_some());
}

#[tokio::test]
async fn topics_survive_losing_all_members() {
    let registry = TopicsManager::new();
    let (a, _a_rx) = new_connection();
    let id = registry
        .add_subscriber("chat", Arc::clone(&a), None)
        .await
        .unwrap();
    registry.remove_subscriber("chat", id);

    // Lifetime is the process lifetime; emptiness does not remove a topic.
    assert!(registry.get("chat").is_some());
}
