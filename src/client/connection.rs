use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

use crate::transport::message::Message;

/// Reverse index of the topics a connection participates in, per role.
/// Maps topic name to the subscription id registered under it. Used by
/// `TopicsManager::remove_connection` so teardown only touches the topics
/// this connection actually joined.
#[derive(Debug, Default)]
pub struct TopicIndex {
    pub subscriber: HashMap<String, u64>,
    pub publisher: HashMap<String, u64>,
}

#[derive(Debug)]
pub struct Connection {
    pub id: String,
    sender: UnboundedSender<WsMessage>,
    topics: Mutex<TopicIndex>,
}

/// Serializable identity of a connection, as exposed by snapshots.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionSnapshot {
    pub id: String,
    pub subscriber_topics: Vec<String>,
    pub publisher_topics: Vec<String>,
}

impl Connection {
    /// Create a new connection around a sender channel. The `id` is a UUID
    /// used to identify the session across broker operations; it also keys
    /// local echo suppression.
    pub fn new(sender: UnboundedSender<WsMessage>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender,
            topics: Mutex::new(TopicIndex::default()),
        }
    }

    pub fn add_subscription_channel(&self, subscription_id: u64, topic_name: &str) {
        self.topics
            .lock()
            .unwrap()
            .subscriber
            .insert(topic_name.to_string(), subscription_id);
    }

    pub fn remove_subscription_channel(&self, topic_name: &str) {
        self.topics.lock().unwrap().subscriber.remove(topic_name);
    }

    pub fn add_publishing_channel(&self, subscription_id: u64, topic_name: &str) {
        self.topics
            .lock()
            .unwrap()
            .publisher
            .insert(topic_name.to_string(), subscription_id);
    }

    pub fn remove_publishing_channel(&self, topic_name: &str) {
        self.topics.lock().unwrap().publisher.remove(topic_name);
    }

    /// Topics this connection subscribes to, as `name -> subscription id`.
    pub fn subscription_channels(&self) -> HashMap<String, u64> {
        self.topics.lock().unwrap().subscriber.clone()
    }

    /// Topics this connection publishes on, as `name -> subscription id`.
    pub fn publishing_channels(&self) -> HashMap<String, u64> {
        self.topics.lock().unwrap().publisher.clone()
    }

    /// Push a WAMP message onto the session's outgoing channel.
    pub fn send_message(&self, msg: &Message) {
        if let Err(e) = self.sender.send(WsMessage::Text(msg.json().into())) {
            warn!("failed to queue message for {}: {e}", self.id);
        }
    }

    /// Force-close the transport. Queues a Close frame; the send loop
    /// forwards it and then tears the socket down.
    pub fn close(&self) {
        let _ = self.sender.send(WsMessage::Close(None));
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        let topics = self.topics.lock().unwrap();
        let mut subscriber_topics: Vec<String> = topics.subscriber.keys().cloned().collect();
        let mut publisher_topics: Vec<String> = topics.publisher.keys().cloned().collect();
        subscriber_topics.sort();
        publisher_topics.sort();
        ConnectionSnapshot {
            id: self.id.clone(),
            subscriber_topics,
            publisher_topics,
        }
    }
}
