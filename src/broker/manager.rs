//! Registry of all topics a connection can publish and/or subscribe to.
//!
//! One `TopicsManager` instance is owned by the server context and shared by
//! every connection handler. Topics are created on first subscribe/publish
//! and never destroyed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::broker::topic::{Topic, TopicSnapshot};
use crate::client::Connection;
use crate::config::BridgeSettings;
use crate::transport::message::BroadcastMessage;
use crate::utils::{BrokerError, create_global_id};

#[derive(Default)]
pub struct TopicsManager {
    topics: Mutex<HashMap<String, Arc<Topic>>>,
    bridge_config: Option<BridgeSettings>,
}

impl TopicsManager {
    /// A registry whose topics operate purely in-memory.
    pub fn new() -> Self {
        Self::with_bridge(None)
    }

    /// A registry whose topics fan out through the external broker when
    /// `bridge_config` is present.
    pub fn with_bridge(bridge_config: Option<BridgeSettings>) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            bridge_config,
        }
    }

    fn find_or_create(&self, topic_name: &str) -> Arc<Topic> {
        Arc::clone(
            self.topics
                .lock()
                .unwrap()
                .entry(topic_name.to_string())
                .or_insert_with(|| Arc::new(Topic::new(topic_name, self.bridge_config.as_ref()))),
        )
    }

    pub fn get(&self, topic_name: &str) -> Option<Arc<Topic>> {
        self.topics.lock().unwrap().get(topic_name).cloned()
    }

    /// Add a connection as a topic's subscriber.
    ///
    /// May suspend on broker I/O when the topic is bridged. A bridge failure
    /// propagates to the caller; the topic itself stays created.
    pub async fn add_subscriber(
        &self,
        topic_name: &str,
        connection: Arc<Connection>,
        subscription_id: Option<u64>,
    ) -> Result<u64, BrokerError> {
        let topic = self.find_or_create(topic_name);
        let subscription_id = subscription_id.unwrap_or_else(create_global_id);
        topic
            .subscribe(subscription_id, Arc::clone(&connection))
            .await?;
        connection.add_subscription_channel(subscription_id, topic_name);
        Ok(subscription_id)
    }

    /// Remove a topic's subscriber. No-op when the topic or id is unknown.
    pub fn remove_subscriber(&self, topic_name: &str, subscription_id: u64) {
        if let Some(topic) = self.get(topic_name) {
            topic.unsubscribe(subscription_id);
        }
    }

    /// Add a connection as a topic's publisher. Purely in-memory, never
    /// suspends.
    pub fn add_publisher(
        &self,
        topic_name: &str,
        connection: Arc<Connection>,
        subscription_id: Option<u64>,
    ) -> u64 {
        let topic = self.find_or_create(topic_name);
        let subscription_id = subscription_id.unwrap_or_else(create_global_id);
        topic.add_publisher(subscription_id, Arc::clone(&connection));
        connection.add_publishing_channel(subscription_id, topic_name);
        subscription_id
    }

    /// Remove a topic's publisher. No-op when the topic or id is unknown.
    pub fn remove_publisher(&self, topic_name: &str, subscription_id: u64) {
        if let Some(topic) = self.get(topic_name) {
            topic.remove_publisher(subscription_id);
        }
    }

    /// Scrap all of a connection's registrations, in every topic it joined.
    /// Walks only the connection's own reverse index.
    pub fn remove_connection(&self, connection: &Connection) {
        for (topic_name, subscription_id) in connection.publishing_channels() {
            if let Some(topic) = self.get(&topic_name) {
                topic.remove_publisher(subscription_id);
            }
        }
        for (topic_name, subscription_id) in connection.subscription_channels() {
            if let Some(topic) = self.get(&topic_name) {
                topic.unsubscribe(subscription_id);
            }
        }
    }

    /// Look up the connection registered under a subscription id, checking
    /// subscribers before publishers. `None` when topic or id is unknown.
    pub fn get_connection(
        &self,
        topic_name: &str,
        subscription_id: u64,
    ) -> Option<Arc<Connection>> {
        self.get(topic_name)?.get_connection(subscription_id)
    }

    /// Publish a broadcast on a topic, creating the topic if needed.
    pub async fn publish(
        &self,
        topic_name: &str,
        broadcast: &BroadcastMessage,
    ) -> Result<Option<i64>, BrokerError> {
        self.find_or_create(topic_name).publish(broadcast).await
    }

    /// Serializable view of every topic's current state.
    pub fn snapshot(&self) -> HashMap<String, TopicSnapshot> {
        self.topics
            .lock()
            .unwrap()
            .iter()
            .map(|(name, topic)| (name.clone(), topic.snapshot()))
            .collect()
    }
}
