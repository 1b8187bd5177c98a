//! Per-topic state: subscriber/publisher bookkeeping and local delivery.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, warn};

use crate::broker::bridge::Bridge;
use crate::client::{Connection, ConnectionSnapshot};
use crate::config::BridgeSettings;
use crate::transport::message::{BroadcastMessage, EventMessage, Message};
use crate::utils::{BrokerError, NODE_ID};

/// A named pub/sub channel with local subscriber/publisher sets and an
/// optional bridge to the external broker. Topics live for the process
/// lifetime; losing all subscribers does not remove one.
pub struct Topic {
    pub name: String,
    subscribers: Mutex<HashMap<u64, Arc<Connection>>>,
    publishers: Mutex<HashMap<u64, Arc<Connection>>>,
    bridge: Option<Bridge>,
}

/// Serializable view of a topic's current subscriber/publisher id sets.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicSnapshot {
    pub name: String,
    pub subscribers: HashMap<u64, ConnectionSnapshot>,
    pub publishers: HashMap<u64, ConnectionSnapshot>,
}

impl Topic {
    pub fn new(name: &str, bridge_settings: Option<&BridgeSettings>) -> Self {
        Self {
            name: name.to_string(),
            subscribers: Mutex::new(HashMap::new()),
            publishers: Mutex::new(HashMap::new()),
            bridge: bridge_settings.map(Bridge::new),
        }
    }

    pub(crate) fn bridge(&self) -> Option<&Bridge> {
        self.bridge.as_ref()
    }

    /// All connections on this topic, subscribers and publishers alike.
    /// Publisher entries win on id collision; collisions are not expected
    /// but must not panic.
    pub fn connections(&self) -> HashMap<u64, Arc<Connection>> {
        let mut conns = self.subscribers.lock().unwrap().clone();
        conns.extend(
            self.publishers
                .lock()
                .unwrap()
                .iter()
                .map(|(id, conn)| (*id, Arc::clone(conn))),
        );
        conns
    }

    /// Publish a broadcast to this topic.
    ///
    /// Local delivery happens first and synchronously, so co-located
    /// subscribers never wait on external broker latency. Only then, if a
    /// bridge is configured, the full envelope is forwarded to the external
    /// broker; its acknowledgment (remote receiver count) is returned.
    /// Without a bridge the call completes after local delivery.
    pub async fn publish(&self, broadcast: &BroadcastMessage) -> Result<Option<i64>, BrokerError> {
        self.deliver(&broadcast.event, broadcast.origin_connection_id.as_deref());
        let Some(bridge) = &self.bridge else {
            return Ok(None);
        };
        let payload = broadcast
            .json()
            .map_err(|e| BrokerError::ProtocolViolation(e.to_string()))?;
        let receivers = bridge.publish(&self.name, payload).await?;
        Ok(Some(receivers))
    }

    /// Register a subscriber. With a bridge configured, the first subscriber
    /// also establishes the topic's subscribe channel and arms the receive
    /// loop; if that fails, the subscriber is not registered and the error
    /// propagates to the caller.
    pub async fn subscribe(
        self: &Arc<Self>,
        subscription_id: u64,
        connection: Arc<Connection>,
    ) -> Result<(), BrokerError> {
        if let Some(bridge) = &self.bridge {
            bridge.establish(self).await?;
        }
        self.subscribers
            .lock()
            .unwrap()
            .insert(subscription_id, connection);
        Ok(())
    }

    /// Remove a subscriber, clearing its reverse index entry. Returns the
    /// removed connection, or `None` when the id was never registered.
    pub fn unsubscribe(&self, subscription_id: u64) -> Option<Arc<Connection>> {
        let conn = self.subscribers.lock().unwrap().remove(&subscription_id)?;
        conn.remove_subscription_channel(&self.name);
        Some(conn)
    }

    pub fn add_publisher(&self, subscription_id: u64, connection: Arc<Connection>) {
        self.publishers
            .lock()
            .unwrap()
            .insert(subscription_id, connection);
    }

    pub fn remove_publisher(&self, subscription_id: u64) -> Option<Arc<Connection>> {
        let conn = self.publishers.lock().unwrap().remove(&subscription_id)?;
        conn.remove_publishing_channel(&self.name);
        Some(conn)
    }

    /// Look up a connection by subscription id, subscribers first.
    pub fn get_connection(&self, subscription_id: u64) -> Option<Arc<Connection>> {
        if let Some(conn) = self.subscribers.lock().unwrap().get(&subscription_id) {
            return Some(Arc::clone(conn));
        }
        self.publishers.lock().unwrap().get(&subscription_id).cloned()
    }

    /// Deliver an event to every current subscriber, skipping the one whose
    /// connection id matches `exclude_connection` (local echo suppression).
    /// Each copy carries the receiving subscription's id. Never suspends.
    /// Returns the number of deliveries.
    pub fn deliver(&self, event: &EventMessage, exclude_connection: Option<&str>) -> usize {
        let subscribers = self.subscribers.lock().unwrap();
        let mut delivered = 0;
        for (subscription_id, conn) in subscribers.iter() {
            if exclude_connection.is_some_and(|origin| origin == conn.id) {
                continue;
            }
            let mut event = event.clone();
            event.subscription_id = *subscription_id;
            conn.send_message(&Message::Event(event));
            delivered += 1;
        }
        delivered
    }

    /// Handle a broadcast received from the external broker.
    ///
    /// The decoded envelope must belong to the channel it arrived on and to
    /// this topic; a mismatch means broker or encoding corruption, not a
    /// transient condition. An envelope originating from this node was
    /// already delivered locally at publish time and is discarded; anything
    /// else goes to every current subscriber, with no exclusions.
    pub fn handle_remote(&self, channel: &str, broadcast: BroadcastMessage) -> Result<(), BrokerError> {
        if broadcast.topic_name != channel || channel != self.name {
            return Err(BrokerError::ProtocolViolation(format!(
                "broadcast topic and pub/sub channel must match ('{}' on '{channel}', topic '{}')",
                broadcast.topic_name, self.name
            )));
        }
        if broadcast.origin_node_id == *NODE_ID {
            debug!("discarding own broadcast on '{}'", self.name);
            return Ok(());
        }
        self.deliver(&broadcast.event, None);
        Ok(())
    }

    /// Drop every subscriber of this topic, force-closing their transports.
    ///
    /// Called when the bridge connection is lost: closing the clients makes
    /// the failure visible instead of letting them silently miss messages.
    pub fn drop_subscribers(&self) {
        let drained: Vec<(u64, Arc<Connection>)> =
            self.subscribers.lock().unwrap().drain().collect();
        for (_, conn) in &drained {
            conn.remove_subscription_channel(&self.name);
            conn.close();
        }
        if !drained.is_empty() {
            warn!(
                "dropped {} subscribers of '{}' after bridge loss",
                drained.len(),
                self.name
            );
        }
    }

    pub fn snapshot(&self) -> TopicSnapshot {
        let subscribers = self
            .subscribers
            .lock()
            .unwrap()
            .iter()
            .map(|(id, conn)| (*id, conn.snapshot()))
            .collect();
        let publishers = self
            .publishers
            .lock()
            .unwrap()
            .iter()
            .map(|(id, conn)| (*id, conn.snapshot()))
            .collect();
        TopicSnapshot {
            name: self.name.clone(),
            subscribers,
            publishers,
        }
    }

    #[cfg(test)]
    pub(crate) fn subscriber_ids(&self) -> Vec<u64> {
        self.subscribers.lock().unwrap().keys().copied().collect()
    }
}
