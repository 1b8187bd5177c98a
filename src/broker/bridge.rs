//! Bridge between a topic and the external Redis pub/sub datastore.
//!
//! Each bridged topic owns one outbound publish connection (lazily created,
//! shared by every publish on the topic) and at most one inbound
//! subscribe-and-receive task. The receive side is a dedicated tokio task
//! that owns the `PubSub` connection and loops until the transport fails;
//! recovery after a failure is lazy, triggered by the next local subscribe.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use redis::aio::{MultiplexedConnection, PubSub};
use redis::{AsyncCommands, Client, ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::broker::topic::Topic;
use crate::config::BridgeSettings;
use crate::transport::message::BroadcastMessage;
use crate::utils::BrokerError;

/// Upper bound on one receive attempt. Elapsing is not an error; the loop
/// simply re-arms.
pub const PUBSUB_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Disconnected,
    Connecting,
    Subscribed,
}

pub struct Bridge {
    info: ConnectionInfo,
    publish_conn: Mutex<Option<MultiplexedConnection>>,
    state: Mutex<BridgeState>,
}

impl Bridge {
    pub fn new(settings: &BridgeSettings) -> Self {
        let info = ConnectionInfo {
            addr: ConnectionAddr::Tcp(settings.host.clone(), settings.port),
            redis: RedisConnectionInfo {
                db: settings.db.unwrap_or(0),
                username: None,
                password: settings.password.clone(),
                ..Default::default()
            },
        };
        Self {
            info,
            publish_conn: Mutex::new(None),
            state: Mutex::new(BridgeState::Disconnected),
        }
    }

    fn client(&self) -> Result<Client, BrokerError> {
        Ok(Client::open(self.info.clone())?)
    }

    pub async fn state(&self) -> BridgeState {
        *self.state.lock().await
    }

    #[cfg(test)]
    pub(crate) async fn force_state(&self, state: BridgeState) {
        *self.state.lock().await = state;
    }

    /// Forward an encoded broadcast envelope to the external broker.
    /// Returns the broker's acknowledgment (number of remote receivers).
    /// On failure the cached connection is discarded so the next publish
    /// reconnects from scratch.
    pub async fn publish(&self, channel: &str, payload: String) -> Result<i64, BrokerError> {
        let mut guard = self.publish_conn.lock().await;
        let conn = match &mut *guard {
            Some(conn) => conn,
            none => none.insert(
                self.client()?
                    .get_multiplexed_async_connection()
                    .await?,
            ),
        };
        match conn.publish::<_, _, i64>(channel, payload).await {
            Ok(receivers) => Ok(receivers),
            Err(e) => {
                guard.take();
                Err(e.into())
            }
        }
    }

    /// Establish the topic's subscribe channel and arm its receive loop.
    ///
    /// Callers serialize on the bridge state lock, so concurrent subscribes
    /// for a brand-new topic produce exactly one underlying `SUBSCRIBE`.
    /// On connect or subscribe failure no local state changes.
    pub(crate) async fn establish(&self, topic: &Arc<Topic>) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        if *state != BridgeState::Disconnected {
            return Ok(());
        }
        *state = BridgeState::Connecting;
        let mut pubsub = match self.connect_and_subscribe(&topic.name).await {
            Ok(pubsub) => pubsub,
            Err(e) => {
                *state = BridgeState::Disconnected;
                return Err(e);
            }
        };
        *state = BridgeState::Subscribed;
        let topic = Arc::clone(topic);
        tokio::spawn(async move {
            receive_loop(&topic, &mut pubsub).await;
            if let Some(bridge) = topic.bridge() {
                *bridge.state.lock().await = BridgeState::Disconnected;
            }
            topic.drop_subscribers();
        });
        Ok(())
    }

    async fn connect_and_subscribe(&self, channel: &str) -> Result<PubSub, BrokerError> {
        let mut pubsub = self.client()?.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        Ok(pubsub)
    }
}

/// Single-flight receive loop: one outstanding receive per topic at any
/// time, messages processed strictly in receipt order. Returns when the
/// transport fails or a protocol invariant is breached; the caller then
/// transitions the bridge to `Disconnected` and drops local subscribers.
async fn receive_loop(topic: &Topic, pubsub: &mut PubSub) {
    let mut stream = pubsub.on_message();
    loop {
        let msg = match timeout(PUBSUB_TIMEOUT, stream.next()).await {
            // Timeout: no message within the window, re-arm.
            Err(_) => continue,
            // Stream ended: connection with the external broker was lost.
            Ok(None) => {
                warn!("bridge connection lost for topic '{}'", topic.name);
                return;
            }
            Ok(Some(msg)) => msg,
        };
        let channel = msg.get_channel_name().to_string();
        let payload: String = match msg.get_payload() {
            Ok(payload) => payload,
            Err(e) => {
                error!("unreadable frame on '{channel}': {e}");
                return;
            }
        };
        debug!("broadcast received on '{channel}'");
        if let Err(e) = handle_frame(topic, &channel, &payload) {
            error!("aborting receive loop for '{}': {e}", topic.name);
            return;
        }
    }
}

/// Process one frame from the topic's subscribe channel: decode the
/// cross-node envelope and hand it to the topic. Any error is a protocol
/// consistency breach that aborts the receive loop.
pub(crate) fn handle_frame(topic: &Topic, channel: &str, payload: &str) -> Result<(), BrokerError> {
    let broadcast = BroadcastMessage::from_text(payload).map_err(|e| {
        BrokerError::ProtocolViolation(format!("undecodable broadcast on '{channel}': {e}"))
    })?;
    topic.handle_remote(channel, broadcast)
}
