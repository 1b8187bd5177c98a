//! WebSocket handler layer.
//!
//! Translates the WAMP wire protocol into topic-registry operations:
//! - accept TCP/WebSocket connections and run the authorize hook
//! - enforce the HELLO -> WELCOME handshake before anything else
//! - dispatch SUBSCRIBE/UNSUBSCRIBE/PUBLISH/CALL into the `TopicsManager`
//! - tear the connection's registrations down when the socket closes

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tracing::{info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::TopicsManager;
use crate::client::Connection;
use crate::transport::message::{
    AbortMessage, BroadcastMessage, ErrorMessage, EventMessage, Message, PublishedMessage,
    SubscribedMessage, UnsubscribedMessage, WelcomeMessage, CALL, PUBLISH, SUBSCRIBE, UNSUBSCRIBE,
};
use crate::transport::rpc;
use crate::utils::{BrokerError, NODE_ID, create_global_id};

/// Connection authorization hook, consulted once per freshly-accepted
/// socket. `Err` carries the reason sent back in the ABORT message.
pub trait Authorizer: Send + Sync {
    fn authorize(&self, peer: &SocketAddr) -> Result<(), String>;
}

/// Default authorizer: every connection may proceed.
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn authorize(&self, _peer: &SocketAddr) -> Result<(), String> {
        Ok(())
    }
}

/// ERROR uri reported to the client for a failed registry operation.
pub(crate) fn error_uri(err: &BrokerError) -> &'static str {
    match err {
        BrokerError::BrokerUnavailable(_) => "wampsub.error.broker_unavailable",
        BrokerError::ProtocolViolation(_) => "wampsub.error.protocol_violation",
    }
}

pub async fn start_websocket_server(
    addr: String,
    registry: Arc<TopicsManager>,
    authorizer: Arc<dyn Authorizer>,
) {
    let listener = TcpListener::bind(addr.clone()).await.expect("Can't bind");

    info!("WebSocket server listening on ws://{addr}");

    while let Ok((stream, peer)) = listener.accept().await {
        let registry = registry.clone();
        let authorizer = authorizer.clone();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    warn!("WebSocket handshake error: {e}");
                    return;
                }
            };
            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
            let connection = Arc::new(Connection::new(tx));
            let connection_id = connection.id.clone();

            {
                let connection_id = connection_id.clone();
                tokio::spawn(async move {
                    while let Some(msg) = rx.recv().await {
                        let closing = matches!(msg, WsMessage::Close(_));
                        if let Err(e) = ws_sender.send(msg).await {
                            warn!("failed to send message to {connection_id}: {e}");
                            break;
                        }
                        if closing {
                            break;
                        }
                    }
                    info!("send loop closed for {connection_id}");
                });
            }

            if let Err(reason) = authorizer.authorize(&peer) {
                connection.send_message(&Message::Abort(AbortMessage {
                    details: json!({ "message": reason.clone() }),
                    reason: "wampsub.error.unauthorized".to_string(),
                }));
                connection.close();
                warn!("connection from {peer} denied: {reason}");
                return;
            }

            let mut welcomed = false;
            while let Some(Ok(msg)) = ws_receiver.next().await {
                if !msg.is_text() {
                    continue;
                }
                let text = match msg.to_text() {
                    Ok(text) => text,
                    Err(_) => continue,
                };
                let parsed = match Message::from_text(text) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        warn!(
                            "invalid message from {connection_id}: {e} | {}",
                            &text.chars().take(100).collect::<String>()
                        );
                        continue;
                    }
                };
                if !handle_message(&registry, &connection, parsed, &mut welcomed).await {
                    break;
                }
            }

            registry.remove_connection(&connection);
            info!("connection {connection_id} removed");
        });
    }
}

/// Process one client message. Returns false when the session must end.
async fn handle_message(
    registry: &TopicsManager,
    connection: &Arc<Connection>,
    msg: Message,
    welcomed: &mut bool,
) -> bool {
    match msg {
        Message::Hello(_) if !*welcomed => {
            *welcomed = true;
            connection.send_message(&Message::Welcome(WelcomeMessage {
                session_id: create_global_id(),
                details: json!({ "roles": { "broker": {}, "dealer": {} } }),
            }));
            true
        }
        Message::Hello(_) => {
            warn!("duplicate HELLO from {}", connection.id);
            true
        }
        _ if !*welcomed => {
            connection.send_message(&Message::Abort(AbortMessage {
                details: json!({ "message": "HELLO required before any other message" }),
                reason: "wampsub.error.no_handshake".to_string(),
            }));
            connection.close();
            false
        }
        Message::Subscribe(m) => {
            match registry
                .add_subscriber(&m.topic_name, Arc::clone(connection), None)
                .await
            {
                Ok(subscription_id) => {
                    info!("{} subscribed to {}", connection.id, m.topic_name);
                    connection.send_message(&Message::Subscribed(SubscribedMessage {
                        request_id: m.request_id,
                        subscription_id,
                    }));
                }
                Err(e) => {
                    warn!("subscribe to {} failed: {e}", m.topic_name);
                    connection.send_message(&Message::Error(ErrorMessage {
                        request_code: SUBSCRIBE,
                        request_id: m.request_id,
                        details: json!({ "message": e.to_string() }),
                        uri: error_uri(&e).to_string(),
                    }));
                }
            }
            true
        }
        Message::Unsubscribe(m) => {
            let owned = connection
                .subscription_channels()
                .into_iter()
                .find(|(_, id)| *id == m.subscription_id);
            match owned {
                Some((topic_name, subscription_id)) => {
                    registry.remove_subscriber(&topic_name, subscription_id);
                    info!("{} unsubscribed from {topic_name}", connection.id);
                    connection.send_message(&Message::Unsubscribed(UnsubscribedMessage {
                        request_id: m.request_id,
                    }));
                }
                None => {
                    connection.send_message(&Message::Error(ErrorMessage {
                        request_code: UNSUBSCRIBE,
                        request_id: m.request_id,
                        details: json!({}),
                        uri: "wamp.error.no_such_subscription".to_string(),
                    }));
                }
            }
            true
        }
        Message::Publish(m) => {
            if !connection
                .publishing_channels()
                .contains_key(&m.topic_name)
            {
                registry.add_publisher(&m.topic_name, Arc::clone(connection), None);
            }
            let publication_id = create_global_id();
            let broadcast = BroadcastMessage {
                topic_name: m.topic_name.clone(),
                event: EventMessage {
                    // Rewritten per subscriber at delivery time.
                    subscription_id: 0,
                    publication_id,
                    details: json!({}),
                    args: m.args,
                    kwargs: m.kwargs,
                },
                origin_connection_id: Some(connection.id.clone()),
                origin_node_id: NODE_ID.clone(),
            };
            match registry.publish(&m.topic_name, &broadcast).await {
                Ok(_) => {
                    info!("{} published to {}", connection.id, m.topic_name);
                    let acknowledge = m
                        .options
                        .get("acknowledge")
                        .and_then(serde_json::Value::as_bool)
                        .unwrap_or(false);
                    if acknowledge {
                        connection.send_message(&Message::Published(PublishedMessage {
                            request_id: m.request_id,
                            publication_id,
                        }));
                    }
                }
                Err(e) => {
                    warn!("publish to {} failed: {e}", m.topic_name);
                    connection.send_message(&Message::Error(ErrorMessage {
                        request_code: PUBLISH,
                        request_id: m.request_id,
                        details: json!({ "message": e.to_string() }),
                        uri: error_uri(&e).to_string(),
                    }));
                }
            }
            true
        }
        Message::Call(m) => {
            match rpc::dispatch(&m) {
                Some(result) => connection.send_message(&Message::Result(result)),
                None => connection.send_message(&Message::Error(ErrorMessage {
                    request_code: CALL,
                    request_id: m.request_id,
                    details: json!({}),
                    uri: "wamp.error.no_such_procedure".to_string(),
                })),
            }
            true
        }
        other => {
            warn!(
                "unexpected message code {} from {}",
                other.code(),
                connection.id
            );
            true
        }
    }
}
