//! # wampsub
//!
//! `wampsub` is a WAMP-style publish/subscribe broker over WebSockets.
//! Clients subscribe to and publish on named topics; events are delivered to
//! every local subscriber, and topics can optionally be bridged through an
//! external Redis pub/sub datastore so that several broker processes behave
//! as one logical broker.
//!
//! ## Core Modules
//!
//! - `broker`: the topic registry, per-topic subscriber/publisher
//!   bookkeeping, local delivery and the cross-node bridge.
//! - `client`: a connected WebSocket session and its topic reverse index.
//! - `transport`: WAMP message types, the wire codec and the WebSocket
//!   handler layer.
//! - `config`: configuration loading.
//! - `utils`: errors, id generation, logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod transport;
pub mod utils;
