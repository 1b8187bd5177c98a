//! WebSocket transport: WAMP message types, the connection handler and the
//! CALL dispatch table.

pub mod message;
pub mod rpc;
pub mod websocket;

pub use message::{BroadcastMessage, Message};
pub use websocket::{AllowAll, Authorizer, start_websocket_server};
