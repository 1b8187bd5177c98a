//! Connected-client representation.
//!
//! A `Connection` wraps one WebSocket session: its unique identifier, the
//! sending side of the per-client channel the broker pushes messages into,
//! and a reverse index of every topic the session participates in.

pub mod connection;

pub use connection::{Connection, ConnectionSnapshot};
