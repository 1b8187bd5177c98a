//! Shared utilities: error types, id generation and logging setup.

pub mod error;
pub mod identifier;
pub mod logging;

pub use error::BrokerError;
pub use identifier::{NODE_ID, create_global_id};
