//! The distributed topic engine.
//!
//! `TopicsManager` is the registry of all topics; each `Topic` keeps its own
//! subscriber/publisher bookkeeping and performs local delivery. When a
//! bridge is configured, a topic additionally fans publications out through
//! an external Redis pub/sub datastore so several broker processes behave as
//! one logical broker.

pub mod bridge;
pub mod manager;
pub mod topic;

pub use manager::TopicsManager;
pub use topic::{Topic, TopicSnapshot};

#[cfg(test)]
mod tests;
