//! Error types shared by the broker core.

use thiserror::Error;

/// Failures surfaced by topic/bridge operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Connect, subscribe or publish against the external broker failed.
    /// Raised synchronously to the caller of `subscribe`/`publish`; the
    /// handler layer decides how to surface it to the client.
    #[error("external broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// A cross-node envelope arrived that contradicts the channel it was
    /// received on, or the broker returned an unexpected shape. Not a
    /// transient condition: the receive loop aborts instead of recovering.
    #[error("protocol consistency violation: {0}")]
    ProtocolViolation(String),
}

impl From<redis::RedisError> for BrokerError {
    fn from(err: redis::RedisError) -> Self {
        BrokerError::BrokerUnavailable(err.to_string())
    }
}
