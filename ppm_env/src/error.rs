//! Error types for the message-bus abstraction.

use thiserror::Error;

/// Errors that can occur at the bus seam.
#[derive(Debug, Error, Clone)]
pub enum BusError {
    /// The broker is unreachable or a metadata fetch failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The topic is not known to the broker.
    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    /// The partition is not known to the broker.
    #[error("unknown partition: {0}")]
    UnknownPartition(String),

    /// The client could not be created.
    #[error("client creation failed: {0}")]
    Create(String),

    /// The subscription could not be established.
    #[error("subscribe failed: {0}")]
    Subscribe(String),

    /// A produce call failed.
    #[error("produce failed: {0}")]
    Produce(String),

    /// The bus was shut down underneath the client.
    #[error("bus closed")]
    Closed,
}

impl BusError {
    /// Creates a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Creates a produce error.
    pub fn produce(msg: impl Into<String>) -> Self {
        Self::Produce(msg.into())
    }
}
