//! Error types for the gossip layer.

use thiserror::Error;

use crate::domain::{MessageKind, RejectReason, TxHash};

/// Violations of the wire protocol. Always fatal to the connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("unknown message type: {0}")]
    UnknownMessageType(u8),

    #[error("invalid length for {kind:?}: advertised {advertised} bytes (max: {max})")]
    InvalidMessageLength {
        kind: MessageKind,
        advertised: u16,
        max: u16,
    },

    #[error("initial packet is {0:?}, expected a handshake")]
    UnexpectedFirstMessage(MessageKind),

    #[error("malformed {kind:?} payload: {reason}")]
    MalformedPayload {
        kind: MessageKind,
        reason: &'static str,
    },
}

/// Errors surfaced by a neighbor's read/write entry points.
///
/// Every variant means the owner should close the connection.
#[derive(Debug, Error)]
pub enum NeighborError {
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("handshake rejected: {0:?}")]
    HandshakeRejected(RejectReason),

    #[error("connection closed by peer")]
    ConnectionClosed,
}

/// Errors from the external tangle store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("transaction not found: {0}")]
    NotFound(TxHash),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Umbrella error for the gossip services.
#[derive(Debug, Error)]
pub enum GossipError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("neighbor error: {0}")]
    Neighbor(#[from] NeighborError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("internal error: {0}")]
    Internal(String),
}
