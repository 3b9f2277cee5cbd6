//! Error types, one enum per layer.
//!
//! Programming errors (bad transition, sending with no transport bound,
//! counter overflow) are returned to the caller. Wire-level failures are
//! surfaced as session `Error` events instead; silent drops produce neither.

use crate::state::SessionState;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("invalid base64 encoding")]
    InvalidEncoding,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("malformed message")]
    MalformedMessage,

    #[error("unsupported protocol version {0}")]
    UnsupportedProtocolVersion(u64),

    #[error("unknown message type {0:?}")]
    UnknownMessageType(String),

    #[error("missing field {0:?}")]
    MissingField(&'static str),

    #[error("frame too short")]
    FrameTooShort,

    #[error("frame exceeds {} bytes", crate::config::MAX_MESSAGE_SIZE)]
    FrameTooLarge,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("invalid address {0:?}")]
    InvalidAddress(String),

    #[error("connection timed out")]
    ConnectionTimedOut,

    #[error("transport not bound")]
    NotBound,

    #[error("peer already connected")]
    PeerAlreadyConnected,

    #[error("message too large: {size} bytes (limit {limit})")]
    MessageTooLarge { size: usize, limit: usize },

    #[error("transport closed")]
    Closed,

    #[error("adapter error: {0}")]
    Adapter(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("invalid transition {from} -> {to}")]
    InvalidTransition { from: SessionState, to: SessionState },

    #[error("session expired")]
    SessionExpired,

    #[error("bootstrap code expired")]
    BootstrapExpired,

    #[error("sequence number overflow")]
    SequenceOverflow,

    #[error("session is closed")]
    SessionClosed,

    #[error("session is not active")]
    NotActive,

    #[error("no active session")]
    NoActiveSession,

    #[error("operation does not match the session role")]
    WrongRole,

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
