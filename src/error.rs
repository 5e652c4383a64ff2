//! # Error Types
//!
//! Error handling for the message registry, codecs, channels and dispatcher.
//!
//! ## Error Categories
//! - **Setup errors**: raised while registering codecs and message types
//!   (`UnsupportedFieldType`, `ImmutableField`, `RegistryFrozen`, duplicates).
//!   They propagate to the registering caller and should abort startup.
//! - **Programming errors at runtime**: `DirectionViolation`, `UnregisteredMessage`.
//! - **Connection errors**: `ProtocolVersionMismatch`, `UnknownMessageType`,
//!   `DecodeError`, `OversizedFrame`. These come from untrusted input; they are
//!   fatal for the one connection that produced them and never for the process.
//!
//! ## Example Usage
//! ```rust
//! use packet_channel::error::{ProtocolError, Result};
//! use packet_channel::protocol::registry::MessageTypeRegistry;
//! use packet_channel::protocol::message::Side;
//! use tracing::error;
//!
//! fn setup() -> Result<()> {
//!     let mut registry = MessageTypeRegistry::new(Side::Server);
//!     let _channel = registry.freeze("demo")?;
//!     // A second freeze of the same namespace is a programming error.
//!     registry.freeze("demo").map(|_| ())
//! }
//!
//! match setup() {
//!     Err(ProtocolError::RegistryFrozen(ns)) => assert_eq!(ns, "demo"),
//!     other => error!(?other, "unexpected outcome"),
//! }
//! ```

use crate::protocol::message::{Direction, PeerId, Side};
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Lock errors
    pub const ERR_PEERS_WRITE_LOCK: &str = "Failed to acquire write lock on negotiated peers";
    pub const ERR_PEERS_READ_LOCK: &str = "Failed to acquire read lock on negotiated peers";
    pub const ERR_LAYOUT_LOCK: &str = "Failed to acquire layout cache lock";
    pub const ERR_OUTBOX_LOCK: &str = "Failed to acquire outbox lock";

    /// Decode errors
    pub const ERR_UNEXPECTED_EOF: &str = "Unexpected end of frame";
    pub const ERR_VARINT_TOO_LONG: &str = "VarInt is longer than 5 bytes";
    pub const ERR_INVALID_UTF8: &str = "String is not valid UTF-8";
    pub const ERR_INVALID_BOOL: &str = "Boolean byte must be 0 or 1";
    pub const ERR_TRAILING_BYTES: &str = "Frame has trailing bytes after the last field";
    pub const ERR_EMPTY_HANDSHAKE: &str = "Handshake frame is empty";
    pub const ERR_HANDSHAKE_TIMEOUT: &str = "Timed out waiting for the peer's hello";

    /// Binding errors
    pub const ERR_ALREADY_BOUND: &str = "Channel is already bound to a transport";
    pub const ERR_NOT_BOUND: &str = "Channel has no transport bound";

    /// Registration errors
    pub const ERR_NAMESPACE_TOO_LONG: &str = "Namespace is longer than a handshake can carry";
    pub const ERR_VERSION_TOO_LONG: &str = "Protocol version is longer than a handshake can carry";

    /// Connection errors
    pub const ERR_UNKNOWN_PEER: &str = "No outbound queue for peer";
}

// ProtocolError is the primary error type for all registry and channel operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Unsupported field type: {0}")]
    UnsupportedFieldType(String),

    #[error("Field '{field}' of {message} is read-only and cannot be auto-synced")]
    ImmutableField { message: String, field: String },

    #[error("Registry for namespace '{0}' is frozen")]
    RegistryFrozen(String),

    #[error("Message type {message} is already registered on '{namespace}'")]
    DuplicateMessageType { namespace: String, message: String },

    #[error("A codec for {0} is already registered")]
    DuplicateCodec(String),

    #[error("Message type {message} is not registered on '{namespace}'")]
    UnregisteredMessage { namespace: String, message: String },

    #[error("Protocol version mismatch on '{namespace}': local '{local}', remote '{remote}'")]
    ProtocolVersionMismatch {
        namespace: String,
        local: String,
        remote: String,
    },

    #[error("Handshake failed: {0}")]
    HandshakeError(String),

    #[error("Peer {0} has not completed the handshake")]
    HandshakeRequired(PeerId),

    #[error("Direction violation: {message} is declared {direction} and is not valid on the {side} side")]
    DirectionViolation {
        message: String,
        direction: Direction,
        side: Side,
    },

    #[error("Unknown message type {id} on '{namespace}'")]
    UnknownMessageType { namespace: String, id: u32 },

    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("Encode error: {0}")]
    EncodeError(String),

    #[error("Frame too large: {0} bytes")]
    OversizedFrame(usize),

    #[error("No channel registered for namespace '{0}'")]
    NoSuchChannel(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Execution context is closed")]
    ExecutorClosed,
}

impl ProtocolError {
    /// True for errors raised while building registries and descriptors.
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            ProtocolError::UnsupportedFieldType(_)
                | ProtocolError::ImmutableField { .. }
                | ProtocolError::RegistryFrozen(_)
                | ProtocolError::DuplicateMessageType { .. }
                | ProtocolError::DuplicateCodec(_)
        )
    }

    /// True for errors caused by a peer's bytes. The connection that produced
    /// them should be closed; other connections keep running.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::ProtocolVersionMismatch { .. }
                | ProtocolError::HandshakeError(_)
                | ProtocolError::HandshakeRequired(_)
                | ProtocolError::UnknownMessageType { .. }
                | ProtocolError::DecodeError(_)
                | ProtocolError::OversizedFrame(_)
                | ProtocolError::NoSuchChannel(_)
                | ProtocolError::DirectionViolation { .. }
                | ProtocolError::ConnectionClosed
        )
    }

    pub(crate) fn eof() -> Self {
        ProtocolError::DecodeError(constants::ERR_UNEXPECTED_EOF.to_string())
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
