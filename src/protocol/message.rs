//! Message traits and routing vocabulary.
//!
//! A message type states its name and permitted direction through `Message`
//! and picks one of two codec modes:
//! - `WireMessage`: the type writes and reads itself explicitly.
//! - `AutoMessage`: the type lists its fields and the registry derives the
//!   codec; decoding starts from `Default` and assigns every field in order.

use crate::core::field::{FieldInfo, FieldSpec};
use crate::core::wire::{FrameReader, FrameWriter};
use crate::error::Result;
use std::fmt;
use std::sync::Arc;

/// Which way a message type may travel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
    /// Either way. Prefer a single direction where the flow is known.
    Bidirectional,
}

impl Direction {
    /// Whether a frame flowing `flow` is permitted for this declaration.
    pub fn allows(self, flow: Direction) -> bool {
        self == Direction::Bidirectional || self == flow
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToServer => f.write_str("client-to-server"),
            Direction::ServerToClient => f.write_str("server-to-client"),
            Direction::Bidirectional => f.write_str("bidirectional"),
        }
    }
}

/// Role of the local endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Client,
    Server,
}

impl Side {
    /// Flow of frames this side sends
    pub fn outbound_flow(self) -> Direction {
        match self {
            Side::Client => Direction::ClientToServer,
            Side::Server => Direction::ServerToClient,
        }
    }

    /// Flow of frames this side receives
    pub fn inbound_flow(self) -> Direction {
        match self {
            Side::Client => Direction::ServerToClient,
            Side::Server => Direction::ClientToServer,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Client => f.write_str("client"),
            Side::Server => f.write_str("server"),
        }
    }
}

/// Identifier of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u64);

impl PeerId {
    /// The server, as seen from a client
    pub const SERVER: PeerId = PeerId(0);
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// Destination of an outbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerSelector {
    /// From a client to its server
    Server,
    /// From the server to one connected client
    Peer(PeerId),
    /// From the server to every connected client
    All,
}

impl PeerSelector {
    /// Flow implied by the destination
    pub fn flow(&self) -> Direction {
        match self {
            PeerSelector::Server => Direction::ClientToServer,
            PeerSelector::Peer(_) | PeerSelector::All => Direction::ServerToClient,
        }
    }
}

/// Metadata every registered message type carries
pub trait Message: Send + 'static {
    /// Name used in logs and errors
    const NAME: &'static str;

    /// Permitted direction
    const DIRECTION: Direction;
}

/// A message that encodes and decodes itself.
pub trait WireMessage: Message + Sized {
    fn encode(&self, writer: &mut FrameWriter<'_>) -> Result<()>;

    fn decode(reader: &mut FrameReader<'_>) -> Result<Self>;

    /// Optional field layout published in the descriptor. Read-only entries
    /// are allowed because the type constructs itself.
    fn field_layout() -> Vec<FieldInfo> {
        Vec::new()
    }
}

/// A message whose codec is derived from its field list.
///
/// Every field must be mutable: decoding creates `Default::default()` and
/// assigns the fields one by one.
pub trait AutoMessage: Message + Default + Sized {
    fn fields() -> Vec<FieldSpec<Self>>;
}

/// Context handed to a message handler on the execution context
#[derive(Debug, Clone)]
pub struct HandlerContext {
    namespace: Arc<str>,
    sender: PeerId,
    side: Side,
    message_id: u32,
}

impl HandlerContext {
    pub(crate) fn new(namespace: Arc<str>, sender: PeerId, side: Side, message_id: u32) -> Self {
        Self {
            namespace,
            sender,
            side,
            message_id,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Connection the message arrived on
    pub fn sender(&self) -> PeerId {
        self.sender
    }

    /// Side the handler runs on
    pub fn side(&self) -> Side {
        self.side
    }

    pub fn message_id(&self) -> u32 {
        self.message_id
    }
}
