//! # packet-channel
//!
//! Typed, versioned message channels over any byte transport.
//!
//! Each namespace gets a `Channel` with a protocol version and a dense table
//! of message types. A message is encoded field by field through a codec
//! registry, prefixed with its VarInt id, and checked against its declared
//! direction before it leaves. Inbound frames are decoded on the I/O thread
//! and their handlers run on a single execution context.
//!
//! ## Layers
//! - [`core`]: field model, codec registry, wire primitives, framing
//! - [`protocol`]: messages, registration, channels, dispatch, handshake
//! - [`service`]: execution contexts and the `NetworkManager`
//! - [`transport`]: `Transport` / `Endpoint` seams and tokio drivers
//! - [`utils`]: logging setup and metrics
//!
//! ## Quick start
//! ```
//! use packet_channel::prelude::*;
//! use packet_channel::fields;
//!
//! #[derive(Debug, Default, PartialEq)]
//! struct Chat { text: String }
//!
//! impl Message for Chat {
//!     const NAME: &'static str = "Chat";
//!     const DIRECTION: Direction = Direction::ClientToServer;
//! }
//!
//! impl AutoMessage for Chat {
//!     fn fields() -> Vec<FieldSpec<Self>> {
//!         fields!(Chat { text: String })
//!     }
//! }
//!
//! let mut registry = MessageTypeRegistry::new(Side::Client);
//! registry.register_auto::<Chat, _>("chat", |_msg, _ctx| {}).unwrap();
//! let channel = registry.freeze("chat").unwrap();
//!
//! let frame = channel
//!     .encode_frame(&PeerSelector::Server, &Chat { text: "hi".into() })
//!     .unwrap();
//! assert_eq!(&frame[..], &[0x00, 0x02, b'h', b'i']);
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use error::{ProtocolError, Result};

/// Common imports for defining and registering messages
pub mod prelude {
    pub use crate::config::NetworkConfig;
    pub use crate::core::field::{FieldSpec, FieldType, FieldValue};
    pub use crate::core::wire::{FrameReader, FrameWriter};
    pub use crate::error::{ProtocolError, Result};
    pub use crate::protocol::channel::Channel;
    pub use crate::protocol::message::{
        AutoMessage, Direction, HandlerContext, Message, PeerId, PeerSelector, Side, WireMessage,
    };
    pub use crate::protocol::registry::MessageTypeRegistry;
    pub use crate::service::executor::{ExecutionContext, WorkQueue, WorkQueueRunner};
    pub use crate::service::network::NetworkManager;
    pub use crate::transport::{Endpoint, Outbox, Transport};
}
