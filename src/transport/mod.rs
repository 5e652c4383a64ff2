//! # Transport Layer
//!
//! Collaborator traits between channels and whatever moves bytes, plus
//! reference drivers built on tokio.
//!
//! ## Components
//! - **Transport**: outbound side, `send_bytes(channel, target, frame)`
//! - **Endpoint**: inbound side, implemented by `Channel` and `NetworkManager`
//! - **Outbox**: per-peer outbound queues implementing `Transport`
//! - **Stream**: drives one connection over any `AsyncRead + AsyncWrite`
//! - **Local**: in-process duplex links and Unix domain sockets
//!
//! ## Connection lifecycle
//! ```text
//! send Hello ─► receive Hello ─► accept_hello ─► loop { outbound | inbound }
//!                                                   │
//!                                       rejected frame or EOF ─► disconnect
//! ```

pub mod local;
pub mod stream;

use crate::core::frame::Envelope;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::handshake::Hello;
use crate::protocol::message::{PeerId, PeerSelector};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::debug;

/// Outbound byte sink
pub trait Transport: Send + Sync {
    /// Queue `frame` of `channel` for `target`. Must not block.
    fn send_bytes(&self, channel: &str, target: &PeerSelector, frame: Bytes) -> Result<()>;
}

/// Receiver of connection events
pub trait Endpoint: Send + Sync {
    /// Handshake frame to send on connect
    fn hello(&self) -> Hello;

    /// Check the peer's handshake. An error closes the connection.
    fn accept_hello(&self, peer: PeerId, hello: &Hello) -> Result<()>;

    /// Handle one enveloped frame. An error closes the connection.
    fn on_bytes_received(&self, peer: PeerId, envelope: Bytes) -> Result<()>;

    /// Forget everything about `peer`
    fn disconnect(&self, peer: PeerId);
}

type PeerQueues = HashMap<PeerId, mpsc::UnboundedSender<Bytes>>;

/// Routes enveloped frames to per-peer outbound queues.
///
/// Each connection driver owns the receiving half of its peer's queue.
#[derive(Debug, Clone, Default)]
pub struct Outbox {
    peers: Arc<RwLock<PeerQueues>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the outbound queue of `peer`, replacing any previous one.
    pub fn register_peer(&self, peer: PeerId) -> Result<mpsc::UnboundedReceiver<Bytes>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers
            .write()
            .map_err(|_| ProtocolError::TransportError(constants::ERR_OUTBOX_LOCK.to_string()))?
            .insert(peer, tx);
        debug!(%peer, "Registered outbound queue");
        Ok(rx)
    }

    pub fn unregister(&self, peer: PeerId) {
        if let Ok(mut peers) = self.peers.write() {
            if peers.remove(&peer).is_some() {
                debug!(%peer, "Removed outbound queue");
            }
        }
    }

    /// Peers with an outbound queue, sorted
    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self
            .peers
            .read()
            .map(|p| p.keys().copied().collect())
            .unwrap_or_default();
        peers.sort();
        peers
    }

    fn deliver(queues: &PeerQueues, peer: PeerId, envelope: Bytes) -> Result<()> {
        let tx = queues.get(&peer).ok_or_else(|| {
            ProtocolError::TransportError(format!("{}: {peer}", constants::ERR_UNKNOWN_PEER))
        })?;
        tx.send(envelope).map_err(|_| ProtocolError::ConnectionClosed)
    }
}

impl Transport for Outbox {
    fn send_bytes(&self, channel: &str, target: &PeerSelector, frame: Bytes) -> Result<()> {
        let envelope = Envelope::new(channel, frame).to_bytes()?;
        let queues = self
            .peers
            .read()
            .map_err(|_| ProtocolError::TransportError(constants::ERR_OUTBOX_LOCK.to_string()))?;

        match target {
            PeerSelector::Server => Self::deliver(&queues, PeerId::SERVER, envelope),
            PeerSelector::Peer(peer) => Self::deliver(&queues, *peer, envelope),
            PeerSelector::All => {
                for (peer, tx) in queues.iter() {
                    if tx.send(envelope.clone()).is_err() {
                        debug!(%peer, "Skipping closed outbound queue");
                    }
                }
                Ok(())
            }
        }
    }
}
