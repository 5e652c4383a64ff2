//! Versioned channel.
//!
//! A `Channel` is what freezing a namespace produces: the immutable id table,
//! the shared codec registry, the local side and the protocol version. It
//! negotiates versions with peers, encodes and sends outbound messages after
//! checking their direction, and feeds inbound frames to its dispatcher.
//!
//! ## Outbound frame
//! ```text
//! [VarInt message id] [field 1] ... [field n]
//! ```

use crate::core::codec::CodecRegistry;
use crate::core::frame::Envelope;
use crate::core::wire::{self, FrameWriter};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::descriptor::{DescriptorTable, MessageDescriptor};
use crate::protocol::dispatcher::{Dispatched, Dispatcher, Rejected, Stage};
use crate::protocol::handshake::Hello;
use crate::protocol::message::{Message, PeerId, PeerSelector, Side};
use crate::service::executor::ExecutionContext;
use crate::transport::{Endpoint, Transport};
use crate::utils::metrics::Metrics;
use bytes::{Bytes, BytesMut};
use once_cell::sync::OnceCell;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, instrument, warn};

struct Binding {
    transport: Arc<dyn Transport>,
    executor: Arc<dyn ExecutionContext>,
}

/// A frozen, versioned message pipe for one namespace
pub struct Channel {
    namespace: Arc<str>,
    version: String,
    side: Side,
    table: Arc<DescriptorTable>,
    codecs: Arc<CodecRegistry>,
    dispatcher: Dispatcher,
    peers: RwLock<HashSet<PeerId>>,
    binding: OnceCell<Binding>,
    metrics: Arc<Metrics>,
    max_frame_size: usize,
}

impl Channel {
    pub(crate) fn new(
        table: DescriptorTable,
        version: String,
        side: Side,
        codecs: Arc<CodecRegistry>,
        max_frame_size: usize,
    ) -> Self {
        let namespace: Arc<str> = Arc::from(table.namespace());
        let table = Arc::new(table);
        let metrics = Arc::new(Metrics::new());
        let dispatcher = Dispatcher::new(
            Arc::clone(&namespace),
            side,
            Arc::clone(&table),
            Arc::clone(&codecs),
            Arc::clone(&metrics),
        );
        Self {
            namespace,
            version,
            side,
            table,
            codecs,
            dispatcher,
            peers: RwLock::new(HashSet::new()),
            binding: OnceCell::new(),
            metrics,
            max_frame_size,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn descriptors(&self) -> &DescriptorTable {
        &self.table
    }

    pub fn codecs(&self) -> &CodecRegistry {
        &self.codecs
    }

    /// Wire id assigned to `M`, if registered on this channel
    pub fn id_of<M: Message>(&self) -> Option<u32> {
        self.table.id_of::<M>()
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Exact version comparison
    pub fn accepts(&self, peer_version: &str) -> bool {
        self.version == peer_version
    }

    /// Check a peer's version string.
    ///
    /// # Errors
    /// `ProtocolVersionMismatch` unless the strings are identical.
    pub fn negotiate(&self, peer_version: &str) -> Result<()> {
        self.metrics.handshake_attempt();
        if self.accepts(peer_version) {
            return Ok(());
        }
        self.metrics.handshake_failed();
        warn!(
            namespace = %self.namespace,
            local = %self.version,
            remote = peer_version,
            "Protocol version mismatch"
        );
        Err(ProtocolError::ProtocolVersionMismatch {
            namespace: self.namespace.to_string(),
            local: self.version.clone(),
            remote: peer_version.to_string(),
        })
    }

    fn absent_from_hello(&self) -> ProtocolError {
        self.metrics.handshake_attempt();
        self.metrics.handshake_failed();
        warn!(namespace = %self.namespace, "Peer does not serve this channel");
        ProtocolError::ProtocolVersionMismatch {
            namespace: self.namespace.to_string(),
            local: self.version.clone(),
            remote: String::from("<absent>"),
        }
    }

    /// Whether `peer` completed the handshake
    pub fn is_negotiated(&self, peer: PeerId) -> Result<bool> {
        let peers = self
            .peers
            .read()
            .map_err(|_| ProtocolError::HandshakeError(constants::ERR_PEERS_READ_LOCK.to_string()))?;
        Ok(peers.contains(&peer))
    }

    /// Attach the transport and execution context. Allowed once.
    pub fn bind(
        &self,
        transport: Arc<dyn Transport>,
        executor: Arc<dyn ExecutionContext>,
    ) -> Result<()> {
        self.binding
            .set(Binding {
                transport,
                executor,
            })
            .map_err(|_| ProtocolError::ConfigError(constants::ERR_ALREADY_BOUND.to_string()))?;
        debug!(namespace = %self.namespace, "Channel bound");
        Ok(())
    }

    pub fn is_bound(&self) -> bool {
        self.binding.get().is_some()
    }

    fn binding(&self) -> Result<&Binding> {
        self.binding
            .get()
            .ok_or_else(|| ProtocolError::TransportError(constants::ERR_NOT_BOUND.to_string()))
    }

    fn descriptor<M: Message>(&self) -> Result<&MessageDescriptor> {
        self.table
            .descriptor_of::<M>()
            .ok_or_else(|| ProtocolError::UnregisteredMessage {
                namespace: self.namespace.to_string(),
                message: M::NAME.to_string(),
            })
    }

    fn check_outbound(&self, target: &PeerSelector, descriptor: &MessageDescriptor) -> Result<()> {
        let flow = target.flow();
        if flow == self.side.outbound_flow() && descriptor.direction().allows(flow) {
            return Ok(());
        }
        self.metrics.direction_violation();
        Err(ProtocolError::DirectionViolation {
            message: descriptor.name().to_string(),
            direction: descriptor.direction(),
            side: self.side,
        })
    }

    /// Serialize `message` for `target` without sending it.
    ///
    /// # Errors
    /// `UnregisteredMessage`, `DirectionViolation`, codec errors, or
    /// `OversizedFrame` when the frame exceeds the configured maximum.
    pub fn encode_frame<M: Message>(&self, target: &PeerSelector, message: &M) -> Result<Bytes> {
        let descriptor = self.descriptor::<M>()?;
        self.check_outbound(target, descriptor)?;

        let mut buf = BytesMut::with_capacity(64);
        wire::put_varint(&mut buf, descriptor.id());
        {
            let mut writer = FrameWriter::new(&mut buf, &self.codecs);
            descriptor.encode(message, &mut writer)?;
        }

        if buf.len() > self.max_frame_size {
            return Err(ProtocolError::OversizedFrame(buf.len()));
        }
        Ok(buf.freeze())
    }

    /// Encode `message` and hand it to the bound transport.
    pub fn send<M: Message>(&self, target: PeerSelector, message: &M) -> Result<()> {
        let binding = self.binding()?;
        let frame = self.encode_frame(&target, message)?;
        let len = frame.len();
        binding
            .transport
            .send_bytes(&self.namespace, &target, frame)?;
        self.metrics.frame_sent(len as u64);
        debug!(
            namespace = %self.namespace,
            message = M::NAME,
            ?target,
            bytes = len,
            "Message sent"
        );
        Ok(())
    }

    /// Client side: send to the server
    pub fn send_to_server<M: Message>(&self, message: &M) -> Result<()> {
        self.send(PeerSelector::Server, message)
    }

    /// Server side: send to one client
    pub fn send_to_peer<M: Message>(&self, peer: PeerId, message: &M) -> Result<()> {
        self.send(PeerSelector::Peer(peer), message)
    }

    /// Server side: send to every connected client
    pub fn send_to_all<M: Message>(&self, message: &M) -> Result<()> {
        self.send(PeerSelector::All, message)
    }

    /// Dispatch one inbound frame using the bound execution context.
    pub fn receive(&self, peer: PeerId, frame: Bytes) -> std::result::Result<Dispatched, Rejected> {
        let binding = self.binding().map_err(|error| Rejected {
            stage: Stage::Received,
            error,
        })?;
        self.receive_with(peer, frame, binding.executor.as_ref())
    }

    /// Dispatch one inbound frame onto an explicit execution context.
    ///
    /// Frames from peers that have not completed the handshake are rejected
    /// with `HandshakeRequired`.
    pub fn receive_with(
        &self,
        peer: PeerId,
        frame: Bytes,
        executor: &dyn ExecutionContext,
    ) -> std::result::Result<Dispatched, Rejected> {
        match self.is_negotiated(peer) {
            Ok(true) => self.dispatcher.dispatch(peer, frame, executor),
            Ok(false) => Err(Rejected {
                stage: Stage::Received,
                error: ProtocolError::HandshakeRequired(peer),
            }),
            Err(error) => Err(Rejected {
                stage: Stage::Received,
                error,
            }),
        }
    }
}

impl Endpoint for Channel {
    fn hello(&self) -> Hello {
        Hello::new().with_channel(&*self.namespace, self.version.as_str())
    }

    #[instrument(skip(self, hello), fields(namespace = %self.namespace))]
    fn accept_hello(&self, peer: PeerId, hello: &Hello) -> Result<()> {
        match hello.version_of(&self.namespace) {
            Some(remote) => self.negotiate(remote)?,
            None => return Err(self.absent_from_hello()),
        }
        self.peers
            .write()
            .map_err(|_| ProtocolError::HandshakeError(constants::ERR_PEERS_WRITE_LOCK.to_string()))?
            .insert(peer);
        info!(%peer, version = %self.version, "Peer negotiated");
        Ok(())
    }

    fn on_bytes_received(&self, peer: PeerId, envelope: Bytes) -> Result<()> {
        let envelope = Envelope::from_bytes(envelope)?;
        if envelope.channel != *self.namespace {
            return Err(ProtocolError::NoSuchChannel(envelope.channel));
        }
        self.receive(peer, envelope.payload)?;
        Ok(())
    }

    fn disconnect(&self, peer: PeerId) {
        match self.peers.write() {
            Ok(mut peers) => {
                if peers.remove(&peer) {
                    debug!(namespace = %self.namespace, %peer, "Peer disconnected");
                }
            }
            Err(_) => warn!(namespace = %self.namespace, "{}", constants::ERR_PEERS_WRITE_LOCK),
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("namespace", &self.namespace)
            .field("version", &self.version)
            .field("side", &self.side)
            .field("messages", &self.table.len())
            .field("bound", &self.is_bound())
            .finish()
    }
}
