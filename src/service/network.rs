//! Multi-namespace network manager.
//!
//! Collects registrations for any number of namespaces, freezes them all at
//! once, binds every resulting channel to one transport and one execution
//! context, and routes inbound envelopes to the channel they name.
//!
//! ```
//! use packet_channel::config::NetworkConfig;
//! use packet_channel::protocol::message::Side;
//! use packet_channel::service::executor::WorkQueue;
//! use packet_channel::service::network::NetworkManager;
//! use packet_channel::transport::Outbox;
//! use std::sync::Arc;
//!
//! let (queue, _runner) = WorkQueue::new();
//! let mut network = NetworkManager::new(
//!     Side::Client,
//!     &NetworkConfig::default(),
//!     Arc::new(Outbox::new()),
//!     Arc::new(queue),
//! );
//! network.open("examplemod", "1").unwrap();
//! network.register_channels().unwrap();
//! assert_eq!(network.channel("examplemod").unwrap().version(), "1");
//! ```

use crate::config::NetworkConfig;
use crate::core::codec::CodecRegistry;
use crate::core::frame::Envelope;
use crate::error::{ProtocolError, Result};
use crate::protocol::channel::Channel;
use crate::protocol::handshake::Hello;
use crate::protocol::message::{
    AutoMessage, HandlerContext, Message, PeerId, Side, WireMessage,
};
use crate::protocol::registry::MessageTypeRegistry;
use crate::service::executor::ExecutionContext;
use crate::transport::{Endpoint, Transport};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Front door for registering and using many channels
pub struct NetworkManager {
    side: Side,
    registry: MessageTypeRegistry,
    channels: BTreeMap<String, Arc<Channel>>,
    transport: Arc<dyn Transport>,
    executor: Arc<dyn ExecutionContext>,
}

impl NetworkManager {
    pub fn new(
        side: Side,
        config: &NetworkConfig,
        transport: Arc<dyn Transport>,
        executor: Arc<dyn ExecutionContext>,
    ) -> Self {
        Self {
            side,
            registry: MessageTypeRegistry::with_config(side, config),
            channels: BTreeMap::new(),
            transport,
            executor,
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    /// Extend the shared codec registry before `register_channels`.
    pub fn codecs_mut(&mut self) -> Result<&mut CodecRegistry> {
        self.registry.codecs_mut()
    }

    /// Set the protocol version of a namespace.
    pub fn open(&mut self, namespace: &str, version: impl Into<String>) -> Result<()> {
        self.registry.open(namespace, version)
    }

    /// Queue an explicitly encoded message type on `namespace`.
    pub fn add_to_register<M, F>(&mut self, namespace: &str, handler: F) -> Result<()>
    where
        M: WireMessage,
        F: Fn(M, &HandlerContext) + Send + Sync + 'static,
    {
        self.registry.register::<M, F>(namespace, handler)
    }

    /// Queue an auto-synced message type on `namespace`.
    pub fn add_auto<M, F>(&mut self, namespace: &str, handler: F) -> Result<()>
    where
        M: AutoMessage,
        F: Fn(M, &HandlerContext) + Send + Sync + 'static,
    {
        self.registry.register_auto::<M, F>(namespace, handler)
    }

    /// Freeze every queued namespace and bind the resulting channels.
    #[instrument(skip(self), fields(side = %self.side))]
    pub fn register_channels(&mut self) -> Result<()> {
        for channel in self.registry.freeze_all()? {
            channel.bind(Arc::clone(&self.transport), Arc::clone(&self.executor))?;
            self.channels
                .insert(channel.namespace().to_string(), Arc::new(channel));
        }
        info!(channels = self.channels.len(), "Channels registered");
        Ok(())
    }

    /// # Errors
    /// `NoSuchChannel` if the namespace was never registered.
    pub fn channel(&self, namespace: &str) -> Result<&Arc<Channel>> {
        self.channels
            .get(namespace)
            .ok_or_else(|| ProtocolError::NoSuchChannel(namespace.to_string()))
    }

    /// Registered channels in namespace order
    pub fn channels(&self) -> impl Iterator<Item = &Arc<Channel>> {
        self.channels.values()
    }

    pub fn send_to_server<M: Message>(&self, namespace: &str, message: &M) -> Result<()> {
        self.channel(namespace)?.send_to_server(message)
    }

    pub fn send_to_peer<M: Message>(&self, namespace: &str, peer: PeerId, message: &M) -> Result<()> {
        self.channel(namespace)?.send_to_peer(peer, message)
    }

    pub fn send_to_all<M: Message>(&self, namespace: &str, message: &M) -> Result<()> {
        self.channel(namespace)?.send_to_all(message)
    }

    /// Log a metrics snapshot for every channel
    pub fn log_metrics(&self) {
        for channel in self.channels.values() {
            channel.metrics().log_metrics(channel.namespace());
        }
    }
}

impl Endpoint for NetworkManager {
    fn hello(&self) -> Hello {
        let mut hello = Hello::new();
        for channel in self.channels.values() {
            hello.extend(channel.hello());
        }
        hello
    }

    /// Negotiate every channel or none. A mismatch on any channel forgets
    /// the peer on the channels that already accepted it.
    fn accept_hello(&self, peer: PeerId, hello: &Hello) -> Result<()> {
        for channel in self.channels.values() {
            if let Err(e) = channel.accept_hello(peer, hello) {
                self.disconnect(peer);
                return Err(e);
            }
        }
        for announced in &hello.channels {
            if !self.channels.contains_key(&announced.namespace) {
                warn!(%peer, namespace = %announced.namespace, "Peer announced a channel we do not serve");
            }
        }
        Ok(())
    }

    fn on_bytes_received(&self, peer: PeerId, envelope: Bytes) -> Result<()> {
        let envelope = Envelope::from_bytes(envelope)?;
        let channel = self.channel(&envelope.channel)?;
        channel.receive(peer, envelope.payload)?;
        Ok(())
    }

    fn disconnect(&self, peer: PeerId) {
        for channel in self.channels.values() {
            channel.disconnect(peer);
        }
    }
}

impl fmt::Debug for NetworkManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkManager")
            .field("side", &self.side)
            .field("channels", &self.channels.keys().collect::<Vec<_>>())
            .field("pending", &self.registry.pending_namespaces())
            .finish()
    }
}
