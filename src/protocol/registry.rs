//! Message type registry.
//!
//! Registration is two-phase. Contributors queue message types per namespace
//! with `add_pending` (or the `register` / `register_auto` shorthands) in any
//! number of calls; `freeze` then assigns ids `0..n` in call order and returns
//! the namespace's `Channel`. Both endpoints must queue the same types in the
//! same order for their ids to agree.
//!
//! ```
//! use packet_channel::fields;
//! use packet_channel::core::field::FieldSpec;
//! use packet_channel::protocol::message::{AutoMessage, Direction, Message, Side};
//! use packet_channel::protocol::registry::MessageTypeRegistry;
//!
//! #[derive(Default)]
//! struct Ping { nonce: i64 }
//!
//! impl Message for Ping {
//!     const NAME: &'static str = "Ping";
//!     const DIRECTION: Direction = Direction::Bidirectional;
//! }
//!
//! impl AutoMessage for Ping {
//!     fn fields() -> Vec<FieldSpec<Self>> {
//!         fields!(Ping { nonce: i64 })
//!     }
//! }
//!
//! let mut registry = MessageTypeRegistry::new(Side::Server);
//! registry.register_auto::<Ping, _>("demo", |_ping, _ctx| {}).unwrap();
//! let channel = registry.freeze("demo").unwrap();
//! assert_eq!(channel.id_of::<Ping>(), Some(0));
//! ```

use crate::config::{NetworkConfig, MAX_STRING_LENGTH};
use crate::core::codec::CodecRegistry;
use crate::core::frame::MAX_NAMESPACE_LENGTH;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::channel::Channel;
use crate::protocol::descriptor::{DescriptorTable, LayoutCache, MessageSpec};
use crate::protocol::message::{AutoMessage, HandlerContext, Side, WireMessage};
use crate::utils::metrics::Timer;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument};

#[derive(Debug)]
struct PendingChannel {
    version: String,
    specs: Vec<MessageSpec>,
}

impl PendingChannel {
    fn new(version: String) -> Self {
        Self {
            version,
            specs: Vec::new(),
        }
    }
}

/// Accumulates message types per namespace until they are frozen
#[derive(Debug)]
pub struct MessageTypeRegistry {
    side: Side,
    config: NetworkConfig,
    codecs: Arc<CodecRegistry>,
    layouts: LayoutCache,
    pending: BTreeMap<String, PendingChannel>,
    frozen: HashSet<String>,
}

impl MessageTypeRegistry {
    /// Registry with default configuration
    pub fn new(side: Side) -> Self {
        Self::with_config(side, &NetworkConfig::default())
    }

    pub fn with_config(side: Side, config: &NetworkConfig) -> Self {
        Self {
            side,
            config: config.clone(),
            codecs: Arc::new(CodecRegistry::new(&config.codec)),
            layouts: LayoutCache::new(),
            pending: BTreeMap::new(),
            frozen: HashSet::new(),
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn codecs(&self) -> &CodecRegistry {
        &self.codecs
    }

    /// Extend the codec registry.
    ///
    /// # Errors
    /// `RegistryFrozen` once any namespace has been frozen, because frozen
    /// channels share the registry.
    pub fn codecs_mut(&mut self) -> Result<&mut CodecRegistry> {
        if !self.frozen.is_empty() {
            return Err(ProtocolError::RegistryFrozen(String::from("codecs")));
        }
        Arc::get_mut(&mut self.codecs)
            .ok_or_else(|| ProtocolError::RegistryFrozen(String::from("codecs")))
    }

    fn ensure_open(&self, namespace: &str) -> Result<()> {
        if self.frozen.contains(namespace) {
            return Err(ProtocolError::RegistryFrozen(namespace.to_string()));
        }
        let chars = namespace.chars().count();
        if chars > MAX_NAMESPACE_LENGTH {
            return Err(ProtocolError::ConfigError(format!(
                "{}: {} characters (max {})",
                constants::ERR_NAMESPACE_TOO_LONG,
                chars,
                MAX_NAMESPACE_LENGTH
            )));
        }
        Ok(())
    }

    // Namespace and version both travel in the hello as bounded strings.
    fn check_version(namespace: &str, version: &str) -> Result<()> {
        let chars = version.chars().count();
        if chars > MAX_STRING_LENGTH {
            return Err(ProtocolError::ConfigError(format!(
                "{} ({}): {} characters (max {})",
                constants::ERR_VERSION_TOO_LONG,
                namespace,
                chars,
                MAX_STRING_LENGTH
            )));
        }
        Ok(())
    }

    fn pending_mut(&mut self, namespace: &str) -> &mut PendingChannel {
        let version = &self.config.channel.protocol_version;
        self.pending
            .entry(namespace.to_string())
            .or_insert_with(|| PendingChannel::new(version.clone()))
    }

    /// Set the protocol version of `namespace`. Unopened namespaces use the
    /// configured default.
    ///
    /// # Errors
    /// - `RegistryFrozen` if the namespace is already frozen
    /// - `ConfigError` if the namespace or version cannot be carried by a hello
    pub fn open(&mut self, namespace: &str, version: impl Into<String>) -> Result<()> {
        self.ensure_open(namespace)?;
        let version = version.into();
        Self::check_version(namespace, &version)?;
        debug!(namespace, %version, "Opened channel");
        self.pending_mut(namespace).version = version;
        Ok(())
    }

    /// Queue a message type on `namespace`.
    ///
    /// # Errors
    /// - `RegistryFrozen` if the namespace is already frozen
    /// - `ConfigError` if the namespace or version cannot be carried by a hello
    /// - `UnsupportedFieldType` if a field type has no codec
    /// - `DuplicateMessageType` if the type is already queued here
    pub fn add_pending(&mut self, namespace: &str, spec: MessageSpec) -> Result<()> {
        self.ensure_open(namespace)?;
        if !self.pending.contains_key(namespace) {
            Self::check_version(namespace, &self.config.channel.protocol_version)?;
        }

        if let Some(field) = spec
            .fields()
            .iter()
            .find(|f| !self.codecs.contains(&f.field_type))
        {
            return Err(ProtocolError::UnsupportedFieldType(format!(
                "{} (field '{}' of {})",
                field.field_type,
                field.name,
                spec.name()
            )));
        }

        let pending = self.pending_mut(namespace);
        if pending.specs.iter().any(|s| s.type_id() == spec.type_id()) {
            return Err(ProtocolError::DuplicateMessageType {
                namespace: namespace.to_string(),
                message: spec.name().to_string(),
            });
        }

        debug!(
            namespace,
            message = spec.name(),
            direction = %spec.direction(),
            position = pending.specs.len(),
            "Queued message type"
        );
        pending.specs.push(spec);
        Ok(())
    }

    /// Queue a `WireMessage` type with its handler.
    pub fn register<M, F>(&mut self, namespace: &str, handler: F) -> Result<()>
    where
        M: WireMessage,
        F: Fn(M, &HandlerContext) + Send + Sync + 'static,
    {
        self.add_pending(namespace, MessageSpec::explicit::<M, F>(handler))
    }

    /// Queue an `AutoMessage` type with its handler. Its layout is derived
    /// on first use and cached.
    pub fn register_auto<M, F>(&mut self, namespace: &str, handler: F) -> Result<()>
    where
        M: AutoMessage,
        F: Fn(M, &HandlerContext) + Send + Sync + 'static,
    {
        self.ensure_open(namespace)?;
        let layout = self.layouts.get_or_build::<M>()?;
        self.add_pending(namespace, MessageSpec::auto::<M, F>(layout, handler))
    }

    /// Assign ids to everything queued on `namespace` and build its channel.
    ///
    /// Freezing a namespace with nothing queued yields an empty channel.
    ///
    /// # Errors
    /// - `RegistryFrozen` if the namespace was already frozen
    /// - `ConfigError` if the namespace or version cannot be carried by a hello
    #[instrument(skip(self), fields(side = %self.side))]
    pub fn freeze(&mut self, namespace: &str) -> Result<Channel> {
        self.ensure_open(namespace)?;
        let version = self
            .pending
            .get(namespace)
            .map_or(&self.config.channel.protocol_version, |p| &p.version);
        Self::check_version(namespace, version)?;
        let pending = self
            .pending
            .remove(namespace)
            .unwrap_or_else(|| PendingChannel::new(self.config.channel.protocol_version.clone()));
        self.frozen.insert(namespace.to_string());

        let table = DescriptorTable::new(Arc::from(namespace), pending.specs);
        for descriptor in table.iter() {
            info!(
                namespace,
                id = descriptor.id(),
                message = descriptor.name(),
                direction = %descriptor.direction(),
                "Registered message type"
            );
        }
        info!(
            namespace,
            version = %pending.version,
            messages = table.len(),
            "Channel frozen"
        );

        Ok(Channel::new(
            table,
            pending.version,
            self.side,
            Arc::clone(&self.codecs),
            self.config.channel.max_frame_size,
        ))
    }

    /// Freeze every namespace with queued or opened types, in sorted order.
    pub fn freeze_all(&mut self) -> Result<Vec<Channel>> {
        let _timer = Timer::start("freeze_all");
        let namespaces: Vec<String> = self.pending.keys().cloned().collect();
        namespaces.iter().map(|ns| self.freeze(ns)).collect()
    }

    /// Namespaces opened or queued on but not yet frozen, sorted
    pub fn pending_namespaces(&self) -> Vec<&str> {
        self.pending.keys().map(String::as_str).collect()
    }

    pub fn is_frozen(&self, namespace: &str) -> bool {
        self.frozen.contains(namespace)
    }
}
