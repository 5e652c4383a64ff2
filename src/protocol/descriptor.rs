//! Message descriptors.
//!
//! A `MessageSpec` is what a contributor registers: the message's metadata,
//! a type-erased codec pipeline and the receive handler. Freezing a namespace
//! turns each spec into a `MessageDescriptor` by giving it its wire id, and
//! collects them into an immutable `DescriptorTable`.
//!
//! Auto-synced layouts are derived once per type and shared through
//! `LayoutCache`.

use crate::core::field::{FieldInfo, FieldSpec};
use crate::core::wire::{FrameReader, FrameWriter};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::message::{AutoMessage, Direction, HandlerContext, Message, WireMessage};
use std::any::{Any, TypeId};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::{debug, error};

type ErasedEncode = Box<dyn Fn(&dyn Any, &mut FrameWriter<'_>) -> Result<()> + Send + Sync>;
type ErasedDecode = Box<dyn Fn(&mut FrameReader<'_>) -> Result<Box<dyn Any + Send>> + Send + Sync>;

/// Type-erased receive handler
pub type Handler = Arc<dyn Fn(Box<dyn Any + Send>, &HandlerContext) + Send + Sync>;

/// How a message type is turned into bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecMode {
    /// The type implements `WireMessage`
    Explicit,
    /// The codec is derived from the type's `AutoMessage` field list
    Auto,
}

fn erase_handler<M, F>(handler: F) -> Handler
where
    M: Message,
    F: Fn(M, &HandlerContext) + Send + Sync + 'static,
{
    Arc::new(move |message: Box<dyn Any + Send>, ctx: &HandlerContext| {
        match message.downcast::<M>() {
            Ok(message) => handler(*message, ctx),
            Err(_) => error!(
                namespace = ctx.namespace(),
                message = M::NAME,
                "Handler received a value of the wrong type"
            ),
        }
    })
}

fn wrong_type<M: Message>() -> ProtocolError {
    ProtocolError::EncodeError(format!("value passed to the {} codec has another type", M::NAME))
}

/// Field layout of an auto-synced message type
pub struct AutoLayout<M> {
    fields: Vec<FieldSpec<M>>,
}

impl<M: AutoMessage> AutoLayout<M> {
    /// Derive the layout, rejecting read-only fields.
    pub fn build() -> Result<Self> {
        let fields = M::fields();
        if let Some(field) = fields.iter().find(|f| !f.is_mutable()) {
            return Err(ProtocolError::ImmutableField {
                message: M::NAME.to_string(),
                field: field.name().to_string(),
            });
        }
        debug!(message = M::NAME, fields = fields.len(), "Derived auto field layout");
        Ok(Self { fields })
    }

    pub fn infos(&self) -> Vec<FieldInfo> {
        self.fields.iter().map(FieldSpec::info).collect()
    }

    pub fn encode(&self, message: &M, writer: &mut FrameWriter<'_>) -> Result<()> {
        for field in &self.fields {
            writer.write_value(&field.field_type(), &field.get(message))?;
        }
        Ok(())
    }

    /// Build `M::default()` and populate every field in declaration order.
    pub fn decode(&self, reader: &mut FrameReader<'_>) -> Result<M> {
        let mut message = M::default();
        for field in &self.fields {
            let value = reader.read_value(&field.field_type())?;
            field.set(&mut message, value)?;
        }
        Ok(message)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<M> fmt::Debug for AutoLayout<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutoLayout")
            .field("fields", &self.fields)
            .finish()
    }
}

/// Compute-once cache of auto layouts keyed by message type.
///
/// Concurrent first use builds the layout once; every caller gets the same
/// `Arc`.
#[derive(Default)]
pub struct LayoutCache {
    layouts: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl LayoutCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_build<M: AutoMessage>(&self) -> Result<Arc<AutoLayout<M>>> {
        let key = TypeId::of::<M>();
        {
            let layouts = self
                .layouts
                .read()
                .map_err(|_| ProtocolError::ConfigError(constants::ERR_LAYOUT_LOCK.to_string()))?;
            if let Some(found) = layouts.get(&key) {
                return Self::typed(Arc::clone(found));
            }
        }

        let mut layouts = self
            .layouts
            .write()
            .map_err(|_| ProtocolError::ConfigError(constants::ERR_LAYOUT_LOCK.to_string()))?;
        match layouts.entry(key) {
            Entry::Occupied(found) => Self::typed(Arc::clone(found.get())),
            Entry::Vacant(slot) => {
                let layout = Arc::new(AutoLayout::<M>::build()?);
                slot.insert(layout.clone());
                Ok(layout)
            }
        }
    }

    pub fn contains<M: 'static>(&self) -> bool {
        self.layouts
            .read()
            .map(|layouts| layouts.contains_key(&TypeId::of::<M>()))
            .unwrap_or(false)
    }

    fn typed<M: AutoMessage>(erased: Arc<dyn Any + Send + Sync>) -> Result<Arc<AutoLayout<M>>> {
        erased.downcast::<AutoLayout<M>>().map_err(|_| {
            ProtocolError::ConfigError(format!("cached layout for {} has another type", M::NAME))
        })
    }
}

impl fmt::Debug for LayoutCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cached = self.layouts.read().map(|l| l.len()).unwrap_or(0);
        f.debug_struct("LayoutCache").field("cached", &cached).finish()
    }
}

/// A message type queued for registration, not yet assigned an id
pub struct MessageSpec {
    name: &'static str,
    type_id: TypeId,
    direction: Direction,
    fields: Vec<FieldInfo>,
    mode: CodecMode,
    encode: ErasedEncode,
    decode: ErasedDecode,
    handler: Handler,
}

impl MessageSpec {
    /// Spec for a type that encodes itself
    pub fn explicit<M, F>(handler: F) -> Self
    where
        M: WireMessage,
        F: Fn(M, &HandlerContext) + Send + Sync + 'static,
    {
        Self {
            name: M::NAME,
            type_id: TypeId::of::<M>(),
            direction: M::DIRECTION,
            fields: M::field_layout(),
            mode: CodecMode::Explicit,
            encode: Box::new(|message: &dyn Any, writer: &mut FrameWriter<'_>| {
                message
                    .downcast_ref::<M>()
                    .ok_or_else(wrong_type::<M>)?
                    .encode(writer)
            }),
            decode: Box::new(|reader: &mut FrameReader<'_>| {
                M::decode(reader).map(|m| Box::new(m) as Box<dyn Any + Send>)
            }),
            handler: erase_handler(handler),
        }
    }

    /// Spec for an auto-synced type, using a layout from a `LayoutCache`
    pub fn auto<M, F>(layout: Arc<AutoLayout<M>>, handler: F) -> Self
    where
        M: AutoMessage,
        F: Fn(M, &HandlerContext) + Send + Sync + 'static,
    {
        let encode_layout = Arc::clone(&layout);
        let decode_layout = Arc::clone(&layout);
        Self {
            name: M::NAME,
            type_id: TypeId::of::<M>(),
            direction: M::DIRECTION,
            fields: layout.infos(),
            mode: CodecMode::Auto,
            encode: Box::new(move |message: &dyn Any, writer: &mut FrameWriter<'_>| {
                let message = message.downcast_ref::<M>().ok_or_else(wrong_type::<M>)?;
                encode_layout.encode(message, writer)
            }),
            decode: Box::new(move |reader: &mut FrameReader<'_>| {
                decode_layout
                    .decode(reader)
                    .map(|m| Box::new(m) as Box<dyn Any + Send>)
            }),
            handler: erase_handler(handler),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn fields(&self) -> &[FieldInfo] {
        &self.fields
    }

    pub fn mode(&self) -> CodecMode {
        self.mode
    }

    pub(crate) fn into_descriptor(self, id: u32) -> MessageDescriptor {
        MessageDescriptor {
            id,
            name: self.name,
            type_id: self.type_id,
            direction: self.direction,
            fields: self.fields,
            mode: self.mode,
            encode: self.encode,
            decode: self.decode,
            handler: self.handler,
        }
    }
}

impl fmt::Debug for MessageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageSpec")
            .field("name", &self.name)
            .field("direction", &self.direction)
            .field("mode", &self.mode)
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}

/// Immutable metadata of one registered message type
pub struct MessageDescriptor {
    id: u32,
    name: &'static str,
    type_id: TypeId,
    direction: Direction,
    fields: Vec<FieldInfo>,
    mode: CodecMode,
    encode: ErasedEncode,
    decode: ErasedDecode,
    handler: Handler,
}

impl MessageDescriptor {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Field layout in wire order
    pub fn fields(&self) -> &[FieldInfo] {
        &self.fields
    }

    pub fn mode(&self) -> CodecMode {
        self.mode
    }

    pub(crate) fn encode(&self, message: &dyn Any, writer: &mut FrameWriter<'_>) -> Result<()> {
        (self.encode)(message, writer)
    }

    pub(crate) fn decode(&self, reader: &mut FrameReader<'_>) -> Result<Box<dyn Any + Send>> {
        (self.decode)(reader)
    }

    pub(crate) fn handler(&self) -> Handler {
        Arc::clone(&self.handler)
    }
}

impl fmt::Debug for MessageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("direction", &self.direction)
            .field("mode", &self.mode)
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}

/// Frozen id → descriptor table of one namespace
#[derive(Debug)]
pub struct DescriptorTable {
    namespace: Arc<str>,
    descriptors: Vec<MessageDescriptor>,
    by_type: HashMap<TypeId, u32>,
}

impl DescriptorTable {
    /// Assign ids 0.. in the order the specs were queued.
    pub(crate) fn new(namespace: Arc<str>, specs: Vec<MessageSpec>) -> Self {
        let descriptors: Vec<MessageDescriptor> = specs
            .into_iter()
            .enumerate()
            .map(|(id, spec)| spec.into_descriptor(id as u32))
            .collect();
        let by_type = descriptors.iter().map(|d| (d.type_id, d.id)).collect();
        Self {
            namespace,
            descriptors,
            by_type,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn get(&self, id: u32) -> Option<&MessageDescriptor> {
        self.descriptors.get(id as usize)
    }

    pub fn id_of<M: 'static>(&self) -> Option<u32> {
        self.by_type.get(&TypeId::of::<M>()).copied()
    }

    pub fn descriptor_of<M: 'static>(&self) -> Option<&MessageDescriptor> {
        self.id_of::<M>().and_then(|id| self.get(id))
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Descriptors in id order
    pub fn iter(&self) -> impl Iterator<Item = &MessageDescriptor> {
        self.descriptors.iter()
    }
}
