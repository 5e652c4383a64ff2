//! # Field Model
//!
//! Semantic field types, dynamically typed field values, and the per-type
//! field layout (`FieldSpec`) used by auto-synced messages.
//!
//! A `FieldSpec` pairs a name and a `FieldType` with a getter and, for
//! mutable fields, a setter. Fields without a setter are read-only: they can be
//! written to the wire but never populated by a decoder, which is why the
//! auto field-sync mode rejects them.

use crate::error::{ProtocolError, Result};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Semantic type tag of a single field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Int32,
    Int64,
    UInt64,
    Bool,
    Float32,
    Float64,
    Utf8String,
    ByteArray,
    Uuid,
    /// Caller-defined type, encoded by a codec registered under this tag
    Extension(&'static str),
}

impl FieldType {
    /// Tags that every `CodecRegistry` knows from construction
    pub const BUILTIN: [FieldType; 9] = [
        FieldType::Int32,
        FieldType::Int64,
        FieldType::UInt64,
        FieldType::Bool,
        FieldType::Float32,
        FieldType::Float64,
        FieldType::Utf8String,
        FieldType::ByteArray,
        FieldType::Uuid,
    ];

    pub fn is_builtin(&self) -> bool {
        !matches!(self, FieldType::Extension(_))
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Int32 => f.write_str("Int32"),
            FieldType::Int64 => f.write_str("Int64"),
            FieldType::UInt64 => f.write_str("UInt64"),
            FieldType::Bool => f.write_str("Bool"),
            FieldType::Float32 => f.write_str("Float32"),
            FieldType::Float64 => f.write_str("Float64"),
            FieldType::Utf8String => f.write_str("UTF8String"),
            FieldType::ByteArray => f.write_str("ByteArray"),
            FieldType::Uuid => f.write_str("UUID"),
            FieldType::Extension(tag) => write!(f, "Extension({tag})"),
        }
    }
}

/// Value of a caller-defined field type
#[derive(Clone)]
pub struct ExtensionValue {
    tag: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}

impl ExtensionValue {
    pub fn new<T: Any + Send + Sync>(tag: &'static str, value: T) -> Self {
        Self {
            tag,
            value: Arc::new(value),
        }
    }

    pub fn tag(&self) -> &'static str {
        self.tag
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Take the typed value out, cloning only when the value is still shared.
    pub fn into_typed<T: Any + Send + Sync + Clone>(self) -> Option<T> {
        let typed = self.value.downcast::<T>().ok()?;
        Some(Arc::try_unwrap(typed).unwrap_or_else(|shared| (*shared).clone()))
    }
}

impl fmt::Debug for ExtensionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionValue")
            .field("tag", &self.tag)
            .finish_non_exhaustive()
    }
}

/// Dynamically typed field value moving between a message and a codec
#[derive(Debug, Clone)]
pub enum FieldValue {
    Int32(i32),
    Int64(i64),
    UInt64(u64),
    Bool(bool),
    Float32(f32),
    Float64(f64),
    Utf8String(String),
    ByteArray(Vec<u8>),
    Uuid(Uuid),
    Extension(ExtensionValue),
}

impl FieldValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::Int32(_) => FieldType::Int32,
            FieldValue::Int64(_) => FieldType::Int64,
            FieldValue::UInt64(_) => FieldType::UInt64,
            FieldValue::Bool(_) => FieldType::Bool,
            FieldValue::Float32(_) => FieldType::Float32,
            FieldValue::Float64(_) => FieldType::Float64,
            FieldValue::Utf8String(_) => FieldType::Utf8String,
            FieldValue::ByteArray(_) => FieldType::ByteArray,
            FieldValue::Uuid(_) => FieldType::Uuid,
            FieldValue::Extension(ext) => FieldType::Extension(ext.tag()),
        }
    }
}

// Extension values compare by identity; their Rust type is opaque here.
impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FieldValue::Int32(a), FieldValue::Int32(b)) => a == b,
            (FieldValue::Int64(a), FieldValue::Int64(b)) => a == b,
            (FieldValue::UInt64(a), FieldValue::UInt64(b)) => a == b,
            (FieldValue::Bool(a), FieldValue::Bool(b)) => a == b,
            (FieldValue::Float32(a), FieldValue::Float32(b)) => a == b,
            (FieldValue::Float64(a), FieldValue::Float64(b)) => a == b,
            (FieldValue::Utf8String(a), FieldValue::Utf8String(b)) => a == b,
            (FieldValue::ByteArray(a), FieldValue::ByteArray(b)) => a == b,
            (FieldValue::Uuid(a), FieldValue::Uuid(b)) => a == b,
            (FieldValue::Extension(a), FieldValue::Extension(b)) => {
                a.tag == b.tag && Arc::ptr_eq(&a.value, &b.value)
            }
            _ => false,
        }
    }
}

/// Rust types with a built-in field codec
pub trait FieldKind: Sized + Send + 'static {
    const TYPE: FieldType;

    fn into_value(self) -> FieldValue;

    fn from_value(value: FieldValue) -> Result<Self>;
}

macro_rules! field_kind {
    ($ty:ty, $variant:ident) => {
        impl FieldKind for $ty {
            const TYPE: FieldType = FieldType::$variant;

            fn into_value(self) -> FieldValue {
                FieldValue::$variant(self)
            }

            fn from_value(value: FieldValue) -> Result<Self> {
                match value {
                    FieldValue::$variant(v) => Ok(v),
                    other => Err(ProtocolError::DecodeError(format!(
                        "expected {} value, found {}",
                        Self::TYPE,
                        other.field_type()
                    ))),
                }
            }
        }
    };
}

field_kind!(i32, Int32);
field_kind!(i64, Int64);
field_kind!(u64, UInt64);
field_kind!(bool, Bool);
field_kind!(f32, Float32);
field_kind!(f64, Float64);
field_kind!(String, Utf8String);
field_kind!(Vec<u8>, ByteArray);
field_kind!(Uuid, Uuid);

/// Type-erased description of one field, as stored in a message descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldInfo {
    pub name: &'static str,
    pub field_type: FieldType,
    pub mutable: bool,
}

impl FieldInfo {
    pub fn new(name: &'static str, field_type: FieldType) -> Self {
        Self {
            name,
            field_type,
            mutable: true,
        }
    }

    pub fn read_only(name: &'static str, field_type: FieldType) -> Self {
        Self {
            name,
            field_type,
            mutable: false,
        }
    }
}

type Getter<M> = Box<dyn Fn(&M) -> FieldValue + Send + Sync>;
type Setter<M> = Box<dyn Fn(&mut M, FieldValue) -> Result<()> + Send + Sync>;

/// One field of message type `M`: name, wire type and accessors.
pub struct FieldSpec<M> {
    name: &'static str,
    field_type: FieldType,
    get: Getter<M>,
    set: Option<Setter<M>>,
}

impl<M: 'static> FieldSpec<M> {
    /// A mutable field with a built-in codec.
    pub fn new<T, G, S>(name: &'static str, get: G, set: S) -> Self
    where
        T: FieldKind,
        G: Fn(&M) -> T + Send + Sync + 'static,
        S: Fn(&mut M, T) + Send + Sync + 'static,
    {
        Self {
            name,
            field_type: T::TYPE,
            get: Box::new(move |msg: &M| get(msg).into_value()),
            set: Some(Box::new(move |msg: &mut M, value: FieldValue| {
                set(msg, T::from_value(value)?);
                Ok(())
            })),
        }
    }

    /// A field that can be encoded but never assigned after construction.
    pub fn read_only<T, G>(name: &'static str, get: G) -> Self
    where
        T: FieldKind,
        G: Fn(&M) -> T + Send + Sync + 'static,
    {
        Self {
            name,
            field_type: T::TYPE,
            get: Box::new(move |msg: &M| get(msg).into_value()),
            set: None,
        }
    }

    /// A mutable field encoded by the extension codec registered under `tag`.
    pub fn extension<T, G, S>(name: &'static str, tag: &'static str, get: G, set: S) -> Self
    where
        T: Any + Send + Sync + Clone,
        G: Fn(&M) -> T + Send + Sync + 'static,
        S: Fn(&mut M, T) + Send + Sync + 'static,
    {
        Self {
            name,
            field_type: FieldType::Extension(tag),
            get: Box::new(move |msg: &M| FieldValue::Extension(ExtensionValue::new(tag, get(msg)))),
            set: Some(Box::new(move |msg: &mut M, value: FieldValue| {
                let typed = match value {
                    FieldValue::Extension(ext) if ext.tag() == tag => ext.into_typed::<T>(),
                    _ => None,
                };
                let typed = typed.ok_or_else(|| {
                    ProtocolError::DecodeError(format!(
                        "extension field '{name}' expected a '{tag}' value"
                    ))
                })?;
                set(msg, typed);
                Ok(())
            })),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    pub fn is_mutable(&self) -> bool {
        self.set.is_some()
    }

    pub fn info(&self) -> FieldInfo {
        FieldInfo {
            name: self.name,
            field_type: self.field_type,
            mutable: self.is_mutable(),
        }
    }

    pub(crate) fn get(&self, msg: &M) -> FieldValue {
        (self.get)(msg)
    }

    pub(crate) fn set(&self, msg: &mut M, value: FieldValue) -> Result<()> {
        match &self.set {
            Some(set) => set(msg, value),
            None => Err(ProtocolError::ImmutableField {
                message: std::any::type_name::<M>().to_string(),
                field: self.name.to_string(),
            }),
        }
    }
}

impl<M> fmt::Debug for FieldSpec<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSpec")
            .field("name", &self.name)
            .field("field_type", &self.field_type)
            .field("mutable", &self.set.is_some())
            .finish()
    }
}

/// Declare the field layout of an auto-synced message in declaration order.
///
/// ```
/// use packet_channel::fields;
/// use packet_channel::core::field::FieldSpec;
///
/// #[derive(Default)]
/// struct Chat { sender: String, channel: i32 }
///
/// let layout: Vec<FieldSpec<Chat>> = fields!(Chat { sender: String, channel: i32 });
/// assert_eq!(layout[0].name(), "sender");
/// assert_eq!(layout[1].name(), "channel");
/// ```
#[macro_export]
macro_rules! fields {
    ($msg:ty { $($field:ident : $kind:ty),* $(,)? }) => {
        vec![
            $(
                $crate::core::field::FieldSpec::<$msg>::new::<$kind, _, _>(
                    stringify!($field),
                    |msg: &$msg| -> $kind { ::std::clone::Clone::clone(&msg.$field) },
                    |msg: &mut $msg, value: $kind| msg.$field = value,
                )
            ),*
        ]
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Sample {
        id: i32,
        label: String,
    }

    #[test]
    fn getters_and_setters_go_through_field_values() {
        let specs: Vec<FieldSpec<Sample>> = crate::fields!(Sample { id: i32, label: String });
        let mut sample = Sample::default();

        specs[0].set(&mut sample, FieldValue::Int32(7)).unwrap();
        specs[1]
            .set(&mut sample, FieldValue::Utf8String("seven".into()))
            .unwrap();

        assert_eq!(sample.id, 7);
        assert_eq!(specs[1].get(&sample), FieldValue::Utf8String("seven".into()));
    }

    #[test]
    fn setter_rejects_wrong_value_type() {
        let spec = FieldSpec::<Sample>::new("id", |s: &Sample| s.id, |s: &mut Sample, v| s.id = v);
        let mut sample = Sample::default();
        assert!(spec.set(&mut sample, FieldValue::Bool(true)).is_err());
    }

    #[test]
    fn read_only_fields_refuse_assignment() {
        let spec = FieldSpec::<Sample>::read_only("id", |s: &Sample| s.id);
        assert!(!spec.is_mutable());
        let mut sample = Sample::default();
        assert!(matches!(
            spec.set(&mut sample, FieldValue::Int32(1)),
            Err(ProtocolError::ImmutableField { .. })
        ));
    }

    #[test]
    fn extension_values_round_trip_through_into_typed() {
        let value = ExtensionValue::new("pos", (1i32, 2i32, 3i32));
        assert_eq!(value.tag(), "pos");
        assert_eq!(value.into_typed::<(i32, i32, i32)>(), Some((1, 2, 3)));
    }
}
