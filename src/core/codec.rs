//! # Codec Registry
//!
//! Maps a `FieldType` to the pair of functions that write and read it.
//!
//! Every built-in tag is registered at construction. Callers extend the
//! registry with `register`, `register_extension` or `register_serde`; the
//! registry is additive only, so a tag cannot be replaced or removed once a
//! descriptor may depend on it.
//!
//! ## Built-in encodings
//! ```text
//! Int32      4 bytes, big-endian
//! Int64      8 bytes, big-endian
//! UInt64     8 bytes, big-endian
//! Bool       1 byte, 0 or 1
//! Float32    4 bytes, IEEE-754 big-endian
//! Float64    8 bytes, IEEE-754 big-endian
//! UTF8String [VarInt byte length][UTF-8 bytes]
//! ByteArray  [VarInt length][bytes]
//! UUID       16 bytes, most significant half first
//! ```

use crate::config::CodecConfig;
use crate::core::field::{ExtensionValue, FieldType, FieldValue};
use crate::core::wire;
use crate::error::{ProtocolError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Writes one field value
pub type EncodeFn = Arc<dyn Fn(&FieldValue, &mut BytesMut) -> Result<()> + Send + Sync>;

/// Reads one field value
pub type DecodeFn = Arc<dyn Fn(&mut Bytes) -> Result<FieldValue> + Send + Sync>;

#[derive(Clone)]
struct Codec {
    encode: EncodeFn,
    decode: DecodeFn,
}

/// Registry of field codecs keyed by semantic type tag
#[derive(Clone)]
pub struct CodecRegistry {
    codecs: HashMap<FieldType, Codec>,
    config: CodecConfig,
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new(&CodecConfig::default())
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("tags", &self.codecs.keys().collect::<Vec<_>>())
            .field("config", &self.config)
            .finish()
    }
}

fn mismatch(expected: &FieldType, found: &FieldValue) -> ProtocolError {
    ProtocolError::EncodeError(format!(
        "expected {expected} value, found {}",
        found.field_type()
    ))
}

impl CodecRegistry {
    /// Create a registry holding every built-in codec.
    pub fn new(config: &CodecConfig) -> Self {
        let mut registry = Self {
            codecs: HashMap::new(),
            config: config.clone(),
        };
        registry.install_builtins();
        registry
    }

    fn builtin<E, D>(&mut self, tag: FieldType, encode: E, decode: D)
    where
        E: Fn(&FieldValue, &mut BytesMut) -> Result<()> + Send + Sync + 'static,
        D: Fn(&mut Bytes) -> Result<FieldValue> + Send + Sync + 'static,
    {
        self.codecs.insert(
            tag,
            Codec {
                encode: Arc::new(encode),
                decode: Arc::new(decode),
            },
        );
    }

    fn install_builtins(&mut self) {
        self.builtin(
            FieldType::Int32,
            |value, dst| match value {
                FieldValue::Int32(v) => {
                    dst.put_i32(*v);
                    Ok(())
                }
                other => Err(mismatch(&FieldType::Int32, other)),
            },
            |src| wire::get_i32(src).map(FieldValue::Int32),
        );
        self.builtin(
            FieldType::Int64,
            |value, dst| match value {
                FieldValue::Int64(v) => {
                    dst.put_i64(*v);
                    Ok(())
                }
                other => Err(mismatch(&FieldType::Int64, other)),
            },
            |src| wire::get_i64(src).map(FieldValue::Int64),
        );
        self.builtin(
            FieldType::UInt64,
            |value, dst| match value {
                FieldValue::UInt64(v) => {
                    dst.put_u64(*v);
                    Ok(())
                }
                other => Err(mismatch(&FieldType::UInt64, other)),
            },
            |src| wire::get_u64(src).map(FieldValue::UInt64),
        );
        self.builtin(
            FieldType::Bool,
            |value, dst| match value {
                FieldValue::Bool(v) => {
                    dst.put_u8(u8::from(*v));
                    Ok(())
                }
                other => Err(mismatch(&FieldType::Bool, other)),
            },
            |src| wire::get_bool(src).map(FieldValue::Bool),
        );
        self.builtin(
            FieldType::Float32,
            |value, dst| match value {
                FieldValue::Float32(v) => {
                    dst.put_f32(*v);
                    Ok(())
                }
                other => Err(mismatch(&FieldType::Float32, other)),
            },
            |src| wire::get_f32(src).map(FieldValue::Float32),
        );
        self.builtin(
            FieldType::Float64,
            |value, dst| match value {
                FieldValue::Float64(v) => {
                    dst.put_f64(*v);
                    Ok(())
                }
                other => Err(mismatch(&FieldType::Float64, other)),
            },
            |src| wire::get_f64(src).map(FieldValue::Float64),
        );

        let max_chars = self.config.max_string_length;
        self.builtin(
            FieldType::Utf8String,
            move |value, dst| match value {
                FieldValue::Utf8String(v) => wire::put_string(dst, v, max_chars),
                other => Err(mismatch(&FieldType::Utf8String, other)),
            },
            move |src| wire::get_string(src, max_chars).map(FieldValue::Utf8String),
        );

        let max_len = self.config.max_byte_array_length;
        self.builtin(
            FieldType::ByteArray,
            move |value, dst| match value {
                FieldValue::ByteArray(v) => wire::put_byte_array(dst, v, max_len),
                other => Err(mismatch(&FieldType::ByteArray, other)),
            },
            move |src| wire::get_byte_array(src, max_len).map(FieldValue::ByteArray),
        );

        self.builtin(
            FieldType::Uuid,
            |value, dst| match value {
                FieldValue::Uuid(v) => {
                    wire::put_uuid(dst, v);
                    Ok(())
                }
                other => Err(mismatch(&FieldType::Uuid, other)),
            },
            |src| wire::get_uuid(src).map(FieldValue::Uuid),
        );
    }

    /// Register a codec for `tag`.
    ///
    /// # Errors
    /// `DuplicateCodec` if the tag already has a codec (built-ins included).
    pub fn register(&mut self, tag: FieldType, encode: EncodeFn, decode: DecodeFn) -> Result<()> {
        if self.codecs.contains_key(&tag) {
            return Err(ProtocolError::DuplicateCodec(tag.to_string()));
        }
        self.codecs.insert(tag, Codec { encode, decode });
        Ok(())
    }

    /// Register a typed codec for `FieldType::Extension(tag)`.
    pub fn register_extension<T, E, D>(&mut self, tag: &'static str, encode: E, decode: D) -> Result<()>
    where
        T: Any + Send + Sync,
        E: Fn(&T, &mut BytesMut) -> Result<()> + Send + Sync + 'static,
        D: Fn(&mut Bytes) -> Result<T> + Send + Sync + 'static,
    {
        let erased_encode = move |value: &FieldValue, dst: &mut BytesMut| -> Result<()> {
            match value {
                FieldValue::Extension(ext) if ext.tag() == tag => {
                    let typed = ext.downcast_ref::<T>().ok_or_else(|| {
                        ProtocolError::EncodeError(format!(
                            "extension value for '{tag}' has an unexpected Rust type"
                        ))
                    })?;
                    encode(typed, dst)
                }
                other => Err(mismatch(&FieldType::Extension(tag), other)),
            }
        };
        let erased_decode = move |src: &mut Bytes| -> Result<FieldValue> {
            decode(src).map(|v| FieldValue::Extension(ExtensionValue::new(tag, v)))
        };
        self.register(
            FieldType::Extension(tag),
            Arc::new(erased_encode),
            Arc::new(erased_decode),
        )
    }

    pub fn contains(&self, tag: &FieldType) -> bool {
        self.codecs.contains_key(tag)
    }

    fn codec(&self, tag: &FieldType) -> Result<&Codec> {
        self.codecs
            .get(tag)
            .ok_or_else(|| ProtocolError::UnsupportedFieldType(tag.to_string()))
    }

    /// Encode `value` with the codec registered for `tag`.
    pub fn encode(&self, tag: &FieldType, value: &FieldValue, dst: &mut BytesMut) -> Result<()> {
        (self.codec(tag)?.encode)(value, dst)
    }

    /// Decode one value with the codec registered for `tag`.
    pub fn decode(&self, tag: &FieldType, src: &mut Bytes) -> Result<FieldValue> {
        (self.codec(tag)?.decode)(src)
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Registered tags, in no particular order
    pub fn tags(&self) -> impl Iterator<Item = &FieldType> {
        self.codecs.keys()
    }
}
