//! # Serde-backed Extension Codecs
//!
//! Registers extension field codecs for any `serde` type, so that structured
//! values a host application already serializes (inventory stacks, tagged
//! compound data, rich text) can travel as message fields without hand-written
//! encoders.
//!
//! ## Wire format
//! ```text
//! [VarInt payload length] [payload encoded with the chosen format]
//! ```
//!
//! ## Formats
//! - **Bincode** (default): compact binary, fastest
//! - **Json**: human-readable, handy while debugging a protocol
//!
//! ## Usage
//! ```rust
//! use packet_channel::core::codec::CodecRegistry;
//! use packet_channel::core::serialization::SerializationFormat;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, Clone)]
//! struct ItemStack { item: String, count: u8 }
//!
//! let mut codecs = CodecRegistry::default();
//! codecs
//!     .register_serde::<ItemStack>("item_stack", SerializationFormat::Bincode)
//!     .expect("fresh tag");
//! ```

use crate::core::codec::CodecRegistry;
use crate::core::wire;
use crate::error::{ProtocolError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Supported payload formats for serde-backed codecs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerializationFormat {
    /// Binary compact format (default, fastest)
    #[default]
    Bincode,
    /// Human-readable JSON format (debugging, interop)
    Json,
}

impl SerializationFormat {
    /// Get human-readable name
    pub fn name(self) -> &'static str {
        match self {
            SerializationFormat::Bincode => "Bincode",
            SerializationFormat::Json => "JSON",
        }
    }

    /// Serialize a value to bytes in this format
    pub fn encode_value<T: Serialize>(self, value: &T) -> Result<Vec<u8>> {
        match self {
            SerializationFormat::Bincode => Ok(bincode::serialize(value)?),
            SerializationFormat::Json => serde_json::to_vec(value)
                .map_err(|e| ProtocolError::EncodeError(e.to_string())),
        }
    }

    /// Deserialize a value from bytes in this format
    pub fn decode_value<T: DeserializeOwned>(self, data: &[u8]) -> Result<T> {
        match self {
            SerializationFormat::Bincode => bincode::deserialize(data)
                .map_err(|e| ProtocolError::DecodeError(e.to_string())),
            SerializationFormat::Json => serde_json::from_slice(data)
                .map_err(|e| ProtocolError::DecodeError(e.to_string())),
        }
    }
}

impl CodecRegistry {
    /// Register an extension codec for a serde type under `tag`.
    ///
    /// The encoded payload is bounded by `max_byte_array_length`.
    pub fn register_serde<T>(&mut self, tag: &'static str, format: SerializationFormat) -> Result<()>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let max_len = self.config().max_byte_array_length;
        self.register_extension::<T, _, _>(
            tag,
            move |value, dst| {
                let payload = format.encode_value(value)?;
                wire::put_byte_array(dst, &payload, max_len)
            },
            move |src| {
                let payload = wire::get_byte_array(src, max_len)?;
                format.decode_value(&payload)
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::field::{ExtensionValue, FieldType, FieldValue};
    use bytes::BytesMut;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct ItemStack {
        item: String,
        count: u8,
    }

    #[test]
    fn test_format_names() {
        assert_eq!(SerializationFormat::Bincode.name(), "Bincode");
        assert_eq!(SerializationFormat::Json.name(), "JSON");
    }

    #[test]
    fn test_default_format() {
        assert_eq!(SerializationFormat::default(), SerializationFormat::Bincode);
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn test_serde_codec_in_both_formats() {
        for format in [SerializationFormat::Bincode, SerializationFormat::Json] {
            let mut codecs = CodecRegistry::default();
            codecs
                .register_serde::<ItemStack>("item_stack", format)
                .expect("register");

            let stack = ItemStack {
                item: "minecraft:diamond".into(),
                count: 64,
            };
            let tag = FieldType::Extension("item_stack");
            let mut buf = BytesMut::new();
            codecs
                .encode(
                    &tag,
                    &FieldValue::Extension(ExtensionValue::new("item_stack", stack.clone())),
                    &mut buf,
                )
                .expect("encode");

            let mut bytes = buf.freeze();
            let decoded = codecs.decode(&tag, &mut bytes).expect("decode");
            match decoded {
                FieldValue::Extension(ext) => {
                    assert_eq!(ext.into_typed::<ItemStack>(), Some(stack), "{}", format.name())
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_json_payload_is_readable() {
        let bytes = SerializationFormat::Json
            .encode_value(&ItemStack {
                item: "stone".into(),
                count: 1,
            })
            .unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("\"stone\""));
    }

    #[test]
    fn test_corrupt_payload_is_decode_error() {
        let result = SerializationFormat::Json.decode_value::<ItemStack>(b"{not json");
        assert!(matches!(result, Err(ProtocolError::DecodeError(_))));
    }
}
