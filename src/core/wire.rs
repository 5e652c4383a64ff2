//! # Wire Primitives
//!
//! Big-endian primitive readers/writers, the 7-bit VarInt, length-prefixed
//! strings and byte arrays, and the `FrameWriter` / `FrameReader` pair that
//! message types use to encode themselves.
//!
//! Every reader checks the remaining length before touching the buffer, so a
//! truncated frame surfaces as `ProtocolError::DecodeError` instead of a panic.

use crate::core::codec::CodecRegistry;
use crate::core::field::{ExtensionValue, FieldType, FieldValue};
use crate::error::{constants, ProtocolError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::any::Any;
use uuid::Uuid;

/// Maximum encoded size of a 32-bit VarInt
pub const MAX_VARINT_LEN: usize = 5;

/// Number of bytes `value` occupies as a VarInt
pub fn varint_len(value: u32) -> usize {
    match value {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x1F_FFFF => 3,
        0x20_0000..=0x0FFF_FFFF => 4,
        _ => 5,
    }
}

pub fn put_varint(dst: &mut impl BufMut, mut value: u32) {
    while value >= 0x80 {
        dst.put_u8((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    dst.put_u8(value as u8);
}

pub fn get_varint(src: &mut impl Buf) -> Result<u32> {
    let mut value = 0u32;
    for i in 0..MAX_VARINT_LEN {
        if !src.has_remaining() {
            return Err(ProtocolError::eof());
        }
        let byte = src.get_u8();
        if i == MAX_VARINT_LEN - 1 && byte > 0x0F {
            return Err(ProtocolError::DecodeError(
                constants::ERR_VARINT_TOO_LONG.to_string(),
            ));
        }
        value |= u32::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(ProtocolError::DecodeError(
        constants::ERR_VARINT_TOO_LONG.to_string(),
    ))
}

/// Read a VarInt from the front of `src` without consuming it.
///
/// Returns `Ok(None)` when more bytes are needed, otherwise the value and the
/// number of bytes it occupies.
pub fn peek_varint(src: &[u8]) -> Result<Option<(u32, usize)>> {
    let mut cursor = src;
    match get_varint(&mut cursor) {
        Ok(value) => Ok(Some((value, src.len() - cursor.len()))),
        Err(_) if src.len() < MAX_VARINT_LEN && src.iter().all(|b| b & 0x80 != 0) => Ok(None),
        Err(e) => Err(e),
    }
}

#[inline]
fn ensure(src: &impl Buf, needed: usize) -> Result<()> {
    if src.remaining() < needed {
        Err(ProtocolError::eof())
    } else {
        Ok(())
    }
}

pub fn get_i32(src: &mut impl Buf) -> Result<i32> {
    ensure(src, 4)?;
    Ok(src.get_i32())
}

pub fn get_i64(src: &mut impl Buf) -> Result<i64> {
    ensure(src, 8)?;
    Ok(src.get_i64())
}

pub fn get_u64(src: &mut impl Buf) -> Result<u64> {
    ensure(src, 8)?;
    Ok(src.get_u64())
}

pub fn get_f32(src: &mut impl Buf) -> Result<f32> {
    ensure(src, 4)?;
    Ok(src.get_f32())
}

pub fn get_f64(src: &mut impl Buf) -> Result<f64> {
    ensure(src, 8)?;
    Ok(src.get_f64())
}

pub fn get_bool(src: &mut impl Buf) -> Result<bool> {
    ensure(src, 1)?;
    match src.get_u8() {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(ProtocolError::DecodeError(
            constants::ERR_INVALID_BOOL.to_string(),
        )),
    }
}

pub fn put_uuid(dst: &mut impl BufMut, value: &Uuid) {
    dst.put_u128(value.as_u128());
}

pub fn get_uuid(src: &mut impl Buf) -> Result<Uuid> {
    ensure(src, 16)?;
    Ok(Uuid::from_u128(src.get_u128()))
}

/// Write a VarInt-prefixed UTF-8 string of at most `max_chars` characters.
pub fn put_string(dst: &mut impl BufMut, value: &str, max_chars: usize) -> Result<()> {
    let chars = value.chars().count();
    if chars > max_chars {
        return Err(ProtocolError::EncodeError(format!(
            "String too long: {chars} characters (max {max_chars})"
        )));
    }
    let len = u32::try_from(value.len())
        .map_err(|_| ProtocolError::EncodeError("String length exceeds u32".to_string()))?;
    put_varint(dst, len);
    dst.put_slice(value.as_bytes());
    Ok(())
}

pub fn get_string(src: &mut impl Buf, max_chars: usize) -> Result<String> {
    let len = get_varint(src)? as usize;
    // UTF-8 needs at most four bytes per character
    if len > max_chars.saturating_mul(4) {
        return Err(ProtocolError::DecodeError(format!(
            "String length prefix {len} exceeds limit for {max_chars} characters"
        )));
    }
    ensure(src, len)?;
    let mut raw = vec![0u8; len];
    src.copy_to_slice(&mut raw);
    let value = String::from_utf8(raw)
        .map_err(|_| ProtocolError::DecodeError(constants::ERR_INVALID_UTF8.to_string()))?;
    if value.chars().count() > max_chars {
        return Err(ProtocolError::DecodeError(format!(
            "String too long: more than {max_chars} characters"
        )));
    }
    Ok(value)
}

/// Write a VarInt-prefixed byte array of at most `max_len` bytes.
pub fn put_byte_array(dst: &mut impl BufMut, value: &[u8], max_len: usize) -> Result<()> {
    if value.len() > max_len {
        return Err(ProtocolError::EncodeError(format!(
            "Byte array too long: {} bytes (max {max_len})",
            value.len()
        )));
    }
    let len = u32::try_from(value.len())
        .map_err(|_| ProtocolError::EncodeError("Byte array length exceeds u32".to_string()))?;
    put_varint(dst, len);
    dst.put_slice(value);
    Ok(())
}

pub fn get_byte_array(src: &mut impl Buf, max_len: usize) -> Result<Vec<u8>> {
    let len = get_varint(src)? as usize;
    if len > max_len {
        return Err(ProtocolError::DecodeError(format!(
            "Byte array length {len} exceeds limit {max_len}"
        )));
    }
    ensure(src, len)?;
    let mut raw = vec![0u8; len];
    src.copy_to_slice(&mut raw);
    Ok(raw)
}

/// Write side of a frame, handed to `WireMessage::encode`.
pub struct FrameWriter<'a> {
    buf: &'a mut BytesMut,
    codecs: &'a CodecRegistry,
}

impl<'a> FrameWriter<'a> {
    pub fn new(buf: &'a mut BytesMut, codecs: &'a CodecRegistry) -> Self {
        Self { buf, codecs }
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.put_i32(value);
    }

    pub fn write_i64(&mut self, value: i64) {
        self.buf.put_i64(value);
    }

    pub fn write_u64(&mut self, value: u64) {
        self.buf.put_u64(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    pub fn write_f32(&mut self, value: f32) {
        self.buf.put_f32(value);
    }

    pub fn write_f64(&mut self, value: f64) {
        self.buf.put_f64(value);
    }

    pub fn write_varint(&mut self, value: u32) {
        put_varint(self.buf, value);
    }

    pub fn write_str(&mut self, value: &str) -> Result<()> {
        put_string(self.buf, value, self.codecs.config().max_string_length)
    }

    pub fn write_bytes(&mut self, value: &[u8]) -> Result<()> {
        put_byte_array(self.buf, value, self.codecs.config().max_byte_array_length)
    }

    pub fn write_uuid(&mut self, value: &Uuid) {
        put_uuid(self.buf, value);
    }

    /// Encode a dynamically typed value through the codec registry.
    pub fn write_value(&mut self, field_type: &FieldType, value: &FieldValue) -> Result<()> {
        self.codecs.encode(field_type, value, self.buf)
    }

    /// Encode a value with a registered extension codec.
    pub fn write_extension<T>(&mut self, tag: &'static str, value: &T) -> Result<()>
    where
        T: Any + Send + Sync + Clone,
    {
        let value = FieldValue::Extension(ExtensionValue::new(tag, value.clone()));
        self.codecs
            .encode(&FieldType::Extension(tag), &value, self.buf)
    }

    /// Bytes written to the underlying frame so far
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Read side of a frame, handed to `WireMessage::decode`.
pub struct FrameReader<'a> {
    buf: &'a mut Bytes,
    codecs: &'a CodecRegistry,
}

impl<'a> FrameReader<'a> {
    pub fn new(buf: &'a mut Bytes, codecs: &'a CodecRegistry) -> Self {
        Self { buf, codecs }
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        get_i32(self.buf)
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        get_i64(self.buf)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        get_u64(self.buf)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        get_bool(self.buf)
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        get_f32(self.buf)
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        get_f64(self.buf)
    }

    pub fn read_varint(&mut self) -> Result<u32> {
        get_varint(self.buf)
    }

    pub fn read_string(&mut self) -> Result<String> {
        get_string(self.buf, self.codecs.config().max_string_length)
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        get_byte_array(self.buf, self.codecs.config().max_byte_array_length)
    }

    pub fn read_uuid(&mut self) -> Result<Uuid> {
        get_uuid(self.buf)
    }

    pub fn read_value(&mut self, field_type: &FieldType) -> Result<FieldValue> {
        self.codecs.decode(field_type, self.buf)
    }

    pub fn read_extension<T>(&mut self, tag: &'static str) -> Result<T>
    where
        T: Any + Send + Sync + Clone,
    {
        match self.codecs.decode(&FieldType::Extension(tag), self.buf)? {
            FieldValue::Extension(ext) => ext.into_typed::<T>().ok_or_else(|| {
                ProtocolError::DecodeError(format!(
                    "Extension codec '{tag}' produced an unexpected Rust type"
                ))
            }),
            other => Err(ProtocolError::DecodeError(format!(
                "Extension codec '{tag}' produced a {} value",
                other.field_type()
            ))),
        }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }
}
