//! # Framing
//!
//! Length framing for stream transports and the channel envelope that lets
//! many channels share one connection.
//!
//! ## Stream framing
//! ```text
//! [VarInt length] [length bytes]
//! ```
//! The length is validated against the configured maximum before any payload
//! is buffered, so a hostile peer cannot make the decoder allocate more than
//! `max_frame_size` bytes.
//!
//! ## Envelope
//! ```text
//! [VarInt namespace length] [namespace UTF-8] [channel frame]
//! ```

use crate::config::MAX_FRAME_SIZE;
use crate::core::wire;
use crate::error::{ProtocolError, Result};
use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Maximum namespace length carried in an envelope
pub const MAX_NAMESPACE_LENGTH: usize = 256;

/// Tokio codec for VarInt length-prefixed frames
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(MAX_FRAME_SIZE)
    }
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let (len, header) = match wire::peek_varint(src)? {
            Some(found) => found,
            None => return Ok(None),
        };
        let len = len as usize;
        if len > self.max_frame_size {
            return Err(ProtocolError::OversizedFrame(len));
        }

        if src.len() < header + len {
            src.reserve(header + len - src.len());
            return Ok(None);
        }

        src.advance(header);
        Ok(Some(src.split_to(len).freeze()))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        if item.len() > self.max_frame_size {
            return Err(ProtocolError::OversizedFrame(item.len()));
        }
        dst.reserve(wire::MAX_VARINT_LEN + item.len());
        wire::put_varint(dst, item.len() as u32);
        dst.extend_from_slice(&item);
        Ok(())
    }
}

/// A channel frame tagged with the namespace it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub channel: String,
    pub payload: Bytes,
}

impl Envelope {
    pub fn new(channel: impl Into<String>, payload: Bytes) -> Self {
        Self {
            channel: channel.into(),
            payload,
        }
    }

    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(
            wire::MAX_VARINT_LEN + self.channel.len() + self.payload.len(),
        );
        wire::put_string(&mut buf, &self.channel, MAX_NAMESPACE_LENGTH)?;
        buf.extend_from_slice(&self.payload);
        Ok(buf.freeze())
    }

    pub fn from_bytes(mut data: Bytes) -> Result<Self> {
        let channel = wire::get_string(&mut data, MAX_NAMESPACE_LENGTH)?;
        Ok(Self {
            channel,
            payload: data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_waits_for_complete_frame() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        codec
            .encode(Bytes::from_static(b"hello"), &mut buf)
            .unwrap();
        assert_eq!(&buf[..], &[5, b'h', b'e', b'l', b'l', b'o']);

        let mut partial = BytesMut::from(&buf[..3]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&frame[..], b"hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn decoder_rejects_oversized_length_before_buffering() {
        let mut codec = FrameCodec::new(16);
        let mut buf = BytesMut::new();
        wire::put_varint(&mut buf, 17);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::OversizedFrame(17))
        ));
    }

    #[test]
    fn encoder_rejects_oversized_frame() {
        let mut codec = FrameCodec::new(4);
        let mut buf = BytesMut::new();
        assert!(codec
            .encode(Bytes::from_static(b"too long"), &mut buf)
            .is_err());
    }

    #[test]
    fn envelope_keeps_namespace_and_payload() {
        let envelope = Envelope::new("examplemod", Bytes::from_static(&[0, 1, 2]));
        let bytes = envelope.to_bytes().unwrap();
        assert_eq!(Envelope::from_bytes(bytes).unwrap(), envelope);
    }

    #[test]
    fn empty_frame_is_valid() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&[0u8][..]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert!(frame.is_empty());
    }
}
