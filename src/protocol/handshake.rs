//! Channel version handshake.
//!
//! On connect both endpoints send one `Hello` frame listing every channel
//! they serve together with its protocol version. Each channel then checks
//! the peer's entry for its own namespace; versions must be byte-for-byte
//! equal, and a channel missing from the peer's hello is a mismatch.
//!
//! ```text
//! [VarInt count] { [string namespace] [string version] } * count
//! ```

use crate::config::MAX_STRING_LENGTH;
use crate::core::frame::MAX_NAMESPACE_LENGTH;
use crate::core::wire;
use crate::error::{constants, ProtocolError, Result};
use bytes::{Buf, Bytes, BytesMut};

/// Upper bound on channels announced in one hello
pub const MAX_HELLO_CHANNELS: usize = 4096;

/// One announced channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelVersion {
    pub namespace: String,
    pub version: String,
}

/// The handshake frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hello {
    pub channels: Vec<ChannelVersion>,
}

impl Hello {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a channel entry
    pub fn with_channel(mut self, namespace: impl Into<String>, version: impl Into<String>) -> Self {
        self.channels.push(ChannelVersion {
            namespace: namespace.into(),
            version: version.into(),
        });
        self
    }

    /// Merge the entries of another hello into this one
    pub fn extend(&mut self, other: Hello) {
        self.channels.extend(other.channels);
    }

    /// Version the peer announced for `namespace`, if any
    pub fn version_of(&self, namespace: &str) -> Option<&str> {
        self.channels
            .iter()
            .find(|c| c.namespace == namespace)
            .map(|c| c.version.as_str())
    }

    pub fn encode(&self) -> Result<Bytes> {
        if self.channels.len() > MAX_HELLO_CHANNELS {
            return Err(ProtocolError::HandshakeError(format!(
                "too many channels in hello: {}",
                self.channels.len()
            )));
        }
        let mut buf = BytesMut::new();
        wire::put_varint(&mut buf, self.channels.len() as u32);
        for channel in &self.channels {
            wire::put_string(&mut buf, &channel.namespace, MAX_NAMESPACE_LENGTH)?;
            wire::put_string(&mut buf, &channel.version, MAX_STRING_LENGTH)?;
        }
        Ok(buf.freeze())
    }

    pub fn decode(mut data: Bytes) -> Result<Self> {
        if data.is_empty() {
            return Err(ProtocolError::HandshakeError(
                constants::ERR_EMPTY_HANDSHAKE.to_string(),
            ));
        }

        let count = wire::get_varint(&mut data)? as usize;
        if count > MAX_HELLO_CHANNELS {
            return Err(ProtocolError::HandshakeError(format!(
                "too many channels in hello: {count}"
            )));
        }

        let mut channels = Vec::with_capacity(count);
        for _ in 0..count {
            let namespace = wire::get_string(&mut data, MAX_NAMESPACE_LENGTH)?;
            let version = wire::get_string(&mut data, MAX_STRING_LENGTH)?;
            channels.push(ChannelVersion { namespace, version });
        }

        if data.has_remaining() {
            return Err(ProtocolError::HandshakeError(
                constants::ERR_TRAILING_BYTES.to_string(),
            ));
        }
        Ok(Self { channels })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_lists_channels_in_order() {
        let hello = Hello::new()
            .with_channel("alpha", "1")
            .with_channel("beta", "2.0");
        let decoded = Hello::decode(hello.encode().unwrap()).unwrap();
        assert_eq!(decoded, hello);
        assert_eq!(decoded.version_of("beta"), Some("2.0"));
        assert_eq!(decoded.version_of("gamma"), None);
    }

    #[test]
    fn empty_hello_still_has_a_count() {
        let bytes = Hello::new().encode().unwrap();
        assert_eq!(&bytes[..], &[0]);
        assert!(Hello::decode(bytes).unwrap().channels.is_empty());
    }

    #[test]
    fn zero_length_frame_is_rejected() {
        assert!(matches!(
            Hello::decode(Bytes::new()),
            Err(ProtocolError::HandshakeError(_))
        ));
    }

    #[test]
    fn truncated_hello_is_decode_error() {
        let bytes = Hello::new().with_channel("alpha", "1").encode().unwrap();
        let truncated = bytes.slice(..bytes.len() - 1);
        assert!(matches!(
            Hello::decode(truncated),
            Err(ProtocolError::DecodeError(_))
        ));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut buf = BytesMut::from(&Hello::new().encode().unwrap()[..]);
        buf.extend_from_slice(&[0xFF]);
        assert!(Hello::decode(buf.freeze()).is_err());
    }
}
