#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Boundary conditions for framing, handshake and hostile input.

use bytes::{Bytes, BytesMut};
use packet_channel::core::field::FieldSpec;
use packet_channel::core::frame::{Envelope, FrameCodec, MAX_NAMESPACE_LENGTH};
use packet_channel::core::wire;
use packet_channel::fields;
use packet_channel::prelude::*;
use packet_channel::protocol::dispatcher::Stage;
use packet_channel::protocol::handshake::{Hello, MAX_HELLO_CHANNELS};
use std::sync::Arc;
use tokio_util::codec::{Decoder, Encoder};

#[derive(Debug, Default, Clone, PartialEq)]
struct Toggle {
    on: bool,
    label: String,
}

impl Message for Toggle {
    const NAME: &'static str = "Toggle";
    const DIRECTION: Direction = Direction::Bidirectional;
}

impl AutoMessage for Toggle {
    fn fields() -> Vec<FieldSpec<Self>> {
        fields!(Toggle { on: bool, label: String })
    }
}

fn toggle_channel(side: Side, config: &NetworkConfig) -> Channel {
    let mut registry = MessageTypeRegistry::with_config(side, config);
    registry.register_auto::<Toggle, _>("edge", |_, _| {}).unwrap();
    registry.freeze("edge").unwrap()
}

fn negotiated_server() -> Channel {
    let channel = toggle_channel(Side::Server, &NetworkConfig::default());
    channel.accept_hello(PeerId(1), &channel.hello()).unwrap();
    channel
}

// ============================================================================
// VARINT
// ============================================================================

#[test]
fn test_varint_boundaries() {
    for (value, len) in [(0u32, 1), (127, 1), (128, 2), (16_383, 2), (16_384, 3), (u32::MAX, 5)] {
        let mut buf = BytesMut::new();
        wire::put_varint(&mut buf, value);
        assert_eq!(buf.len(), len, "value {value}");
        assert_eq!(wire::varint_len(value), len);
        assert_eq!(wire::get_varint(&mut buf.freeze()).unwrap(), value);
    }
}

#[test]
fn test_varint_longer_than_five_bytes_rejected() {
    let mut data = Bytes::from_static(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x01]);
    assert!(matches!(
        wire::get_varint(&mut data),
        Err(ProtocolError::DecodeError(_))
    ));

    // Fifth byte may only carry the top four bits
    let mut data = Bytes::from_static(&[0xFF, 0xFF, 0xFF, 0xFF, 0x1F]);
    assert!(wire::get_varint(&mut data).is_err());
}

#[test]
fn test_peek_varint_waits_for_more_bytes() {
    assert_eq!(wire::peek_varint(&[]).unwrap(), None);
    assert_eq!(wire::peek_varint(&[0x80, 0x80]).unwrap(), None);
    assert_eq!(wire::peek_varint(&[0x80, 0x01, 0xAA]).unwrap(), Some((128, 2)));
}

// ============================================================================
// STREAM FRAMING
// ============================================================================

#[test]
fn test_frame_codec_waits_for_partial_frames() {
    let mut codec = FrameCodec::new(1024);
    let mut buf = BytesMut::new();
    codec.encode(Bytes::from_static(b"hello"), &mut buf).unwrap();

    let mut partial = buf.split_to(3);
    assert_eq!(codec.decode(&mut partial).unwrap(), None);
    partial.unsplit(buf);
    assert_eq!(codec.decode(&mut partial).unwrap().unwrap(), Bytes::from_static(b"hello"));
    assert!(partial.is_empty());
}

#[test]
fn test_frame_codec_rejects_oversized_prefix_before_buffering() {
    let mut codec = FrameCodec::new(64);
    let mut buf = BytesMut::new();
    wire::put_varint(&mut buf, 1 << 30);

    assert!(matches!(
        codec.decode(&mut buf),
        Err(ProtocolError::OversizedFrame(len)) if len == 1 << 30
    ));
    assert!(buf.capacity() < 1024, "decoder reserved space for a hostile length");

    let mut out = BytesMut::new();
    assert!(matches!(
        codec.encode(Bytes::from(vec![0u8; 65]), &mut out),
        Err(ProtocolError::OversizedFrame(65))
    ));
}

#[test]
fn test_empty_frame_is_a_frame() {
    let mut codec = FrameCodec::default();
    let mut buf = BytesMut::new();
    codec.encode(Bytes::new(), &mut buf).unwrap();
    assert_eq!(&buf[..], &[0x00]);
    assert_eq!(codec.decode(&mut buf).unwrap(), Some(Bytes::new()));
}

// ============================================================================
// ENVELOPE AND HELLO
// ============================================================================

#[test]
fn test_envelope_layout() {
    let envelope = Envelope::new("ns", Bytes::from_static(&[0x01, 0x01]));
    let bytes = envelope.to_bytes().unwrap();
    assert_eq!(&bytes[..], &[0x02, b'n', b's', 0x01, 0x01]);
    assert_eq!(Envelope::from_bytes(bytes).unwrap(), envelope);
}

#[test]
fn test_envelope_namespace_limits() {
    let long = "n".repeat(MAX_NAMESPACE_LENGTH + 1);
    assert!(Envelope::new(long, Bytes::new()).to_bytes().is_err());

    // Length prefix pointing past the end
    assert!(matches!(
        Envelope::from_bytes(Bytes::from_static(&[0x05, b'a'])),
        Err(ProtocolError::DecodeError(_))
    ));
}

#[test]
fn test_hello_rejects_malformed_frames() {
    assert!(matches!(
        Hello::decode(Bytes::new()),
        Err(ProtocolError::HandshakeError(_))
    ));

    let mut trailing = BytesMut::from(&Hello::new().with_channel("a", "1").encode().unwrap()[..]);
    trailing.extend_from_slice(&[0x00]);
    assert!(matches!(
        Hello::decode(trailing.freeze()),
        Err(ProtocolError::HandshakeError(_))
    ));

    let mut huge = BytesMut::new();
    wire::put_varint(&mut huge, (MAX_HELLO_CHANNELS + 1) as u32);
    assert!(Hello::decode(huge.freeze()).is_err());

    // Count says two channels, only one present
    let mut short = BytesMut::new();
    wire::put_varint(&mut short, 2);
    wire::put_string(&mut short, "a", 16).unwrap();
    wire::put_string(&mut short, "1", 16).unwrap();
    assert!(matches!(
        Hello::decode(short.freeze()),
        Err(ProtocolError::DecodeError(_))
    ));
}

#[test]
fn test_empty_hello_is_valid_but_negotiates_nothing() {
    let hello = Hello::decode(Hello::new().encode().unwrap()).unwrap();
    assert!(hello.channels.is_empty());

    let channel = toggle_channel(Side::Client, &NetworkConfig::default());
    assert!(matches!(
        channel.accept_hello(PeerId::SERVER, &hello),
        Err(ProtocolError::ProtocolVersionMismatch { ref remote, .. }) if remote == "<absent>"
    ));
    assert!(!channel.is_negotiated(PeerId::SERVER).unwrap());
}

#[test]
fn test_partial_version_match_negotiates_no_channel() {
    let (queue, _runner) = WorkQueue::new();
    let mut network = NetworkManager::new(
        Side::Server,
        &NetworkConfig::default(),
        Arc::new(Outbox::new()),
        Arc::new(queue),
    );
    for namespace in ["a", "b", "c"] {
        network.open(namespace, "1").unwrap();
    }
    network.register_channels().unwrap();

    let peer = PeerId(9);
    let hello = Hello::new()
        .with_channel("a", "1")
        .with_channel("b", "2")
        .with_channel("c", "1");
    assert!(matches!(
        network.accept_hello(peer, &hello),
        Err(ProtocolError::ProtocolVersionMismatch { ref namespace, .. }) if namespace == "b"
    ));
    for channel in network.channels() {
        assert!(!channel.is_negotiated(peer).unwrap(), "{} kept the peer", channel.namespace());
    }

    // Frames on the channel that matched are still refused
    let (queue, mut runner) = WorkQueue::new();
    let rejected = network
        .channel("a")
        .unwrap()
        .receive_with(peer, Bytes::from_static(&[0x00]), &queue)
        .unwrap_err();
    assert!(matches!(rejected.error, ProtocolError::HandshakeRequired(_)));
    assert_eq!(runner.run_pending(), 0);

    // A full match afterwards succeeds everywhere
    network.accept_hello(peer, &network.hello()).unwrap();
    assert!(network.channels().all(|c| c.is_negotiated(peer).unwrap()));
}

// ============================================================================
// HOSTILE FRAMES
// ============================================================================

#[test]
fn test_bool_must_be_zero_or_one() {
    let server = negotiated_server();
    let (queue, mut runner) = WorkQueue::new();

    let rejected = server
        .receive_with(PeerId(1), Bytes::from_static(&[0x00, 0x02, 0x00]), &queue)
        .unwrap_err();
    assert_eq!(rejected.stage, Stage::IdResolved);
    assert!(matches!(rejected.error, ProtocolError::DecodeError(_)));
    assert_eq!(runner.run_pending(), 0);
}

#[test]
fn test_string_length_prefix_is_bounded() {
    let config = NetworkConfig::default_with_overrides(|c| c.codec.max_string_length = 4);
    let server = toggle_channel(Side::Server, &config);
    server.accept_hello(PeerId(1), &server.hello()).unwrap();
    let (queue, _runner) = WorkQueue::new();

    let mut frame = BytesMut::from(&[0x00, 0x01][..]);
    wire::put_varint(&mut frame, 1 << 20);
    let rejected = server.receive_with(PeerId(1), frame.freeze(), &queue).unwrap_err();
    assert!(matches!(rejected.error, ProtocolError::DecodeError(_)));

    let mut frame = BytesMut::from(&[0x00, 0x01][..]);
    wire::put_string(&mut frame, "abcde", 5).unwrap();
    assert!(server.receive_with(PeerId(1), frame.freeze(), &queue).is_err());
}

#[test]
fn test_invalid_utf8_rejected() {
    let server = negotiated_server();
    let (queue, _runner) = WorkQueue::new();
    let rejected = server
        .receive_with(PeerId(1), Bytes::from_static(&[0x00, 0x01, 0x02, 0xC3, 0x28]), &queue)
        .unwrap_err();
    assert!(matches!(rejected.error, ProtocolError::DecodeError(_)));
}

#[test]
fn test_empty_frame_rejected_at_received() {
    let server = negotiated_server();
    let (queue, _runner) = WorkQueue::new();
    let rejected = server.receive_with(PeerId(1), Bytes::new(), &queue).unwrap_err();
    assert_eq!(rejected.stage, Stage::Received);
    assert!(rejected.error.is_connection_fatal());
}

#[test]
fn test_oversized_outbound_frame() {
    let config = NetworkConfig::default_with_overrides(|c| c.channel.max_frame_size = 64);
    let client = toggle_channel(Side::Client, &config);
    let message = Toggle {
        on: true,
        label: "x".repeat(100),
    };
    assert!(matches!(
        client.encode_frame(&PeerSelector::Server, &message),
        Err(ProtocolError::OversizedFrame(_))
    ));
}

#[test]
fn test_unknown_namespace_in_envelope() {
    let (queue, _runner) = WorkQueue::new();
    let mut network = NetworkManager::new(
        Side::Server,
        &NetworkConfig::default(),
        Arc::new(Outbox::new()),
        Arc::new(queue),
    );
    network.add_auto::<Toggle, _>("edge", |_, _| {}).unwrap();
    network.register_channels().unwrap();

    let envelope = Envelope::new("elsewhere", Bytes::from_static(&[0x00])).to_bytes().unwrap();
    assert!(matches!(
        network.on_bytes_received(PeerId(1), envelope),
        Err(ProtocolError::NoSuchChannel(ref ns)) if ns == "elsewhere"
    ));
    assert!(matches!(
        network.channel("elsewhere"),
        Err(ProtocolError::NoSuchChannel(_))
    ));
}

#[test]
fn test_error_classification() {
    assert!(ProtocolError::RegistryFrozen("x".into()).is_setup_error());
    assert!(!ProtocolError::RegistryFrozen("x".into()).is_connection_fatal());
    assert!(ProtocolError::DecodeError("x".into()).is_connection_fatal());
    assert!(ProtocolError::UnknownMessageType {
        namespace: "x".into(),
        id: 3
    }
    .is_connection_fatal());
    assert!(!ProtocolError::ExecutorClosed.is_setup_error());
}
