//! Connection driver for byte streams.
//!
//! `run_connection` owns one connection: it frames the stream with
//! `FrameCodec`, exchanges `Hello` frames, then forwards queued envelopes out
//! and inbound envelopes to the `Endpoint` until either side stops. Any error
//! from the endpoint closes this connection only.

use crate::config::ChannelConfig;
use crate::core::frame::{FrameCodec, MAX_NAMESPACE_LENGTH};
use crate::core::wire::MAX_VARINT_LEN;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::handshake::Hello;
use crate::protocol::message::PeerId;
use crate::transport::Endpoint;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, info, instrument, trace, warn};

/// Per-connection limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionLimits {
    /// Largest channel frame a peer may send
    pub max_frame_size: usize,
    /// Time allowed for the peer's hello
    pub handshake_timeout: Duration,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self::from(&ChannelConfig::default())
    }
}

impl From<&ChannelConfig> for ConnectionLimits {
    fn from(config: &ChannelConfig) -> Self {
        Self {
            max_frame_size: config.max_frame_size,
            handshake_timeout: config.handshake_timeout,
        }
    }
}

impl ConnectionLimits {
    /// Stream codec sized for an envelope around a maximal channel frame
    pub fn codec(&self) -> FrameCodec {
        FrameCodec::new(self.max_frame_size + MAX_NAMESPACE_LENGTH * 4 + MAX_VARINT_LEN)
    }
}

type FramedIo<T> = Framed<T, FrameCodec>;

/// Drive one connection to completion.
///
/// `outbound` is the peer's queue from `Outbox::register_peer`. The endpoint's
/// `disconnect` runs however the connection ends.
#[instrument(skip_all, fields(%peer))]
pub async fn run_connection<T, E>(
    io: T,
    endpoint: Arc<E>,
    peer: PeerId,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    limits: ConnectionLimits,
) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
    E: Endpoint + ?Sized,
{
    let mut framed = Framed::new(io, limits.codec());

    let result = match handshake(&mut framed, endpoint.as_ref(), peer, &limits).await {
        Ok(()) => serve(&mut framed, endpoint.as_ref(), peer, &mut outbound).await,
        Err(e) => Err(e),
    };

    endpoint.disconnect(peer);
    match &result {
        Ok(()) => info!("Connection closed"),
        Err(e) => warn!(error = %e, "Connection closed with error"),
    }
    result
}

async fn handshake<T, E>(
    framed: &mut FramedIo<T>,
    endpoint: &E,
    peer: PeerId,
    limits: &ConnectionLimits,
) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
    E: Endpoint + ?Sized,
{
    framed.send(endpoint.hello().encode()?).await?;

    let frame = match tokio::time::timeout(limits.handshake_timeout, framed.next()).await {
        Err(_) => {
            return Err(ProtocolError::HandshakeError(
                constants::ERR_HANDSHAKE_TIMEOUT.to_string(),
            ))
        }
        Ok(None) => return Err(ProtocolError::ConnectionClosed),
        Ok(Some(frame)) => frame?,
    };

    let hello = Hello::decode(frame)?;
    endpoint.accept_hello(peer, &hello)?;
    debug!(channels = hello.channels.len(), "Handshake complete");
    Ok(())
}

async fn serve<T, E>(
    framed: &mut FramedIo<T>,
    endpoint: &E,
    peer: PeerId,
    outbound: &mut mpsc::UnboundedReceiver<Bytes>,
) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
    E: Endpoint + ?Sized,
{
    loop {
        tokio::select! {
            queued = outbound.recv() => match queued {
                Some(envelope) => {
                    trace!(bytes = envelope.len(), "Writing envelope");
                    framed.send(envelope).await?;
                }
                None => {
                    debug!("Outbound queue closed");
                    return Ok(());
                }
            },
            inbound = framed.next() => match inbound {
                Some(envelope) => endpoint.on_bytes_received(peer, envelope?)?,
                None => return Ok(()),
            },
        }
    }
}
