use crate::core::codec::CodecRegistry;
use crate::core::wire::{self, FrameReader};
use crate::error::{constants, ProtocolError};
use crate::protocol::descriptor::DescriptorTable;
use crate::protocol::message::{HandlerContext, PeerId, Side};
use crate::service::executor::{ExecutionContext, Task};
use crate::utils::metrics::Metrics;
use bytes::{Buf, Bytes};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, trace, warn};

/// Progress of one inbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Received,
    IdResolved,
    Decoded,
    Enqueued,
    Handled,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Received => "received",
            Stage::IdResolved => "id-resolved",
            Stage::Decoded => "decoded",
            Stage::Enqueued => "enqueued",
            Stage::Handled => "handled",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// A frame that was decoded and handed to the execution context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatched {
    pub id: u32,
    pub name: &'static str,
}

/// A frame that failed; `stage` is the last stage it reached.
#[derive(Debug, Error)]
#[error("frame rejected after stage {stage}: {error}")]
pub struct Rejected {
    pub stage: Stage,
    #[source]
    pub error: ProtocolError,
}

impl From<Rejected> for ProtocolError {
    fn from(rejected: Rejected) -> Self {
        rejected.error
    }
}

/// Decodes inbound frames of one channel and enqueues their handlers.
///
/// The dispatcher holds only immutable shared state, so any number of I/O
/// threads may call `dispatch` at once.
#[derive(Clone)]
pub struct Dispatcher {
    namespace: Arc<str>,
    side: Side,
    table: Arc<DescriptorTable>,
    codecs: Arc<CodecRegistry>,
    metrics: Arc<Metrics>,
}

impl Dispatcher {
    pub fn new(
        namespace: Arc<str>,
        side: Side,
        table: Arc<DescriptorTable>,
        codecs: Arc<CodecRegistry>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            namespace,
            side,
            table,
            codecs,
            metrics,
        }
    }

    fn reject(&self, peer: PeerId, stage: Stage, error: ProtocolError) -> Rejected {
        match &error {
            ProtocolError::UnknownMessageType { .. } => self.metrics.unknown_type(),
            ProtocolError::DirectionViolation { .. } => self.metrics.direction_violation(),
            ProtocolError::DecodeError(_) => self.metrics.decode_error(),
            _ => {}
        }
        warn!(
            namespace = %self.namespace,
            %peer,
            %stage,
            error = %error,
            "Rejected inbound frame"
        );
        Rejected { stage, error }
    }

    /// Decode `frame` and enqueue its handler on `executor`.
    ///
    /// The handler runs at most once, later, on the executor's thread. A
    /// frame that fails any step never reaches handler code.
    pub fn dispatch(
        &self,
        peer: PeerId,
        mut frame: Bytes,
        executor: &dyn ExecutionContext,
    ) -> Result<Dispatched, Rejected> {
        self.metrics.frame_received(frame.len() as u64);
        trace!(namespace = %self.namespace, %peer, bytes = frame.len(), stage = %Stage::Received, "Frame received");

        let id = wire::get_varint(&mut frame).map_err(|e| self.reject(peer, Stage::Received, e))?;
        let descriptor = self.table.get(id).ok_or_else(|| {
            self.reject(
                peer,
                Stage::Received,
                ProtocolError::UnknownMessageType {
                    namespace: self.namespace.to_string(),
                    id,
                },
            )
        })?;
        let name = descriptor.name();
        trace!(namespace = %self.namespace, id, message = name, stage = %Stage::IdResolved, "Message id resolved");

        if !descriptor.direction().allows(self.side.inbound_flow()) {
            return Err(self.reject(
                peer,
                Stage::IdResolved,
                ProtocolError::DirectionViolation {
                    message: name.to_string(),
                    direction: descriptor.direction(),
                    side: self.side,
                },
            ));
        }

        let message = {
            let mut reader = FrameReader::new(&mut frame, &self.codecs);
            descriptor.decode(&mut reader)
        }
        .map_err(|e| self.reject(peer, Stage::IdResolved, e))?;

        if frame.has_remaining() {
            return Err(self.reject(
                peer,
                Stage::IdResolved,
                ProtocolError::DecodeError(format!(
                    "{} ({} bytes after {name})",
                    constants::ERR_TRAILING_BYTES,
                    frame.remaining()
                )),
            ));
        }
        trace!(namespace = %self.namespace, id, message = name, stage = %Stage::Decoded, "Message decoded");

        let handler = descriptor.handler();
        let ctx = HandlerContext::new(Arc::clone(&self.namespace), peer, self.side, id);
        let metrics = Arc::clone(&self.metrics);
        let task: Task = Box::new(move || {
            trace!(namespace = ctx.namespace(), id, message = name, stage = %Stage::Handled, "Invoking handler");
            match panic::catch_unwind(AssertUnwindSafe(|| handler(message, &ctx))) {
                Ok(()) => {
                    metrics.handler_invoked();
                    trace!(namespace = ctx.namespace(), id, message = name, stage = %Stage::Done, "Handler finished");
                }
                Err(_) => {
                    metrics.handler_panicked();
                    error!(
                        namespace = ctx.namespace(),
                        sender = %ctx.sender(),
                        message = name,
                        "Message handler panicked"
                    );
                }
            }
        });

        executor
            .enqueue(task)
            .map_err(|e| self.reject(peer, Stage::Decoded, e))?;
        debug!(namespace = %self.namespace, %peer, id, message = name, stage = %Stage::Enqueued, "Handler enqueued");

        Ok(Dispatched { id, name })
    }

    pub fn side(&self) -> Side {
        self.side
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("namespace", &self.namespace)
            .field("side", &self.side)
            .field("messages", &self.table.len())
            .finish()
    }
}
