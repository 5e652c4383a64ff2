//! # Protocol Layer
//!
//! Message model, registration, version negotiation and dispatch.
//!
//! ## Components
//! - **Message**: `Message`, `WireMessage` and `AutoMessage` traits, sides and directions
//! - **Descriptor**: per-type metadata, erased codecs and the layout cache
//! - **Registry**: two-phase registration that freezes into channels
//! - **Channel**: version negotiation, direction checks, outbound encoding
//! - **Dispatcher**: inbound decode and handoff to the execution context
//! - **Handshake**: the `Hello` frame exchanged on connect
//!
//! ## Inbound frame states
//! ```text
//! Received → IdResolved → Decoded → Enqueued → Handled → Done
//!     └──────────┴───────────┴──► Rejected { stage, error }
//! ```

pub mod channel;
pub mod descriptor;
pub mod dispatcher;
pub mod handshake;
pub mod message;
pub mod registry;
