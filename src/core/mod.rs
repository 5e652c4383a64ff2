//! # Core Codec Components
//!
//! Field model, codec registry, wire primitives and framing.
//!
//! ## Components
//! - **Field**: semantic field types, values and per-type field layouts
//! - **Codec**: the registry mapping a field type to its encode/decode pair
//! - **Wire**: VarInt and primitive readers/writers, `FrameWriter`/`FrameReader`
//! - **Frame**: length framing for streams and the channel envelope
//! - **Serialization**: serde-backed extension codecs
//!
//! ## Message frame
//! ```text
//! [VarInt message id] [field 1] [field 2] ... [field n]
//! ```
//!
//! ## Security
//! - Every read is bounds-checked; truncation is a decode error, never a panic
//! - Strings, byte arrays and frames have configurable upper bounds

pub mod codec;
pub mod field;
pub mod frame;
pub mod serialization;
pub mod wire;
