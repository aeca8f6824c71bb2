//! Wire codec
//!
//! Frames are one opcode byte followed by the bincode encoding of the
//! variant's payload. Payloads use varint integers, reject trailing bytes and
//! are capped so every frame fits in a single UDP datagram.

pub mod decoder;
pub mod encoder;

pub use decoder::decode;
pub use encoder::encode;

use bincode::Options;

use crate::constants::MAX_DATAGRAM_SIZE;

/// Serialization options shared by both directions of the codec
pub(crate) fn wire_options() -> impl Options {
    bincode::DefaultOptions::new().with_limit((MAX_DATAGRAM_SIZE - 1) as u64)
}
