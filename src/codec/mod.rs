//! Codec abstraction for message framing
//!
//! Separates framing concerns from transport:
//! - **Codec**: How messages are delimited on the wire (MLLP block framing)
//! - **Transport**: How bytes flow (TCP)
//!
//! # Adding a new codec
//!
//! 1. Create `codec/my_codec.rs`
//! 2. Implement the `Codec` trait
//! 3. Add `pub mod my_codec;` here
//! 4. No other changes needed

pub mod mllp;

pub use mllp::MllpCodec;

use bytes::Bytes;

/// Complete message payload, framing markers stripped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub payload: Bytes,
}

impl Frame {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }
}

/// Codec trait for encoding/decoding messages
///
/// A codec transforms raw bytes into frames (decode)
/// and payloads into bytes for transmission (encode).
pub trait Codec: Send {
    /// Decode incoming bytes
    ///
    /// Calls `on_frame` for each complete frame detected.
    /// May buffer partial data internally.
    fn decode(&mut self, data: &[u8], on_frame: impl FnMut(Frame));

    /// Encode a payload for transmission
    ///
    /// Writes encoded bytes to `output`.
    fn encode(&self, payload: &[u8], output: &mut Vec<u8>);

    /// Forget any partially received frame
    ///
    /// Called when the underlying connection is replaced.
    fn reset(&mut self);
}
