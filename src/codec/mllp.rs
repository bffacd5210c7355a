//! MLLP block framing
//!
//! The monitor wraps every HL7 message as:
//!
//! ```text
//! 0x0B <payload> 0x1C 0x0D
//! ```
//!
//! The extractor scans byte by byte and keeps only the in-progress frame:
//! - a start byte always restarts the accumulator (an unterminated frame is dropped)
//! - `0x1C 0x0D` inside a frame completes it
//! - bytes seen outside a frame are discarded
//!
//! This makes the stream self-resynchronizing after corruption or a
//! reconnect in the middle of a message.

use super::{Codec, Frame};
use crate::constants::MAX_FRAME_SIZE;
use bytes::Bytes;
use tracing::debug;

/// Start of block
pub const START_BLOCK: u8 = 0x0B;
/// End of block, first byte of the end sequence
pub const END_BLOCK: u8 = 0x1C;
/// Carriage return, second byte of the end sequence
pub const CARRIAGE_RETURN: u8 = 0x0D;

/// Frame extractor and encoder for MLLP
pub struct MllpCodec {
    /// In-progress frame, including its leading start byte.
    /// Empty while waiting for a start byte.
    buffer: Vec<u8>,
    /// Maximum accumulated size before the frame is abandoned
    max_frame_size: usize,
}

impl Default for MllpCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl MllpCodec {
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(1024),
            max_frame_size,
        }
    }

    /// Feed a chunk and return the frames it completes, in stream order
    pub fn feed(&mut self, data: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        self.decode(data, |frame| frames.push(frame));
        frames
    }

    /// True while a frame is being accumulated
    pub fn in_frame(&self) -> bool {
        !self.buffer.is_empty()
    }
}

impl Codec for MllpCodec {
    fn decode(&mut self, data: &[u8], mut on_frame: impl FnMut(Frame)) {
        for &byte in data {
            if byte == START_BLOCK {
                if self.buffer.len() > 1 {
                    debug!(
                        "Discarding unterminated frame ({} bytes)",
                        self.buffer.len() - 1
                    );
                }
                self.buffer.clear();
                self.buffer.push(byte);
                continue;
            }

            if self.buffer.is_empty() {
                continue;
            }

            if byte == CARRIAGE_RETURN && self.buffer.last() == Some(&END_BLOCK) {
                // Strip the start byte and the END_BLOCK already accumulated
                let end = self.buffer.len() - 1;
                on_frame(Frame::new(Bytes::copy_from_slice(&self.buffer[1..end])));
                self.buffer.clear();
                continue;
            }

            self.buffer.push(byte);

            if self.buffer.len() > self.max_frame_size {
                debug!(
                    "Frame exceeds {} bytes without end marker, resyncing",
                    self.max_frame_size
                );
                self.buffer.clear();
            }
        }
    }

    fn encode(&self, payload: &[u8], output: &mut Vec<u8>) {
        output.reserve(payload.len() + 3);
        output.push(START_BLOCK);
        output.extend_from_slice(payload);
        output.push(END_BLOCK);
        output.push(CARRIAGE_RETURN);
    }

    fn reset(&mut self) {
        self.buffer.clear();
    }
}
