//! HL7 v2 subset used by the monitor
//!
//! Only what the monitor actually sends or expects is modeled:
//! - `MSH` header (trigger code at field 9)
//! - `OBX` observations (value type at 2, channel at 3, value at 5)
//! - outbound `QRY^R02` handshake and feed request (see `message`)
//!
//! A frame payload is a list of segments separated by `\r`; each segment
//! is a list of fields separated by `|`. Field 0 is the segment tag.

pub mod decoder;
pub mod message;

pub use decoder::{ChannelTable, Decoded, Decoder};

use crate::error::DecodeError;

/// Separates segments inside a frame payload
pub const SEGMENT_SEPARATOR: u8 = b'\r';
/// Separates fields inside a segment
pub const FIELD_SEPARATOR: char = '|';

/// Header segment tag
pub const HEADER_TAG: &str = "MSH";
/// Observation segment tag
pub const OBSERVATION_TAG: &str = "OBX";

/// MSH field carrying the trigger/event code
pub const HEADER_TRIGGER_FIELD: usize = 9;
/// Trigger code by which the monitor asks for a handshake reply
pub const HANDSHAKE_TRIGGER_CODE: i64 = 106;

/// OBX field carrying the value type
pub const OBSERVATION_TYPE_FIELD: usize = 2;
/// OBX field carrying the `code^name` channel identifier
pub const OBSERVATION_ID_FIELD: usize = 3;
/// OBX field carrying the value
pub const OBSERVATION_VALUE_FIELD: usize = 5;
/// Value type of numeric observations
pub const NUMERIC_VALUE_TYPE: &str = "NM";
/// Raw value the monitor sends when it has no reading
pub const MISSING_VALUE_SENTINEL: i64 = -100;

/// Split a frame payload into raw segments, skipping empty ones
pub fn segments(payload: &[u8]) -> impl Iterator<Item = &[u8]> {
    payload
        .split(|&b| b == SEGMENT_SEPARATOR)
        .filter(|s| !s.is_empty())
}

/// One decoded segment, borrowing its text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment<'a> {
    fields: Vec<&'a str>,
}

impl<'a> Segment<'a> {
    pub fn parse(text: &'a str) -> Self {
        Self {
            fields: text.split(FIELD_SEPARATOR).collect(),
        }
    }

    /// Segment type tag (field 0)
    pub fn tag(&self) -> &'a str {
        self.fields.first().copied().unwrap_or("")
    }

    /// Field at `index`; `Some("")` for an empty field, `None` when absent
    pub fn field(&self, index: usize) -> Option<&'a str> {
        self.fields.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Field at `index`, or a decode error naming the segment
    pub fn require(&self, index: usize) -> Result<&'a str, DecodeError> {
        self.field(index).ok_or_else(|| DecodeError::MissingField {
            segment: self.tag().to_string(),
            index,
        })
    }

    /// Integer field at `index` (surrounding whitespace ignored)
    pub fn require_int(&self, index: usize) -> Result<i64, DecodeError> {
        let raw = self.require(index)?;
        raw.trim()
            .parse::<i64>()
            .map_err(|_| DecodeError::InvalidNumber {
                segment: self.tag().to_string(),
                index,
                value: raw.to_string(),
            })
    }
}
