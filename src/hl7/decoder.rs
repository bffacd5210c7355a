//! Frame payload decoder
//!
//! Turns one MLLP frame into:
//! - handshake replies to send back (for `MSH` with trigger code 106)
//! - vital samples (for numeric `OBX` observations on tracked channels)
//!
//! The decoder has no side effects besides logging. A segment that cannot
//! be interpreted is logged, counted and skipped; the rest of the frame is
//! still decoded.

use super::{
    message, segments, Segment, HANDSHAKE_TRIGGER_CODE, HEADER_TAG, HEADER_TRIGGER_FIELD,
    MISSING_VALUE_SENTINEL, NUMERIC_VALUE_TYPE, OBSERVATION_ID_FIELD, OBSERVATION_TAG,
    OBSERVATION_TYPE_FIELD, OBSERVATION_VALUE_FIELD,
};
use crate::config::ChannelsConfig;
use crate::error::DecodeError;
use crate::store::{Channel, SampleValue, VitalSample};
use bytes::Bytes;
use encoding_rs::Encoding;
use tracing::{debug, warn};

/// Exact-match table from OBX identifier (`code^name`) to channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelTable {
    entries: Vec<(String, Channel)>,
}

impl Default for ChannelTable {
    fn default() -> Self {
        Self::from_config(&ChannelsConfig::default())
    }
}

impl ChannelTable {
    pub fn new(entries: Vec<(String, Channel)>) -> Self {
        Self { entries }
    }

    /// Build from the `[channels]` config section (validated beforehand)
    pub fn from_config(config: &ChannelsConfig) -> Self {
        Self::new(
            Channel::ALL
                .iter()
                .map(|&channel| (config.identifier(channel).to_string(), channel))
                .collect(),
        )
    }

    pub fn lookup(&self, identifier: &str) -> Option<Channel> {
        self.entries
            .iter()
            .find(|(id, _)| id == identifier)
            .map(|&(_, channel)| channel)
    }

    /// Full `code^name` identifier of a channel
    pub fn identifier(&self, channel: Channel) -> &str {
        self.entries
            .iter()
            .find(|&&(_, c)| c == channel)
            .map(|(id, _)| id.as_str())
            .unwrap_or("")
    }

    /// Numeric parameter code of a channel (the part before `^`)
    pub fn code(&self, channel: Channel) -> &str {
        let id = self.identifier(channel);
        id.split('^').next().unwrap_or(id)
    }
}

/// Everything one frame produced
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Decoded {
    /// Unframed reply payloads to send to the monitor
    pub replies: Vec<Bytes>,
    /// Samples in the order they appeared
    pub samples: Vec<VitalSample>,
    /// Segments skipped because they could not be interpreted
    pub errors: usize,
}

/// HL7 payload decoder for the monitor's message subset
pub struct Decoder {
    table: ChannelTable,
    encoding: &'static Encoding,
    log_unmatched: bool,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(ChannelTable::default(), encoding_rs::GBK)
    }
}

impl Decoder {
    pub fn new(table: ChannelTable, encoding: &'static Encoding) -> Self {
        Self {
            table,
            encoding,
            log_unmatched: false,
        }
    }

    /// Log OBX identifiers that match no tracked channel
    pub fn with_log_unmatched(mut self, enabled: bool) -> Self {
        self.log_unmatched = enabled;
        self
    }

    pub fn table(&self) -> &ChannelTable {
        &self.table
    }

    /// Decode a frame payload
    pub fn decode(&self, payload: &[u8]) -> Decoded {
        let mut out = Decoded::default();

        for raw in segments(payload) {
            let (text, malformed) = self.encoding.decode_without_bom_handling(raw);
            if malformed {
                debug!("Segment contains bytes invalid in {}", self.encoding.name());
            }

            let segment = Segment::parse(&text);
            if let Err(e) = self.decode_segment(&segment, &mut out) {
                warn!("Skipping segment: {}", e);
                out.errors += 1;
            }
        }

        out
    }

    fn decode_segment(&self, segment: &Segment<'_>, out: &mut Decoded) -> Result<(), DecodeError> {
        match segment.tag() {
            HEADER_TAG => {
                let trigger = segment.require_int(HEADER_TRIGGER_FIELD)?;
                if trigger == HANDSHAKE_TRIGGER_CODE {
                    debug!("Monitor requested handshake");
                    out.replies.push(message::handshake_reply());
                }
            }
            OBSERVATION_TAG => {
                if segment.require(OBSERVATION_TYPE_FIELD)? != NUMERIC_VALUE_TYPE {
                    return Ok(());
                }
                let identifier = segment.require(OBSERVATION_ID_FIELD)?;
                let Some(channel) = self.table.lookup(identifier) else {
                    if self.log_unmatched {
                        debug!("Ignoring untracked observation {:?}", identifier);
                    }
                    return Ok(());
                };

                let raw = observation_value(segment)?;
                let value = if raw == MISSING_VALUE_SENTINEL {
                    SampleValue::Missing
                } else {
                    SampleValue::Value(raw)
                };
                debug!("{} = {:?}", channel, value.as_option());
                out.samples.push(VitalSample::new(channel, value));
            }
            _ => {}
        }
        Ok(())
    }
}

/// Numeric OBX value
///
/// Field 5 normally; when it is empty and field 6 is not, the monitor has
/// shifted the value one slot right.
fn observation_value(segment: &Segment<'_>) -> Result<i64, DecodeError> {
    let primary = segment.require(OBSERVATION_VALUE_FIELD)?;
    if primary.trim().is_empty() {
        let shifted = OBSERVATION_VALUE_FIELD + 1;
        if matches!(segment.field(shifted), Some(f) if !f.trim().is_empty()) {
            return segment.require_int(shifted);
        }
    }
    segment.require_int(OBSERVATION_VALUE_FIELD)
}
