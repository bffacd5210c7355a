//! Rolling vital-sign buffers
//!
//! One fixed-capacity circular buffer per tracked channel. Buffers are
//! created pre-filled with `SampleValue::Missing` and keep their length for
//! the lifetime of the store: every update evicts the oldest entry.
//!
//! The store is owned by the session task; nothing else mutates it.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Tracked vital-sign channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    HeartRate,
    PvcCount,
    RespirationRate,
    Spo2,
    PulseRate,
}

impl Channel {
    /// All channels, in buffer order
    pub const ALL: [Channel; 5] = [
        Channel::HeartRate,
        Channel::PvcCount,
        Channel::RespirationRate,
        Channel::Spo2,
        Channel::PulseRate,
    ];

    #[inline]
    fn index(self) -> usize {
        match self {
            Channel::HeartRate => 0,
            Channel::PvcCount => 1,
            Channel::RespirationRate => 2,
            Channel::Spo2 => 3,
            Channel::PulseRate => 4,
        }
    }

    /// Short label used in logs
    pub fn label(self) -> &'static str {
        match self {
            Channel::HeartRate => "HR",
            Channel::PvcCount => "PVCs",
            Channel::RespirationRate => "RR",
            Channel::Spo2 => "SpO2",
            Channel::PulseRate => "PR",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A single reading; `Missing` when the monitor reports no value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "Option<i64>", from = "Option<i64>")]
pub enum SampleValue {
    #[default]
    Missing,
    Value(i64),
}

impl SampleValue {
    pub fn as_option(self) -> Option<i64> {
        match self {
            SampleValue::Missing => None,
            SampleValue::Value(v) => Some(v),
        }
    }

    pub fn is_missing(self) -> bool {
        self == SampleValue::Missing
    }
}

impl From<SampleValue> for Option<i64> {
    fn from(value: SampleValue) -> Self {
        value.as_option()
    }
}

impl From<Option<i64>> for SampleValue {
    fn from(value: Option<i64>) -> Self {
        value.map_or(SampleValue::Missing, SampleValue::Value)
    }
}

/// Decoded reading for one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VitalSample {
    pub channel: Channel,
    pub value: SampleValue,
}

impl VitalSample {
    pub fn new(channel: Channel, value: SampleValue) -> Self {
        Self { channel, value }
    }
}

/// Fixed-length FIFO of the most recent samples
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircularBuffer {
    samples: VecDeque<SampleValue>,
}

impl CircularBuffer {
    /// Create a buffer of `capacity` entries, all `Missing`
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: std::iter::repeat(SampleValue::Missing)
                .take(capacity)
                .collect(),
        }
    }

    /// Evict the oldest entry and append `value`
    pub fn push(&mut self, value: SampleValue) {
        // Zero-capacity buffers stay empty
        if self.samples.pop_front().is_some() {
            self.samples.push_back(value);
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Most recent sample
    pub fn latest(&self) -> Option<SampleValue> {
        self.samples.back().copied()
    }

    /// Oldest to newest copy of the buffer
    pub fn snapshot(&self) -> Vec<SampleValue> {
        self.samples.iter().copied().collect()
    }
}

/// Buffers for every tracked channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleStore {
    buffers: [CircularBuffer; 5],
    capacity: usize,
}

impl SampleStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffers: std::array::from_fn(|_| CircularBuffer::new(capacity)),
            capacity,
        }
    }

    /// Samples kept per channel
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn update(&mut self, channel: Channel, value: SampleValue) {
        self.buffers[channel.index()].push(value);
    }

    pub fn buffer(&self, channel: Channel) -> &CircularBuffer {
        &self.buffers[channel.index()]
    }

    pub fn snapshot(&self, channel: Channel) -> Vec<SampleValue> {
        self.buffer(channel).snapshot()
    }
}
