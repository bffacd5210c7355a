//! Configuration management
//!
//! Config is read from a TOML file (default `bedside-link.toml` in the
//! working directory). A missing file means defaults; a malformed or
//! invalid one is fatal at startup.

use crate::constants::{
    DEFAULT_BUFFER_SIZE, DEFAULT_ENCODING, DEFAULT_FEED_REQUEST_DELAY_SECS, DEFAULT_MONITOR_HOST,
    DEFAULT_MONITOR_PORT, DEFAULT_RECONNECT_DELAY_MS, DEFAULT_RECONNECT_MAX_DELAY_MS,
    DEFAULT_RECORD_FLUSH_MS,
};
use crate::error::{MonitorError, Result};
use crate::store::Channel;
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Default config file name
pub const DEFAULT_CONFIG_FILE: &str = "bedside-link.toml";

// =============================================================================
// Application Configuration
// =============================================================================

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub monitor: MonitorConfig,
    pub channels: ChannelsConfig,
    pub buffers: BuffersConfig,
    pub record: RecordConfig,
}

// =============================================================================
// Monitor Connection
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Monitor host name or IP address
    pub host: String,

    /// Monitor TCP port
    pub port: u16,

    /// Text encoding of HL7 fields (WHATWG label, e.g. "gbk")
    pub encoding: String,

    /// First delay after a failed or lost connection
    pub reconnect_delay_ms: u64,

    /// Backoff ceiling between connection attempts
    pub reconnect_max_delay_ms: u64,

    /// Delay between connecting and sending the feed request
    pub feed_request_delay_secs: u64,

    /// Channels requested in the feed request
    pub feed_channels: Vec<Channel>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_MONITOR_HOST.to_string(),
            port: DEFAULT_MONITOR_PORT,
            encoding: DEFAULT_ENCODING.to_string(),
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            reconnect_max_delay_ms: DEFAULT_RECONNECT_MAX_DELAY_MS,
            feed_request_delay_secs: DEFAULT_FEED_REQUEST_DELAY_SECS,
            feed_channels: vec![Channel::HeartRate, Channel::PulseRate],
        }
    }
}

impl MonitorConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }

    pub fn feed_request_delay(&self) -> Duration {
        Duration::from_secs(self.feed_request_delay_secs)
    }

    /// Resolved text encoding (None for an unknown label)
    pub fn text_encoding(&self) -> Option<&'static Encoding> {
        Encoding::for_label(self.encoding.trim().as_bytes())
    }
}

// =============================================================================
// Channel Table
// =============================================================================

/// OBX identifier (`code^name`) of each tracked channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    pub heart_rate: String,
    pub pvc_count: String,
    pub respiration_rate: String,
    pub spo2: String,
    pub pulse_rate: String,

    /// Log observations whose identifier matches no channel
    pub log_unmatched: bool,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            heart_rate: "101^HR".to_string(),
            pvc_count: "102^PVCs".to_string(),
            respiration_rate: "151^RR".to_string(),
            spo2: "160^SpO2".to_string(),
            pulse_rate: "161^PR".to_string(),
            log_unmatched: false,
        }
    }
}

impl ChannelsConfig {
    pub fn identifier(&self, channel: Channel) -> &str {
        match channel {
            Channel::HeartRate => &self.heart_rate,
            Channel::PvcCount => &self.pvc_count,
            Channel::RespirationRate => &self.respiration_rate,
            Channel::Spo2 => &self.spo2,
            Channel::PulseRate => &self.pulse_rate,
        }
    }
}

// =============================================================================
// Buffers and Recording
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuffersConfig {
    /// Samples kept per channel
    pub size: usize,
}

impl Default for BuffersConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_BUFFER_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordConfig {
    /// JSON-lines file to append samples to (unset = no recording)
    pub path: Option<PathBuf>,

    /// Flush interval of the record file
    pub flush_interval_ms: u64,
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            path: None,
            flush_interval_ms: DEFAULT_RECORD_FLUSH_MS,
        }
    }
}

impl RecordConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

// =============================================================================
// Validation
// =============================================================================

impl Config {
    /// Check every value the runtime relies on
    pub fn validate(&self) -> Result<()> {
        let invalid = |field: &'static str, reason: String| -> Result<()> {
            Err(MonitorError::ConfigValidation { field, reason })
        };

        let monitor = &self.monitor;
        if monitor.host.trim().is_empty() {
            return invalid("monitor.host", "must not be empty".into());
        }
        if monitor.port == 0 {
            return invalid("monitor.port", "must not be 0".into());
        }
        if monitor.text_encoding().is_none() {
            return invalid(
                "monitor.encoding",
                format!("unknown encoding label '{}'", monitor.encoding),
            );
        }
        if monitor.reconnect_delay_ms == 0 {
            return invalid("monitor.reconnect_delay_ms", "must be positive".into());
        }
        if monitor.reconnect_max_delay_ms < monitor.reconnect_delay_ms {
            return invalid(
                "monitor.reconnect_max_delay_ms",
                "must not be below reconnect_delay_ms".into(),
            );
        }
        if monitor.feed_channels.is_empty() {
            return invalid("monitor.feed_channels", "must list at least one channel".into());
        }

        if self.buffers.size == 0 {
            return invalid("buffers.size", "must be at least 1".into());
        }

        let mut seen = HashSet::new();
        for channel in Channel::ALL {
            let id = self.channels.identifier(channel);
            if !is_valid_identifier(id) {
                return invalid(
                    "channels",
                    format!("{:?}: '{}' is not of the form <code>^<name>", channel, id),
                );
            }
            if !seen.insert(id) {
                return invalid("channels", format!("identifier '{}' used twice", id));
            }
        }

        Ok(())
    }
}

/// `<digits>^<non-empty name>`
fn is_valid_identifier(id: &str) -> bool {
    match id.split_once('^') {
        Some((code, name)) => {
            !code.is_empty() && code.bytes().all(|b| b.is_ascii_digit()) && !name.is_empty()
        }
        None => false,
    }
}

// =============================================================================
// Loading
// =============================================================================

/// Parse config from TOML text
pub fn parse(content: &str, path: &Path) -> Result<Config> {
    toml::from_str(content).map_err(|e| MonitorError::ConfigParse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Load config from file; a missing file yields defaults
pub fn load(path: &Path) -> Result<Config> {
    if !path.exists() {
        info!("No config at {}, using defaults", path.display());
        return Ok(Config::default());
    }

    let content = fs::read_to_string(path).map_err(|e| MonitorError::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse(&content, path)
}

// ============================================================================
// Tests
// ============================================================================
