//! Centralized error types
//!
//! Startup and I/O errors are represented by the `MonitorError` enum.
//! Use `Result<T>` as shorthand for `std::result::Result<T, MonitorError>`.
//!
//! Segment-level decode failures use `DecodeError`; they are logged and
//! counted by the decoder and never leave it.

use std::fmt;
use std::path::PathBuf;

/// All monitor link errors
#[derive(Debug)]
pub enum MonitorError {
    // === Network ===
    /// Failed to connect to the monitor
    Connect {
        addr: String,
        source: std::io::Error,
    },

    // === Configuration ===
    /// Failed to read the config file
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Config file is not valid TOML for our schema
    ConfigParse { path: PathBuf, reason: String },
    /// Invalid config value
    ConfigValidation { field: &'static str, reason: String },

    // === IO ===
    /// File system operation failed
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    // === Runtime ===
    /// Tokio runtime creation failed
    Runtime { source: std::io::Error },
}

impl std::error::Error for MonitorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Connect { source, .. }
            | Self::ConfigRead { source, .. }
            | Self::Io { source, .. }
            | Self::Runtime { source } => Some(source),
            _ => None,
        }
    }
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect { addr, source } => {
                write!(f, "Cannot connect to monitor {}: {}", addr, source)
            }
            Self::ConfigRead { path, .. } => {
                write!(f, "Cannot read config file: {}", path.display())
            }
            Self::ConfigParse { path, reason } => {
                write!(f, "Invalid config file {}: {}", path.display(), reason)
            }
            Self::ConfigValidation { field, reason } => {
                write!(f, "Invalid {}: {}", field, reason)
            }
            Self::Io { path, .. } => write!(f, "IO error: {}", path.display()),
            Self::Runtime { .. } => write!(f, "Failed to create runtime"),
        }
    }
}

impl MonitorError {
    /// True when the peer actively refused the connection (monitor offline)
    pub fn is_refused(&self) -> bool {
        matches!(
            self,
            Self::Connect { source, .. } if source.kind() == std::io::ErrorKind::ConnectionRefused
        )
    }
}

/// Alias for Result with MonitorError
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Failure to interpret a single HL7 segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Segment has fewer fields than the index we need
    MissingField { segment: String, index: usize },
    /// Field should hold an integer but does not
    InvalidNumber {
        segment: String,
        index: usize,
        value: String,
    },
}

impl std::error::Error for DecodeError {}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField { segment, index } => {
                write!(f, "{} segment has no field {}", segment, index)
            }
            Self::InvalidNumber {
                segment,
                index,
                value,
            } => write!(
                f,
                "{} field {} is not an integer: {:?}",
                segment, index, value
            ),
        }
    }
}
