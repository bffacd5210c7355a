//! Application-wide constants
//!
//! Centralized constants to avoid duplication and ensure consistency.

// =============================================================================
// Network
// =============================================================================

/// Default monitor address (central station port of the bedside monitor)
pub const DEFAULT_MONITOR_HOST: &str = "192.168.0.122";

/// Default monitor TCP port
pub const DEFAULT_MONITOR_PORT: u16 = 4601;

/// Default text encoding label for HL7 fields
pub const DEFAULT_ENCODING: &str = "gbk";

/// Timeout for a single connect attempt (seconds)
pub const CONNECT_TIMEOUT_SECS: u64 = 3;

/// Idle time before TCP keepalive packets start (seconds)
pub const TCP_KEEPALIVE_SECS: u64 = 10;

// =============================================================================
// Timing - Reconnection
// =============================================================================

/// First delay after a failed connect or a lost connection (milliseconds)
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 500;

/// Upper bound for the exponential reconnect backoff (milliseconds)
pub const DEFAULT_RECONNECT_MAX_DELAY_MS: u64 = 5000;

/// Interval at which blocking loops re-check the shutdown flag (milliseconds)
pub const SHUTDOWN_POLL_MS: u64 = 100;

// =============================================================================
// Timing - Session
// =============================================================================

/// Delay between connection and the feed request (seconds)
pub const DEFAULT_FEED_REQUEST_DELAY_SECS: u64 = 5;

/// Recorder flush interval (milliseconds)
pub const DEFAULT_RECORD_FLUSH_MS: u64 = 250;

// =============================================================================
// Buffers
// =============================================================================

/// Socket read buffer size
pub const READ_BUFFER_SIZE: usize = 4096;

/// Largest frame accumulated before the extractor gives up and resyncs
pub const MAX_FRAME_SIZE: usize = 16384;

/// Default number of samples kept per channel
pub const DEFAULT_BUFFER_SIZE: usize = 300;

/// Channel capacity for async message passing
pub const CHANNEL_CAPACITY: usize = 256;

/// Queue depth between the session and the recorder thread
pub const RECORDER_CHANNEL_CAPACITY: usize = 1024;
