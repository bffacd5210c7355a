//! Bedside Link - TCP client for bedside patient monitors
//!
//! Keeps a connection to the monitor's HL7 port alive, extracts MLLP
//! frames, decodes the vital-sign subset of HL7 it pushes, and keeps the
//! most recent samples per channel in fixed-size buffers.
//!
//! Layers, bottom up:
//! - `transport`: TCP link with reconnection
//! - `codec`: MLLP frame extraction
//! - `hl7`: segment decoding and outbound queries
//! - `store`: per-channel circular buffers
//! - `session`: the orchestrator tying them together

pub mod cli;
pub mod codec;
pub mod config;
pub mod constants;
pub mod error;
pub mod hl7;
pub mod logging;
pub mod recorder;
pub mod session;
pub mod store;
pub mod transport;

pub use error::{MonitorError, Result};
