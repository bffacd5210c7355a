//! Link statistics
//!
//! Thread-safe counters shared between the session and whoever reports
//! on it. Uses lock-free atomics for all operations.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Traffic and decode counters (fully lock-free)
#[derive(Debug, Default)]
pub struct Stats {
    /// Total bytes received from the monitor
    rx_total: AtomicU64,
    /// Total bytes queued for the monitor
    tx_total: AtomicU64,
    /// Complete frames extracted
    frames: AtomicU64,
    /// Samples written to the store
    samples: AtomicU64,
    /// Segments skipped as undecodable
    decode_errors: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn add_rx(&self, bytes: usize) {
        self.rx_total.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_tx(&self, bytes: usize) {
        self.tx_total.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_frame(&self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_samples(&self, count: usize) {
        self.samples.fetch_add(count as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_decode_errors(&self, count: usize) {
        self.decode_errors.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn rx_bytes(&self) -> u64 {
        self.rx_total.load(Ordering::Relaxed)
    }

    pub fn tx_bytes(&self) -> u64 {
        self.tx_total.load(Ordering::Relaxed)
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }

    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rx {} B, tx {} B, {} frames, {} samples, {} skipped segments",
            self.rx_bytes(),
            self.tx_bytes(),
            self.frames(),
            self.samples(),
            self.decode_errors()
        )
    }
}
