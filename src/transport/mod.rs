//! Transport abstraction for byte-level I/O
//!
//! Separates I/O concerns from protocol logic:
//! - **Transport**: How bytes flow and how the link is kept up (TCP)
//! - **Codec**: How messages are framed (handled separately)
//!
//! A transport reports what happens on the link as `TransportEvent`s and
//! accepts outgoing bytes through a cloneable `Link` handle. Consumers
//! never see the socket.
//!
//! # Adding a new transport
//!
//! 1. Create `transport/my_transport.rs`
//! 2. Implement the `Transport` trait
//! 3. Add `pub mod my_transport;` here
//! 4. No other changes needed

pub mod tcp;

pub use tcp::TcpTransport;

use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::Result;

/// Link state, owned by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Shared, transport-owned connection state
pub type SharedState = Arc<RwLock<ConnectionState>>;

/// What the transport reports to its consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Link came up
    Connected,
    /// Link went down (exactly once per `Connected`)
    Disconnected,
    /// Bytes from one successful read (not necessarily a whole message)
    Data(Bytes),
}

/// Handle for sending on, inspecting and closing a running transport
#[derive(Clone)]
pub struct Link {
    tx: mpsc::Sender<Bytes>,
    state: SharedState,
    shutdown: Arc<AtomicBool>,
}

impl Link {
    pub fn new(tx: mpsc::Sender<Bytes>, state: SharedState, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            tx,
            state,
            shutdown,
        }
    }

    /// Queue bytes for the socket without waiting
    ///
    /// Returns false (and drops the bytes) when not connected or the
    /// outgoing queue is full. Delivery is never guaranteed.
    pub fn send(&self, data: Bytes) -> bool {
        if !self.is_connected() {
            return false;
        }
        self.tx.try_send(data).is_ok()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Ask the transport to stop (idempotent)
    pub fn close(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

/// Channels for bidirectional communication with a transport
///
/// When the transport stops (shutdown), it closes `events`.
pub struct TransportChannels {
    /// Connection changes and received bytes
    pub events: mpsc::Receiver<TransportEvent>,

    /// Outgoing side
    pub link: Link,
}

/// Trait for spawnable transports
///
/// A transport handles:
/// - Opening/closing connections, including reconnection
/// - Reading/writing raw bytes
/// - Threading model (blocking or async)
///
/// A transport does NOT handle:
/// - Message framing (that's the codec's job)
/// - Protocol replies (that's the session's job)
///
/// `spawn` consumes the transport, so each one connects exactly once.
/// It runs until `shutdown` is set (directly or via `Link::close`).
pub trait Transport: Send + 'static {
    /// Spawn the transport in background
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot be initialized.
    fn spawn(self, shutdown: Arc<AtomicBool>) -> Result<TransportChannels>;
}
