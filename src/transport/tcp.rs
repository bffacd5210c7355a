//! TCP client transport for the monitor link
//!
//! Runs one async tokio task that connects (with bounded exponential
//! backoff), reads, writes queued bytes, reports `TransportEvent`s, and
//! reconnects after any failure.
//!
//! The task owns both halves of the current socket. Reads and queued
//! writes are multiplexed with `select!`, and every write is polled in
//! `SHUTDOWN_POLL_MS` steps, so a peer that stops reading can never keep
//! the socket open past shutdown.
//!
//! Bytes still queued from an earlier connection are discarded before a
//! new connection is reported, never written to it.
//!
//! The transport stops when the `shutdown` flag is set.

use super::{ConnectionState, Link, SharedState, Transport, TransportChannels, TransportEvent};
use crate::constants::{
    CHANNEL_CAPACITY, CONNECT_TIMEOUT_SECS, DEFAULT_RECONNECT_DELAY_MS,
    DEFAULT_RECONNECT_MAX_DELAY_MS, READ_BUFFER_SIZE, SHUTDOWN_POLL_MS, TCP_KEEPALIVE_SECS,
};
use crate::error::{MonitorError, Result};
use bytes::Bytes;
use parking_lot::RwLock;
use socket2::{SockRef, TcpKeepalive};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Delay policy between connection attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Delay after the first failure, and after a lost connection
    pub initial: Duration,
    /// Ceiling for consecutive failures
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            Duration::from_millis(DEFAULT_RECONNECT_MAX_DELAY_MS),
        )
    }
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
        }
    }

    /// Delay to use after `current` failed again
    pub fn next(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max)
    }
}

/// TCP client that keeps a connection to the monitor alive
///
/// # Example
///
/// ```ignore
/// let transport = TcpTransport::new("192.168.0.122", 4601);
/// let mut channels = transport.spawn(shutdown)?;
///
/// while let Some(event) = channels.events.recv().await {
///     match event {
///         TransportEvent::Connected => channels.link.send(hello.clone()),
///         TransportEvent::Data(bytes) => codec.decode(&bytes, on_frame),
///         TransportEvent::Disconnected => {}
///     }
/// }
/// ```
pub struct TcpTransport {
    host: String,
    port: u16,
    backoff: Backoff,
}

impl TcpTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            backoff: Backoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Transport for TcpTransport {
    fn spawn(self, shutdown: Arc<AtomicBool>) -> Result<TransportChannels> {
        if self.host.trim().is_empty() {
            return Err(MonitorError::ConfigValidation {
                field: "monitor.host",
                reason: "must not be empty".into(),
            });
        }

        let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(CHANNEL_CAPACITY);
        let (out_tx, out_rx) = mpsc::channel::<Bytes>(CHANNEL_CAPACITY);
        let state: SharedState = Arc::new(RwLock::new(ConnectionState::Disconnected));

        tokio::spawn(run_connection(
            self,
            Outbound::new(out_rx),
            event_tx,
            state.clone(),
            shutdown.clone(),
        ));

        Ok(TransportChannels {
            events: event_rx,
            link: Link::new(out_tx, state, shutdown),
        })
    }
}

/// Outgoing queue as seen by the connection task
struct Outbound {
    rx: mpsc::Receiver<Bytes>,
    /// False once every `Link` is gone
    open: bool,
}

impl Outbound {
    fn new(rx: mpsc::Receiver<Bytes>) -> Self {
        Self { rx, open: true }
    }

    /// Drop bytes queued for an earlier connection
    fn discard_stale(&mut self) {
        let mut dropped = 0;
        while let Ok(data) = self.rx.try_recv() {
            dropped += data.len();
        }
        if dropped > 0 {
            debug!("Discarded {} bytes queued for a previous connection", dropped);
        }
    }
}

/// Why a connection ended
enum LinkEnd {
    Shutdown,
    Closed,
    Failed(io::Error),
    ConsumerGone,
}

/// Connect / serve / reconnect until shutdown
async fn run_connection(
    target: TcpTransport,
    mut outbound: Outbound,
    events: mpsc::Sender<TransportEvent>,
    state: SharedState,
    shutdown: Arc<AtomicBool>,
) {
    let addr = target.address();
    let mut delay = target.backoff.initial;

    while !shutdown.load(Ordering::Relaxed) {
        *state.write() = ConnectionState::Connecting;

        let stream = match connect(&target.host, target.port).await {
            Ok(stream) => stream,
            Err(e) => {
                *state.write() = ConnectionState::Disconnected;
                // Refused is the normal state while the monitor is off
                if e.is_refused() {
                    debug!("{}", e);
                } else {
                    error!("{}", e);
                }
                pause(delay, &shutdown).await;
                delay = target.backoff.next(delay);
                continue;
            }
        };
        delay = target.backoff.initial;
        configure_stream(&stream);

        outbound.discard_stale();
        *state.write() = ConnectionState::Connected;
        info!("Connected to monitor {}", addr);

        let end = if events.send(TransportEvent::Connected).await.is_err() {
            drop(stream);
            LinkEnd::ConsumerGone
        } else {
            // Dropping the stream on return closes the socket
            serve(stream, &mut outbound, &events, &shutdown).await
        };
        *state.write() = ConnectionState::Disconnected;

        match &end {
            LinkEnd::Shutdown => info!("Closed connection to monitor {}", addr),
            LinkEnd::Closed => info!("Monitor {} closed the connection", addr),
            LinkEnd::Failed(e) => info!("Connection to monitor {} lost: {}", addr, e),
            LinkEnd::ConsumerGone => debug!("Event consumer dropped, stopping"),
        }
        let _ = events.send(TransportEvent::Disconnected).await;

        if matches!(end, LinkEnd::ConsumerGone) {
            break;
        }
        pause(target.backoff.initial, &shutdown).await;
    }

    *state.write() = ConnectionState::Disconnected;
    debug!("Connection task for {} stopped", addr);
}

async fn connect(host: &str, port: u16) -> Result<TcpStream> {
    let map_err = |source| MonitorError::Connect {
        addr: format!("{}:{}", host, port),
        source,
    };

    match tokio::time::timeout(
        Duration::from_secs(CONNECT_TIMEOUT_SECS),
        TcpStream::connect((host, port)),
    )
    .await
    {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(map_err(e)),
        Err(_) => Err(map_err(io::Error::new(
            io::ErrorKind::TimedOut,
            "connect timed out",
        ))),
    }
}

/// Low latency, and keepalive so a powered-off monitor is noticed
fn configure_stream(stream: &TcpStream) {
    if let Err(e) = stream.set_nodelay(true) {
        warn!("Cannot set TCP_NODELAY: {}", e);
    }
    let keepalive = TcpKeepalive::new().with_time(Duration::from_secs(TCP_KEEPALIVE_SECS));
    if let Err(e) = SockRef::from(stream).set_tcp_keepalive(&keepalive) {
        warn!("Cannot enable TCP keepalive: {}", e);
    }
}

/// Forward reads as `Data` events and write queued bytes until the
/// connection ends or shutdown is requested
async fn serve(
    stream: TcpStream,
    outbound: &mut Outbound,
    events: &mpsc::Sender<TransportEvent>,
    shutdown: &AtomicBool,
) -> LinkEnd {
    let (mut reader, mut writer) = stream.into_split();
    let mut buf = [0u8; READ_BUFFER_SIZE];

    loop {
        if shutdown.load(Ordering::Relaxed) {
            return LinkEnd::Shutdown;
        }

        tokio::select! {
            biased;

            // Periodic shutdown check
            _ = tokio::time::sleep(Duration::from_millis(SHUTDOWN_POLL_MS)) => {}

            read = reader.read(&mut buf) => match read {
                Ok(0) => return LinkEnd::Closed,
                Ok(n) => {
                    let data = Bytes::copy_from_slice(&buf[..n]);
                    if events.send(TransportEvent::Data(data)).await.is_err() {
                        return LinkEnd::ConsumerGone;
                    }
                }
                Err(e) => return LinkEnd::Failed(e),
            },

            queued = outbound.rx.recv(), if outbound.open => match queued {
                Some(data) => {
                    if let Err(end) = write_polled(&mut writer, &data, shutdown).await {
                        return end;
                    }
                }
                None => {
                    // All links dropped; keep reading
                    outbound.open = false;
                }
            },
        }
    }
}

/// Write all of `data`, giving up on shutdown even if the peer never reads
async fn write_polled(
    writer: &mut OwnedWriteHalf,
    data: &[u8],
    shutdown: &AtomicBool,
) -> std::result::Result<(), LinkEnd> {
    let poll = Duration::from_millis(SHUTDOWN_POLL_MS);
    let mut written = 0;

    while written < data.len() {
        if shutdown.load(Ordering::Relaxed) {
            return Err(LinkEnd::Shutdown);
        }
        match tokio::time::timeout(poll, writer.write(&data[written..])).await {
            Ok(Ok(0)) => return Err(LinkEnd::Failed(io::ErrorKind::WriteZero.into())),
            Ok(Ok(n)) => written += n,
            Ok(Err(e)) => {
                error!("Write to monitor failed: {}", e);
                return Err(LinkEnd::Failed(e));
            }
            Err(_) => {
                // Peer is not reading - check shutdown flag
            }
        }
    }

    debug!("Sent {} bytes", data.len());
    Ok(())
}

/// Sleep for `duration`, returning early on shutdown
async fn pause(duration: Duration, shutdown: &AtomicBool) {
    let deadline = Instant::now() + duration;
    let poll = Duration::from_millis(SHUTDOWN_POLL_MS);

    while !shutdown.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        tokio::time::sleep((deadline - now).min(poll)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    const EVENT_TIMEOUT: Duration = Duration::from_secs(3);

    fn fast_backoff() -> Backoff {
        Backoff::new(Duration::from_millis(10), Duration::from_millis(50))
    }

    async fn next_event(channels: &mut TransportChannels) -> TransportEvent {
        tokio::time::timeout(EVENT_TIMEOUT, channels.events.recv())
            .await
            .expect("timeout waiting for transport event")
            .expect("transport event channel closed")
    }

    #[test]
    fn test_backoff_doubles_up_to_max() {
        let backoff = Backoff::new(Duration::from_millis(500), Duration::from_millis(3000));

        let mut delay = backoff.initial;
        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(delay.as_millis());
            delay = backoff.next(delay);
        }
        assert_eq!(seen, vec![500, 1000, 2000, 3000, 3000]);
    }

    #[test]
    fn test_backoff_max_never_below_initial() {
        let backoff = Backoff::new(Duration::from_secs(2), Duration::from_secs(1));
        assert_eq!(backoff.max, Duration::from_secs(2));
    }

    #[test]
    fn test_tcp_transport_new() {
        let transport = TcpTransport::new("192.168.0.122", 4601);
        assert_eq!(transport.address(), "192.168.0.122:4601");
        assert_eq!(transport.backoff, Backoff::default());
    }

    #[test]
    fn test_spawn_rejects_empty_host() {
        let result = TcpTransport::new("", 4601).spawn(Arc::new(AtomicBool::new(false)));
        assert!(matches!(
            result,
            Err(MonitorError::ConfigValidation { field: "monitor.host", .. })
        ));
    }

    #[tokio::test]
    async fn test_connect_read_write_and_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut channels = TcpTransport::new("127.0.0.1", port)
            .with_backoff(fast_backoff())
            .spawn(shutdown.clone())
            .unwrap();

        let (mut server, _) = listener.accept().await.unwrap();
        assert_eq!(next_event(&mut channels).await, TransportEvent::Connected);
        assert!(channels.link.is_connected());

        // Monitor -> client
        server.write_all(b"hello").await.unwrap();
        let mut received = Vec::new();
        while received.len() < 5 {
            match next_event(&mut channels).await {
                TransportEvent::Data(data) => received.extend_from_slice(&data),
                other => panic!("Expected Data, got {:?}", other),
            }
        }
        assert_eq!(received, b"hello");

        // Client -> monitor
        assert!(channels.link.send(Bytes::from_static(b"ping")));
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        // Monitor goes away
        drop(server);
        assert_eq!(next_event(&mut channels).await, TransportEvent::Disconnected);
        assert!(!channels.link.is_connected());
        assert!(!channels.link.send(Bytes::from_static(b"lost")));

        // And comes back
        let (_server, _) = listener.accept().await.unwrap();
        assert_eq!(next_event(&mut channels).await, TransportEvent::Connected);

        channels.link.close();
        assert_eq!(next_event(&mut channels).await, TransportEvent::Disconnected);
        let end = tokio::time::timeout(EVENT_TIMEOUT, channels.events.recv())
            .await
            .expect("transport did not stop");
        assert!(end.is_none());
        assert_eq!(channels.link.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_refused_keeps_retrying_until_closed() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut channels = TcpTransport::new("127.0.0.1", port)
            .with_backoff(fast_backoff())
            .spawn(shutdown.clone())
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!channels.link.is_connected());
        assert!(channels.events.try_recv().is_err());

        channels.link.close();
        let end = tokio::time::timeout(EVENT_TIMEOUT, channels.events.recv())
            .await
            .expect("transport did not stop");
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn test_close_with_peer_that_never_reads() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut channels = TcpTransport::new("127.0.0.1", port)
            .with_backoff(fast_backoff())
            .spawn(shutdown.clone())
            .unwrap();

        // Accepted but never read from
        let (_server, _) = listener.accept().await.unwrap();
        assert_eq!(next_event(&mut channels).await, TransportEvent::Connected);

        let chunk = Bytes::from(vec![0x55u8; 1024 * 1024]);
        for _ in 0..64 {
            channels.link.send(chunk.clone());
        }
        // Let the socket buffers fill up
        tokio::time::sleep(Duration::from_millis(300)).await;

        channels.link.close();
        assert_eq!(next_event(&mut channels).await, TransportEvent::Disconnected);
        assert_eq!(channels.link.state(), ConnectionState::Disconnected);

        let end = tokio::time::timeout(EVENT_TIMEOUT, channels.events.recv())
            .await
            .expect("transport did not stop");
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn test_reset_by_peer_is_one_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut channels = TcpTransport::new("127.0.0.1", port)
            .with_backoff(fast_backoff())
            .spawn(shutdown.clone())
            .unwrap();

        let (server, _) = listener.accept().await.unwrap();
        assert_eq!(next_event(&mut channels).await, TransportEvent::Connected);

        // Zero linger turns close into a RST, so the client read fails
        SockRef::from(&server)
            .set_linger(Some(Duration::ZERO))
            .unwrap();
        drop(server);

        assert_eq!(next_event(&mut channels).await, TransportEvent::Disconnected);
        assert!(!channels.link.is_connected());

        // Next event is the reconnect, not a second Disconnected
        let (_server, _) = listener.accept().await.unwrap();
        assert_eq!(next_event(&mut channels).await, TransportEvent::Connected);

        channels.link.close();
        assert_eq!(next_event(&mut channels).await, TransportEvent::Disconnected);
    }

    #[tokio::test]
    async fn test_bytes_queued_before_connect_are_discarded() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let shutdown = Arc::new(AtomicBool::new(false));

        let (out_tx, out_rx) = mpsc::channel(8);
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let state: SharedState = Arc::new(RwLock::new(ConnectionState::Disconnected));

        // Left over from an earlier connection
        out_tx.try_send(Bytes::from_static(b"stale")).unwrap();

        tokio::spawn(run_connection(
            TcpTransport::new("127.0.0.1", port).with_backoff(fast_backoff()),
            Outbound::new(out_rx),
            event_tx,
            state.clone(),
            shutdown.clone(),
        ));

        let (mut server, _) = listener.accept().await.unwrap();
        let event = tokio::time::timeout(EVENT_TIMEOUT, event_rx.recv()).await.unwrap();
        assert_eq!(event, Some(TransportEvent::Connected));

        let link = Link::new(out_tx, state, shutdown.clone());
        assert!(link.send(Bytes::from_static(b"fresh")));

        let mut buf = [0u8; 5];
        tokio::time::timeout(EVENT_TIMEOUT, server.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf, b"fresh");

        link.close();
    }
}
