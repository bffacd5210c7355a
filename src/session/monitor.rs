//! Monitor session - protocol logic on top of a transport
//!
//! The session handles:
//! - Frame extraction (codec) and HL7 decoding
//! - Handshake replies and the delayed feed request
//! - Updating the sample store
//! - Publishing connection changes and sample updates
//!
//! The session does NOT handle:
//! - Connecting and reconnecting (that's the transport's job)
//! - What consumers do with published events

use super::stats::Stats;
use super::{SampleUpdate, SessionEvent};
use crate::codec::Codec;
use crate::constants::{DEFAULT_FEED_REQUEST_DELAY_SECS, SHUTDOWN_POLL_MS};
use crate::error::Result;
use crate::hl7::message::FeedRequest;
use crate::hl7::Decoder;
use crate::store::{Channel, SampleStore, VitalSample};
use crate::transport::{TransportChannels, TransportEvent};
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Session between this client and one monitor
///
/// Owns the codec, the decoder and the sample store. Every mutation of the
/// store happens on the task running [`MonitorSession::run`].
///
/// The feed request is sent once per connection, `feed_delay` after the
/// link comes up, and only if that connection is still up. Each connection
/// gets a new generation number; a timer that fires for an older generation
/// is ignored.
///
/// # Example
///
/// ```ignore
/// let transport = TcpTransport::new("192.168.0.122", 4601).spawn(shutdown.clone())?;
/// let session = MonitorSession::new(
///     transport,
///     MllpCodec::new(),
///     Decoder::default(),
///     SampleStore::new(300),
///     stats,
/// )
/// .with_events(events_tx);
/// let store = session.run(shutdown).await?;
/// ```
pub struct MonitorSession<C: Codec> {
    transport: TransportChannels,
    codec: C,
    decoder: Decoder,
    store: SampleStore,
    stats: Arc<Stats>,
    /// Event sink (optional)
    events_tx: Option<mpsc::Sender<SessionEvent>>,
    feed: FeedRequest,
    feed_delay: Duration,
    /// Current connection generation
    generation: u64,
    /// Timer for the current generation's feed request
    pending_feed: Option<JoinHandle<()>>,
    feed_due_tx: mpsc::Sender<u64>,
    feed_due_rx: mpsc::Receiver<u64>,
}

impl<C: Codec> MonitorSession<C> {
    /// Create a session requesting heart rate and pulse rate
    pub fn new(
        transport: TransportChannels,
        codec: C,
        decoder: Decoder,
        store: SampleStore,
        stats: Arc<Stats>,
    ) -> Self {
        let codes = [Channel::HeartRate, Channel::PulseRate]
            .into_iter()
            .map(|channel| decoder.table().code(channel).to_string())
            .collect();
        let (feed_due_tx, feed_due_rx) = mpsc::channel(4);

        Self {
            transport,
            codec,
            decoder,
            store,
            stats,
            events_tx: None,
            feed: FeedRequest::new(codes),
            feed_delay: Duration::from_secs(DEFAULT_FEED_REQUEST_DELAY_SECS),
            generation: 0,
            pending_feed: None,
            feed_due_tx,
            feed_due_rx,
        }
    }

    /// Replace the feed request and the delay before it is sent
    pub fn with_feed_request(mut self, feed: FeedRequest, delay: Duration) -> Self {
        self.feed = feed;
        self.feed_delay = delay;
        self
    }

    /// Publish connection changes and sample updates to `events_tx`
    ///
    /// Events are dropped when the channel is full.
    pub fn with_events(mut self, events_tx: mpsc::Sender<SessionEvent>) -> Self {
        self.events_tx = Some(events_tx);
        self
    }

    pub fn store(&self) -> &SampleStore {
        &self.store
    }

    /// Run until shutdown or until the transport stops
    ///
    /// Closes the transport on the way out and returns the store in its
    /// last state.
    pub async fn run(mut self, shutdown: Arc<AtomicBool>) -> Result<SampleStore> {
        loop {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }

            tokio::select! {
                biased;

                // Periodic shutdown check
                _ = tokio::time::sleep(Duration::from_millis(SHUTDOWN_POLL_MS)) => {
                    if shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                }

                event = self.transport.events.recv() => {
                    match event {
                        Some(event) => self.handle_event(event),
                        None => {
                            // Channel closed = transport stopped
                            debug!("Transport stopped");
                            break;
                        }
                    }
                }

                Some(generation) = self.feed_due_rx.recv() => {
                    self.send_feed_request(generation);
                }
            }
        }

        self.cancel_feed_request();
        self.transport.link.close();
        Ok(self.store)
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                self.generation += 1;
                self.codec.reset();
                self.emit(SessionEvent::Connection { connected: true });
                self.schedule_feed_request();
            }
            TransportEvent::Disconnected => {
                self.generation += 1;
                self.cancel_feed_request();
                self.codec.reset();
                self.emit(SessionEvent::Connection { connected: false });
            }
            TransportEvent::Data(data) => self.handle_data(data),
        }
    }

    /// Extract frames from a chunk and decode each one in order
    fn handle_data(&mut self, data: Bytes) {
        self.stats.add_rx(data.len());

        let mut frames = Vec::new();
        self.codec.decode(&data, |frame| frames.push(frame));

        for frame in frames {
            self.stats.add_frame();
            let decoded = self.decoder.decode(&frame.payload);
            self.stats.add_decode_errors(decoded.errors);

            for reply in &decoded.replies {
                info!("Answering handshake");
                self.send_message(reply);
            }

            self.stats.add_samples(decoded.samples.len());
            for sample in decoded.samples {
                self.apply_sample(sample);
            }
        }
    }

    fn apply_sample(&mut self, sample: VitalSample) {
        self.store.update(sample.channel, sample.value);

        if let Some(ref tx) = self.events_tx {
            let update = SampleUpdate {
                sample,
                identifier: self.decoder.table().identifier(sample.channel).to_string(),
                snapshot: self.store.snapshot(sample.channel),
            };
            let _ = tx.try_send(SessionEvent::Sample(update));
        }
    }

    fn schedule_feed_request(&mut self) {
        self.cancel_feed_request();

        let generation = self.generation;
        let delay = self.feed_delay;
        let feed_due_tx = self.feed_due_tx.clone();
        self.pending_feed = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = feed_due_tx.send(generation).await;
        }));
    }

    fn cancel_feed_request(&mut self) {
        if let Some(timer) = self.pending_feed.take() {
            timer.abort();
        }
    }

    fn send_feed_request(&mut self, generation: u64) {
        if generation != self.generation {
            debug!("Dropping feed request for an earlier connection");
            return;
        }
        self.pending_feed = None;

        if !self.transport.link.is_connected() {
            debug!("Link went down before the feed request");
            return;
        }

        info!("Requesting parameter feed ({})", self.feed.codes.join(", "));
        let payload = self.feed.to_payload(chrono::Local::now().naive_local());
        self.send_message(&payload);
    }

    /// Frame and queue a payload; silently dropped when not connected
    fn send_message(&mut self, payload: &[u8]) {
        let mut encoded = Vec::with_capacity(payload.len() + 3);
        self.codec.encode(payload, &mut encoded);

        let len = encoded.len();
        if self.transport.link.send(Bytes::from(encoded)) {
            self.stats.add_tx(len);
        } else {
            debug!("Link not writable, dropped {} bytes", len);
        }
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(ref tx) = self.events_tx {
            let _ = tx.try_send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MllpCodec;
    use crate::store::SampleValue;
    use crate::transport::{ConnectionState, Link, SharedState};
    use parking_lot::RwLock;

    const HANDSHAKE_FRAME: &[u8] = b"\x0bMSH|^~\\&|||||||ORU^R01|106|P|2.3.1|\r\x1c\x0d";
    const HR_85_FRAME: &[u8] = b"\x0bMSH|^~\\&|||||||ORU^R01|204|P|2.3.1|\rOBX||NM|101^HR|2101|85||||||F\r\x1c\x0d";

    /// Session driven by hand-fed transport events
    struct Harness {
        events: mpsc::Sender<TransportEvent>,
        outgoing: mpsc::Receiver<Bytes>,
        state: SharedState,
        sink: mpsc::Receiver<SessionEvent>,
        shutdown: Arc<AtomicBool>,
        stats: Arc<Stats>,
        handle: JoinHandle<Result<SampleStore>>,
    }

    impl Harness {
        fn start(buffer_size: usize) -> Self {
            let (events_tx, events_rx) = mpsc::channel(16);
            let (outgoing_tx, outgoing_rx) = mpsc::channel(16);
            let (sink_tx, sink_rx) = mpsc::channel(64);
            let state: SharedState = Arc::new(RwLock::new(ConnectionState::Disconnected));
            let shutdown = Arc::new(AtomicBool::new(false));
            let stats = Arc::new(Stats::new());

            let transport = TransportChannels {
                events: events_rx,
                link: Link::new(outgoing_tx, state.clone(), shutdown.clone()),
            };
            let session = MonitorSession::new(
                transport,
                MllpCodec::new(),
                Decoder::default(),
                SampleStore::new(buffer_size),
                stats.clone(),
            )
            .with_events(sink_tx);
            let handle = tokio::spawn(session.run(shutdown.clone()));

            Self {
                events: events_tx,
                outgoing: outgoing_rx,
                state,
                sink: sink_rx,
                shutdown,
                stats,
                handle,
            }
        }

        async fn connect(&self) {
            *self.state.write() = ConnectionState::Connected;
            self.events.send(TransportEvent::Connected).await.unwrap();
            settle().await;
        }

        async fn disconnect(&self) {
            *self.state.write() = ConnectionState::Disconnected;
            self.events.send(TransportEvent::Disconnected).await.unwrap();
            settle().await;
        }

        async fn receive(&self, bytes: &[u8]) {
            self.events
                .send(TransportEvent::Data(Bytes::copy_from_slice(bytes)))
                .await
                .unwrap();
            settle().await;
        }

        fn sent(&mut self) -> Vec<Bytes> {
            let mut sent = Vec::new();
            while let Ok(data) = self.outgoing.try_recv() {
                sent.push(data);
            }
            sent
        }

        fn published(&mut self) -> Vec<SessionEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.sink.try_recv() {
                events.push(event);
            }
            events
        }

        async fn stop(self) -> SampleStore {
            self.shutdown.store(true, Ordering::SeqCst);
            self.handle.await.unwrap().unwrap()
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    fn is_feed_request(data: &[u8]) -> bool {
        data.starts_with(b"\x0bMSH|^~\\&|||||||QRY^R02|1203|")
    }

    #[tokio::test(start_paused = true)]
    async fn test_feed_request_sent_once_after_delay() {
        let mut h = Harness::start(4);
        h.connect().await;

        tokio::time::sleep(Duration::from_millis(4900)).await;
        assert!(h.sent().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        let sent = h.sent();
        assert_eq!(sent.len(), 1);
        assert!(is_feed_request(&sent[0]));
        assert!(sent[0].ends_with(b"QRF|MON||||0&0^1^1^0^101&161\r\x1c\x0d"));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(h.sent().is_empty());

        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_feed_request_when_disconnected_before_delay() {
        let mut h = Harness::start(4);
        h.connect().await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        h.disconnect().await;

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(h.sent().is_empty());

        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_is_answered_immediately() {
        let mut h = Harness::start(4);
        h.connect().await;
        h.receive(HANDSHAKE_FRAME).await;

        let sent = h.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].as_ref(),
            b"\x0bMSH|^~\\&|||||||QRY^R02|160|P|2.3.1\r\x1c\x0d"
        );
        assert_eq!(h.stats.tx_bytes(), sent[0].len() as u64);

        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sample_updates_store_and_sink() {
        let mut h = Harness::start(4);
        h.connect().await;
        h.receive(HR_85_FRAME).await;

        let events = h.published();
        assert_eq!(events[0], SessionEvent::Connection { connected: true });
        match &events[1] {
            SessionEvent::Sample(update) => {
                assert_eq!(update.identifier, "101^HR");
                assert_eq!(update.sample.channel, Channel::HeartRate);
                assert_eq!(
                    update.snapshot,
                    vec![
                        SampleValue::Missing,
                        SampleValue::Missing,
                        SampleValue::Missing,
                        SampleValue::Value(85),
                    ]
                );
            }
            other => panic!("expected sample, got {:?}", other),
        }
        assert_eq!(h.stats.samples(), 1);
        assert_eq!(h.stats.frames(), 1);

        let store = h.stop().await;
        assert_eq!(store.buffer(Channel::HeartRate).latest(), Some(SampleValue::Value(85)));
        assert_eq!(store.buffer(Channel::PulseRate).latest(), Some(SampleValue::Missing));
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_split_across_reads() {
        let mut h = Harness::start(2);
        h.connect().await;
        let (head, tail) = HR_85_FRAME.split_at(20);
        h.receive(head).await;
        h.receive(tail).await;

        let store = h.stop().await;
        assert_eq!(store.buffer(Channel::HeartRate).latest(), Some(SampleValue::Value(85)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_mid_frame_then_reconnect() {
        let mut h = Harness::start(3);
        h.connect().await;
        h.receive(HR_85_FRAME).await;

        // Partial frame, then the link drops
        h.receive(b"\x0bOBX||NM|101^HR|2101|70||||||F\r").await;
        h.disconnect().await;

        let events = h.published();
        let drops = events
            .iter()
            .filter(|e| **e == SessionEvent::Connection { connected: false })
            .count();
        assert_eq!(drops, 1);
        assert_eq!(events.len(), 3);

        h.connect().await;
        // Tail of the old frame must not complete it
        h.receive(b"\x1c\x0d").await;

        let events = h.published();
        assert_eq!(events, vec![SessionEvent::Connection { connected: true }]);

        tokio::time::sleep(Duration::from_secs(6)).await;
        let sent = h.sent();
        assert_eq!(sent.len(), 1);
        assert!(is_feed_request(&sent[0]));

        let store = h.stop().await;
        assert_eq!(
            store.snapshot(Channel::HeartRate),
            vec![SampleValue::Missing, SampleValue::Missing, SampleValue::Value(85)]
        );
        for channel in Channel::ALL {
            assert_eq!(store.snapshot(channel).len(), 3);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_segments_counted_not_fatal() {
        let mut h = Harness::start(2);
        h.connect().await;
        h.receive(b"\x0bMSH|x\rOBX||NM|101^HR|2101|abc||||||F\rOBX||NM|161^PR|2101|72||||||F\r\x1c\x0d")
            .await;

        assert_eq!(h.stats.decode_errors(), 2);
        let store = h.stop().await;
        assert_eq!(store.buffer(Channel::PulseRate).latest(), Some(SampleValue::Value(72)));
        assert_eq!(store.buffer(Channel::HeartRate).latest(), Some(SampleValue::Missing));
    }

    #[tokio::test]
    async fn test_session_ends_when_transport_stops() {
        let h = Harness::start(2);
        drop(h.events);

        let store = h.handle.await.unwrap().unwrap();
        assert_eq!(store.capacity(), 2);
        // Link is closed on the way out
        assert!(h.shutdown.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_session_shutdown() {
        let h = Harness::start(2);
        let shutdown = h.shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            shutdown.store(true, Ordering::SeqCst);
        });

        let result = h.handle.await.unwrap();
        assert!(result.is_ok());
    }
}
