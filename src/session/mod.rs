//! Monitor session
//!
//! Wires the TCP transport, the MLLP codec, the HL7 decoder and the sample
//! store together, and fans session events out to the log and the optional
//! recorder.

pub mod monitor;
pub mod stats;

pub use monitor::MonitorSession;
pub use stats::Stats;

use crate::codec::MllpCodec;
use crate::config::Config;
use crate::constants::CHANNEL_CAPACITY;
use crate::error::{MonitorError, Result};
use crate::hl7::message::FeedRequest;
use crate::hl7::{ChannelTable, Decoder};
use crate::recorder::{self, RecorderConfig, SampleRecord};
use crate::store::{SampleStore, SampleValue, VitalSample};
use crate::transport::tcp::Backoff;
use crate::transport::{TcpTransport, Transport};
use std::sync::atomic::AtomicBool;
use std::sync::mpsc::{SyncSender, TrySendError};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// What the session publishes
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Link to the monitor came up or went down
    Connection { connected: bool },
    /// A channel received a new reading
    Sample(SampleUpdate),
}

/// A store update as seen by consumers
#[derive(Debug, Clone, PartialEq)]
pub struct SampleUpdate {
    pub sample: VitalSample,
    /// Identifier of the channel as the monitor names it (e.g. `101^HR`)
    pub identifier: String,
    /// The channel's buffer after the update, oldest first
    pub snapshot: Vec<SampleValue>,
}

/// Run a session with the given configuration until shutdown
///
/// Returns the sample store in its final state.
pub async fn run(config: &Config, shutdown: Arc<AtomicBool>, stats: Arc<Stats>) -> Result<SampleStore> {
    let monitor = &config.monitor;
    let encoding = monitor
        .text_encoding()
        .ok_or_else(|| MonitorError::ConfigValidation {
            field: "monitor.encoding",
            reason: format!("unknown encoding label '{}'", monitor.encoding),
        })?;

    let decoder = Decoder::new(ChannelTable::from_config(&config.channels), encoding)
        .with_log_unmatched(config.channels.log_unmatched);
    let feed = FeedRequest::new(
        monitor
            .feed_channels
            .iter()
            .map(|&channel| decoder.table().code(channel).to_string())
            .collect(),
    );

    let recorder = match config.record.path {
        Some(ref path) => {
            let mut cfg = RecorderConfig::new(path);
            cfg.flush_interval = config.record.flush_interval();
            let tx = recorder::spawn_sample_recorder(cfg).map_err(|source| MonitorError::Io {
                path: path.clone(),
                source,
            })?;
            info!("Recording samples to {}", path.display());
            Some(tx)
        }
        None => None,
    };

    let (events_tx, events_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let consumer = tokio::spawn(consume_events(events_rx, recorder));

    let transport = TcpTransport::new(monitor.host.clone(), monitor.port)
        .with_backoff(Backoff::new(
            monitor.reconnect_delay(),
            monitor.reconnect_max_delay(),
        ))
        .spawn(shutdown.clone())?;
    info!("Connecting to monitor at {}", monitor.address());

    let session = MonitorSession::new(
        transport,
        MllpCodec::new(),
        decoder,
        SampleStore::new(config.buffers.size),
        stats.clone(),
    )
    .with_feed_request(feed, monitor.feed_request_delay())
    .with_events(events_tx);

    let store = session.run(shutdown).await?;

    // The session dropped its sender, so the consumer drains and exits
    let _ = consumer.await;
    info!("Session ended: {}", stats);

    Ok(store)
}

/// Log session events and forward samples to the recorder
async fn consume_events(mut events_rx: mpsc::Receiver<SessionEvent>, recorder: Option<SyncSender<SampleRecord>>) {
    let mut recorder = recorder;

    while let Some(event) = events_rx.recv().await {
        match event {
            SessionEvent::Connection { connected: true } => info!("Monitor link up"),
            SessionEvent::Connection { connected: false } => info!("Monitor link down"),
            SessionEvent::Sample(update) => {
                debug!(
                    "{} = {:?} ({} buffered)",
                    update.identifier,
                    update.sample.value.as_option(),
                    update.snapshot.len()
                );

                let Some(ref tx) = recorder else {
                    continue;
                };
                match tx.try_send(SampleRecord::now(update.identifier, update.sample.value)) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => debug!("Recorder queue full, sample dropped"),
                    Err(TrySendError::Disconnected(_)) => {
                        warn!("Recorder stopped, no further samples will be recorded");
                        recorder = None;
                    }
                }
            }
        }
    }
}
