//! JSON-lines sample recorder
//!
//! The session must stay responsive, so recording is implemented as:
//! - a bounded queue (non-blocking `try_send`)
//! - a dedicated thread with buffered writes and periodic flush
//!
//! Each sample becomes one line:
//!
//! ```text
//! {"101^HR": 85, "time": 1709800000.25}
//! ```
//!
//! Missing readings are written as the monitor sent them (`-100`).

use crate::constants::{DEFAULT_RECORD_FLUSH_MS, RECORDER_CHANNEL_CAPACITY};
use crate::hl7::MISSING_VALUE_SENTINEL;
use crate::store::SampleValue;
use serde_json::{Map, Value};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::thread;
use std::time::{Duration, Instant};
use tracing::warn;

/// One recorded reading
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRecord {
    /// Channel identifier as sent by the monitor (e.g. `101^HR`)
    pub identifier: String,
    pub value: SampleValue,
    /// Seconds since the Unix epoch
    pub time: f64,
}

impl SampleRecord {
    /// Record stamped with the current wall-clock time
    pub fn now(identifier: impl Into<String>, value: SampleValue) -> Self {
        let now = chrono::Utc::now();
        Self {
            identifier: identifier.into(),
            value,
            time: now.timestamp_micros() as f64 / 1_000_000.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub path: PathBuf,
    pub flush_interval: Duration,
    pub channel_capacity: usize,
}

impl RecorderConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            flush_interval: Duration::from_millis(DEFAULT_RECORD_FLUSH_MS),
            channel_capacity: RECORDER_CHANNEL_CAPACITY,
        }
    }
}

/// Open the output file and start the writer thread
///
/// The file is appended to. Dropping every sender stops the thread after
/// a final flush.
pub fn spawn_sample_recorder(cfg: RecorderConfig) -> io::Result<SyncSender<SampleRecord>> {
    if let Some(parent) = cfg.path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let file = OpenOptions::new().create(true).append(true).open(&cfg.path)?;
    let (tx, rx) = sync_channel::<SampleRecord>(cfg.channel_capacity.max(1));

    thread::Builder::new()
        .name("bedside-link-recorder".to_string())
        .spawn(move || run_recorder(rx, cfg, file))?;

    Ok(tx)
}

fn run_recorder(rx: Receiver<SampleRecord>, cfg: RecorderConfig, file: File) {
    let flush_interval = if cfg.flush_interval.is_zero() {
        Duration::from_millis(DEFAULT_RECORD_FLUSH_MS)
    } else {
        cfg.flush_interval
    };

    let mut writer = BufWriter::new(file);
    let mut dirty = false;
    let mut last_flush = Instant::now();

    loop {
        match rx.recv_timeout(flush_interval) {
            Ok(record) => {
                let line = format_record(&record);
                match write_line(&mut writer, &line) {
                    Ok(()) => dirty = true,
                    Err(e) => {
                        warn!("Recording to {} failed: {}", cfg.path.display(), e);
                        break;
                    }
                }

                if last_flush.elapsed() >= flush_interval {
                    let _ = writer.flush();
                    dirty = false;
                    last_flush = Instant::now();
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if dirty {
                    let _ = writer.flush();
                    dirty = false;
                    last_flush = Instant::now();
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = writer.flush();
                break;
            }
        }
    }
}

fn write_line(writer: &mut BufWriter<File>, line: &str) -> io::Result<()> {
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\n")?;
    Ok(())
}

/// Serialize a record as a single JSON object
pub fn format_record(record: &SampleRecord) -> String {
    let mut object = Map::new();
    object.insert(
        record.identifier.clone(),
        Value::from(record.value.as_option().unwrap_or(MISSING_VALUE_SENTINEL)),
    );
    object.insert("time".to_string(), Value::from(record.time));
    Value::Object(object).to_string()
}
