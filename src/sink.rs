//! Buffer consumers: timestamped file persistence and the live text view.
//! Both run their slow work off the acquisition loop's critical path.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::{fs, thread};

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::calibration::{GainTable, VoltageRange};
use crate::config::ScanConfig;
use crate::scan::{Buffer, Sink};
use crate::Result;

/// Per-output-unit metadata; serialized once per `.hdr` artifact.
#[derive(Debug, Clone, Serialize)]
pub struct RecordingHeader {
    /// Base name of the artifact pair; filled in by the recording sink.
    pub output_file: String,
    pub sequence: u32,
    pub system_time: DateTime<Local>,
    /// External real-time-clock reading, when one is available.
    pub rtc_time: Option<String>,
    #[serde(flatten)]
    pub scan: ScanConfig,
}

impl RecordingHeader {
    pub fn new(scan: &ScanConfig, sequence: u32) -> RecordingHeader {
        RecordingHeader {
            output_file: String::new(),
            sequence,
            system_time: Local::now(),
            rtc_time: None,
            scan: scan.clone(),
        }
    }
}

/// Persists each buffer as a `{base}_{sequence}.dat` / `.hdr` pair inside
/// the output directory. Writes run on their own threads; a failed write
/// loses exactly that artifact and is only logged.
pub struct RecordingSink {
    dir: PathBuf,
    base: String,
    read_rtc: bool,
    writers: Vec<JoinHandle<()>>,
}

impl RecordingSink {
    /// Create the output directory and derive the artifact base name from
    /// its final path component.
    pub fn new(output_dir: &Path) -> Result<RecordingSink> {
        fs::create_dir_all(output_dir)?;
        let base = output_dir.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "scan".to_string());
        Ok(RecordingSink {
            dir: output_dir.to_owned(),
            base,
            read_rtc: true,
            writers: Vec::new(),
        })
    }

    /// Whether each header records an external `hwclock -r` reading.
    pub fn with_rtc(mut self, read_rtc: bool) -> RecordingSink {
        self.read_rtc = read_rtc;
        self
    }
}

impl Sink for RecordingSink {
    fn accept(&mut self, buffer: &Arc<Buffer>, header: &RecordingHeader) {
        // writers that already completed can be reaped without blocking,
        // so a long run holds a bounded set of handles
        self.writers.retain(|writer| !writer.is_finished());

        let mut header = header.clone();
        header.output_file = self.base.clone();
        let sequence = header.sequence;

        let hdr_path = self.dir.join(format!("{}_{}.hdr", self.base, sequence));
        let read_rtc = self.read_rtc;
        self.writers.push(thread::spawn(move || {
            if read_rtc {
                header.rtc_time = Some(read_rtc_time());
            }
            let json = serde_json::to_vec_pretty(&header)
                .unwrap_or_else(|_| b"Bad header".to_vec());
            if let Err(error) = fs::write(&hdr_path, &json) {
                log::error!("failed to write {}: {}", hdr_path.display(), error);
            }
        }));

        let dat_path = self.dir.join(format!("{}_{}.dat", self.base, sequence));
        let buffer = Arc::clone(buffer);
        self.writers.push(thread::spawn(move || {
            log::info!("writing {}", dat_path.display());
            if let Err(error) = fs::write(&dat_path, &buffer.bytes) {
                log::error!("failed to write {}: {}", dat_path.display(), error);
            }
        }));
    }

    fn finish(mut self: Box<Self>) {
        for writer in self.writers.drain(..) {
            if writer.join().is_err() {
                log::error!("artifact writer panicked");
            }
        }
    }
}

fn read_rtc_time() -> String {
    match Command::new("hwclock").arg("-r").output() {
        Ok(output) if output.status.success() =>
            String::from_utf8_lossy(&output.stdout).trim().to_string(),
        _ => {
            log::warn!("hwclock -r failed, recording placeholder");
            "bad hwclock call".to_string()
        }
    }
}

/// How many channels the live view shows at most.
pub const DISPLAY_CHANNELS: usize = 6;

#[derive(Debug, Clone)]
pub struct ChannelReadout {
    pub description: String,
    pub range: VoltageRange,
    pub code: u16,
    /// Converted value, or the conversion error text for this one reading.
    pub volts: std::result::Result<f64, String>,
}

#[derive(Debug, Clone, Default)]
pub struct DisplaySnapshot {
    /// Sequence number of the most recent buffer rendered into this
    /// snapshot.
    pub sequence: u32,
    pub bytes_read: u64,
    pub frequency: f64,
    pub channels: Vec<ChannelReadout>,
}

/// Publishes the first sample of up to [`DISPLAY_CHANNELS`] enabled
/// channels from the most recent buffer. Never blocks the acquisition
/// loop: when the renderer holds the snapshot, the update is dropped and
/// the next buffer carries fresher data anyway.
pub struct LiveSink {
    gain: Arc<GainTable>,
    shared: Arc<Mutex<DisplaySnapshot>>,
    bytes_read: u64,
}

impl LiveSink {
    pub fn new(gain: Arc<GainTable>) -> LiveSink {
        LiveSink {
            gain,
            shared: Arc::new(Mutex::new(DisplaySnapshot::default())),
            bytes_read: 0,
        }
    }

    /// Handle the renderer reads from; stays valid after the sink is
    /// consumed by the pipeline.
    pub fn snapshot_handle(&self) -> Arc<Mutex<DisplaySnapshot>> {
        Arc::clone(&self.shared)
    }
}

impl Sink for LiveSink {
    fn accept(&mut self, buffer: &Arc<Buffer>, header: &RecordingHeader) {
        self.bytes_read += buffer.bytes.len() as u64;

        let mut channels = Vec::with_capacity(DISPLAY_CHANNELS);
        for (slot, channel) in header.scan.enabled_channels()
                .take(DISPLAY_CHANNELS).enumerate() {
            let raw = buffer.first_scan_sample(slot).unwrap_or(&[]);
            let code = match raw {
                &[lo, hi] => u16::from_le_bytes([lo, hi]),
                _ => 0,
            };
            let volts = self.gain
                .volts(channel.index as usize, channel.range, raw)
                .map_err(|error| error.to_string());
            channels.push(ChannelReadout {
                description: channel.description.clone(),
                range: channel.range,
                code,
                volts,
            });
        }

        let snapshot = DisplaySnapshot {
            sequence: buffer.sequence,
            bytes_read: self.bytes_read,
            frequency: header.scan.frequency,
            channels,
        };
        if let Ok(mut shared) = self.shared.try_lock() {
            *shared = snapshot;
        }
    }

    fn finish(self: Box<Self>) {}
}
