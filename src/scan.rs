//! The buffered analog-scan acquisition loop.

use std::sync::Arc;
use std::thread::sleep;

use crate::cmd::{self, Status};
use crate::config::ScanConfig;
use crate::device::Daq;
use crate::sink::RecordingHeader;
use crate::usb::Transport;
use crate::Result;

/// One drained chunk of raw interleaved channel codes. Immutable after
/// creation; shared read-only between however many sinks consume it.
#[derive(Debug)]
pub struct Buffer {
    pub sequence: u32,
    pub bytes: Vec<u8>,
}

impl Buffer {
    /// The 2-byte little-endian sample of the `slot`th enabled channel in
    /// the first scan of this buffer.
    pub fn first_scan_sample(&self, slot: usize) -> Option<&[u8]> {
        let offset = slot * cmd::BYTES_PER_SAMPLE;
        self.bytes.get(offset..offset + cmd::BYTES_PER_SAMPLE)
    }

    /// All sample codes in scan order.
    pub fn codes(&self) -> impl Iterator<Item = u16> + '_ {
        self.bytes.chunks_exact(2).map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
    }
}

/// A buffer consumer. `accept` runs on the acquisition loop's thread and
/// must hand off or finish quickly; anything slow belongs on a worker.
/// Sinks travel with the runner onto whatever thread drives the scan.
pub trait Sink: Send {
    /// Offer one drained buffer together with its per-unit metadata.
    fn accept(&mut self, buffer: &Arc<Buffer>, header: &RecordingHeader);
    /// Block until all outstanding work for accepted buffers is complete.
    fn finish(self: Box<Self>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Armed,
    Streaming,
    Draining,
    Stopped,
    Failed,
}

#[derive(Debug)]
pub struct RunSummary {
    pub buffers_delivered: u32,
    pub bytes_read: u64,
    pub state: ScanState,
}

/// Owns the scan lifecycle: arm → stream → drain → stop. The device handle
/// is exclusively owned here for the duration of the run and closes when
/// the runner is dropped.
pub struct ScanRunner<T: Transport> {
    daq: Daq<T>,
    config: ScanConfig,
    sinks: Vec<Box<dyn Sink>>,
    state: ScanState,
}

impl<T: Transport> ScanRunner<T> {
    pub fn new(daq: Daq<T>, config: ScanConfig) -> ScanRunner<T> {
        ScanRunner { daq, config, sinks: Vec::new(), state: ScanState::Idle }
    }

    pub fn add_sink(&mut self, sink: Box<dyn Sink>) {
        self.sinks.push(sink);
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Run the scan to completion. Every spawned persistence task is
    /// awaited before this returns, on the success and the failure path
    /// alike.
    pub fn run(mut self) -> Result<RunSummary> {
        let result = match self.run_inner() {
            Ok((buffers_delivered, bytes_read)) => {
                self.state = ScanState::Stopped;
                Ok(RunSummary { buffers_delivered, bytes_read, state: self.state })
            }
            Err(error) => {
                self.state = ScanState::Failed;
                log::error!("scan failed: {}", error);
                // best-effort quiesce; the original error is what surfaces.
                // no retry: the device-side FIFO has finite depth, so by the
                // time a read fails the stream cannot be resynchronized
                if let Err(stop_error) = self.daq.stop_scan() {
                    log::warn!("stop after failure also failed: {}", stop_error);
                }
                sleep(cmd::SETTLE_DELAY);
                match self.daq.status() {
                    Ok(status) if status.contains(Status::AIN_SCAN_OVERRUN) =>
                        log::warn!("device reports a scan FIFO overrun"),
                    _ => (),
                }
                Err(error)
            }
        };
        for sink in self.sinks.drain(..) {
            sink.finish();
        }
        result
    }

    fn run_inner(&mut self) -> Result<(u32, u64)> {
        self.arm()?;

        // the device samples continuously into its internal ring buffer
        // from here on; pacing starts immediately unless the configuration
        // routes it to the external trigger input
        self.daq.start_scan(0, self.config.frequency, self.config.channel_mask(),
            self.config.scan_options())?;
        self.state = ScanState::Streaming;
        log::info!("scan: streaming at {} Hz on {} channels",
            self.config.frequency, self.config.enabled_channel_count());

        let bytes_per_buffer = self.config.bytes_per_buffer();
        let mut delivered = 0u32;
        let mut bytes_read = 0u64;
        loop {
            if let Some(total) = self.config.total_buffers {
                if delivered >= total.get() {
                    break;
                }
            }
            let mut bytes = vec![0u8; bytes_per_buffer];
            self.daq.read_scan(&mut bytes)?;
            bytes_read += bytes.len() as u64;
            self.state = ScanState::Draining;

            let buffer = Arc::new(Buffer { sequence: delivered, bytes });
            let header = RecordingHeader::new(&self.config, delivered);
            // strict scan order: every sink is offered this buffer before
            // the next read is issued
            for sink in self.sinks.iter_mut() {
                sink.accept(&buffer, &header);
            }
            delivered += 1;
            log::debug!("scan: delivered buffer {} ({} bytes)",
                buffer.sequence, bytes_per_buffer);
            self.state = ScanState::Streaming;
        }

        self.daq.stop_scan()?;
        sleep(cmd::SETTLE_DELAY);
        log::info!("scan: stopped after {} buffers ({} bytes)", delivered, bytes_read);
        Ok((delivered, bytes_read))
    }

    fn arm(&mut self) -> Result<()> {
        // a prior scan may still be running and the FIFO may hold stale
        // samples; ranges can only be committed on a stopped, empty device
        self.daq.stop_scan()?;
        sleep(cmd::SETTLE_DELAY);
        self.daq.clear_scan_buffer()?;
        self.daq.set_scan_ranges(&self.config.ranges())?;
        sleep(cmd::SETTLE_DELAY);
        self.state = ScanState::Armed;
        log::debug!("scan: armed");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::config::ConfigDocument;
    use crate::usb::sim::{Op, SimTransport};
    use crate::Error;

    const SCENARIO: &str = r#"{
        "scans_per_buffer": 256,
        "total_buffers": 10,
        "analog_input": {
            "frequency": 20000,
            "channels": [{"range": "10V"}]
        }
    }"#;

    fn scenario_config() -> ScanConfig {
        ConfigDocument::from_json(SCENARIO).unwrap().scan_config().unwrap()
    }

    #[derive(Default)]
    struct Probe {
        sequences: Vec<u32>,
        lengths: Vec<usize>,
        data: Vec<u8>,
        finished: bool,
    }

    struct ProbeSink {
        probe: Arc<Mutex<Probe>>,
    }

    impl Sink for ProbeSink {
        fn accept(&mut self, buffer: &Arc<Buffer>, header: &RecordingHeader) {
            assert_eq!(header.sequence, buffer.sequence);
            let mut probe = self.probe.lock().unwrap();
            probe.sequences.push(buffer.sequence);
            probe.lengths.push(buffer.bytes.len());
            probe.data.extend_from_slice(&buffer.bytes);
        }

        fn finish(self: Box<Self>) {
            self.probe.lock().unwrap().finished = true;
        }
    }

    fn probed_runner(transport: SimTransport) -> (ScanRunner<SimTransport>, Arc<Mutex<Probe>>) {
        let probe = Arc::new(Mutex::new(Probe::default()));
        let mut runner = ScanRunner::new(Daq::new(transport), scenario_config());
        runner.add_sink(Box::new(ProbeSink { probe: Arc::clone(&probe) }));
        (runner, probe)
    }

    #[test]
    fn test_counted_run_delivers_in_order() {
        let transport = SimTransport::new();
        let journal = transport.journal();
        let (runner, probe) = probed_runner(transport);
        let summary = runner.run().unwrap();

        assert_eq!(summary.buffers_delivered, 10);
        assert_eq!(summary.bytes_read, 5120);
        assert_eq!(summary.state, ScanState::Stopped);

        let probe = probe.lock().unwrap();
        assert_eq!(probe.sequences, (0..10).collect::<Vec<_>>());
        assert!(probe.lengths.iter().all(|&len| len == 512));
        assert!(probe.finished);

        let ops = journal.lock().unwrap();
        assert_eq!(ops[0], Op::StopScan);
        assert_eq!(ops[1], Op::ClearFifo);
        assert_eq!(ops[2], Op::ConfigRanges(vec![0; 8]));
        assert_eq!(ops[3], Op::StartScan {
            count: 0, pacer_period: 1999, channel_mask: 0b0000_0001, options: 0,
        });
        assert!(ops[4..14].iter().all(|op| *op == Op::ReadScan(512)));
        assert_eq!(ops[14], Op::StopScan);
        assert_eq!(ops.len(), 15);
    }

    #[test]
    fn test_buffers_carry_the_stream_verbatim() {
        let (runner, probe) = probed_runner(SimTransport::new());
        runner.run().unwrap();

        let probe = probe.lock().unwrap();
        // the simulated device produces one continuous ramp; any skipped,
        // duplicated or reordered buffer would break it
        let stream = Buffer { sequence: 0, bytes: probe.data.clone() };
        assert_eq!(stream.codes().collect::<Vec<_>>(), (0..2560).collect::<Vec<_>>());
    }

    #[test]
    fn test_read_failure_stops_the_run() {
        let transport = SimTransport::new().fail_read_at(3);
        let journal = transport.journal();
        let (runner, probe) = probed_runner(transport);
        let error = runner.run().unwrap_err();
        assert!(matches!(error, Error::Usb(_)));

        let probe = probe.lock().unwrap();
        // exactly three buffers made it to the sinks before the failure,
        // and the sink was still flushed
        assert_eq!(probe.sequences, vec![0, 1, 2]);
        assert!(probe.finished);

        let ops = journal.lock().unwrap();
        let reads = ops.iter().filter(|op| matches!(op, Op::ReadScan(_))).count();
        assert_eq!(reads, 4);
        // no read is issued after the failure; the loop quiesces the device
        assert_eq!(*ops.last().unwrap(), Op::StopScan);
    }

    fn scratch_dir(label: &str) -> std::path::PathBuf {
        use std::sync::atomic::{AtomicU32, Ordering};
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        std::env::temp_dir().join(format!("mcc1608fs-{}-{}-{}",
            label, std::process::id(), COUNTER.fetch_add(1, Ordering::Relaxed)))
    }

    #[test]
    fn test_counted_run_persists_artifact_pairs() {
        use crate::sink::RecordingSink;

        let dir = scratch_dir("scan");
        let mut runner = ScanRunner::new(Daq::new(SimTransport::new()), scenario_config());
        runner.add_sink(Box::new(
            RecordingSink::new(&dir).unwrap().with_rtc(false)));
        let summary = runner.run().unwrap();
        assert_eq!(summary.state, ScanState::Stopped);

        let base = dir.file_name().unwrap().to_string_lossy().into_owned();
        for sequence in 0..10 {
            let dat = std::fs::read(dir.join(format!("{}_{}.dat", base, sequence))).unwrap();
            assert_eq!(dat.len(), 512);
            assert!(dir.join(format!("{}_{}.hdr", base, sequence)).exists());
        }
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_persistence_failure_does_not_stop_the_run() {
        use crate::sink::RecordingSink;

        let dir = scratch_dir("scan-fail");
        let mut runner = ScanRunner::new(Daq::new(SimTransport::new()), scenario_config());
        let sink = RecordingSink::new(&dir).unwrap().with_rtc(false);
        // every artifact write fails once the directory is gone, yet all
        // ten buffers are still read and offered
        std::fs::remove_dir_all(&dir).unwrap();
        runner.add_sink(Box::new(sink));
        let summary = runner.run().unwrap();
        assert_eq!(summary.buffers_delivered, 10);
        assert_eq!(summary.state, ScanState::Stopped);
    }

    #[test]
    fn test_every_sink_sees_every_buffer() {
        let transport = SimTransport::new();
        let probe_a = Arc::new(Mutex::new(Probe::default()));
        let probe_b = Arc::new(Mutex::new(Probe::default()));
        let mut runner = ScanRunner::new(Daq::new(transport), scenario_config());
        runner.add_sink(Box::new(ProbeSink { probe: Arc::clone(&probe_a) }));
        runner.add_sink(Box::new(ProbeSink { probe: Arc::clone(&probe_b) }));
        runner.run().unwrap();

        let sequences = (0..10).collect::<Vec<_>>();
        assert_eq!(probe_a.lock().unwrap().sequences, sequences);
        assert_eq!(probe_b.lock().unwrap().sequences, sequences);
    }
}
