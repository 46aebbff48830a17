//! Configuration documents and the validated scan parameters derived
//! from them.

use std::num::NonZeroU32;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::calibration::VoltageRange;
use crate::cmd::{self, ScanOptions};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pacing {
    /// The internal pacer clock starts immediately on scan start.
    #[default]
    Internal,
    /// Sampling waits for a rising edge on the external trigger input.
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    /// Samples accumulate into endpoint-sized blocks before transfer.
    #[default]
    Block,
    /// Each sample is transferred as soon as it is taken.
    Immediate,
}

fn default_enabled() -> bool {
    true
}

/// One channel entry of the `analog_input.channels` array. Position in the
/// array selects the physical channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub range: VoltageRange,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalogInputConfig {
    /// Per-channel sample rate in Hz.
    pub frequency: f64,
    #[serde(default)]
    pub pacing: Pacing,
    #[serde(default)]
    pub transfer_mode: TransferMode,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpiGpio {
    pub gpio: u32,
    pub output: String,
}

/// The JSON configuration document shared by all entry points. GPIO fields
/// are parsed here but consumed by the external GPIO collaborator, never by
/// the acquisition pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigDocument {
    #[serde(default)]
    pub daq_sn: Option<String>,
    #[serde(default)]
    pub output_file: Option<String>,
    #[serde(default)]
    pub disable_gpio3: bool,
    #[serde(default)]
    pub rpi: Vec<RpiGpio>,
    #[serde(default)]
    pub scans_per_buffer: u32,
    #[serde(default, alias = "num_files")]
    pub total_buffers: u32,
    pub analog_input: AnalogInputConfig,
}

impl ConfigDocument {
    pub fn from_path(path: impl AsRef<Path>) -> Result<ConfigDocument> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<ConfigDocument> {
        serde_json::from_str(text)
            .map_err(|error| Error::config("document", error.to_string()))
    }

    /// Validate the document against the device limits and produce the
    /// immutable parameters for one run.
    pub fn scan_config(&self) -> Result<ScanConfig> {
        let input = &self.analog_input;
        if !input.frequency.is_finite() || input.frequency <= 0.0 {
            return Err(Error::config("analog_input.frequency",
                "must be a positive sample rate in Hz"));
        }
        if input.frequency > cmd::MAX_SAMPLE_RATE_HZ {
            return Err(Error::config("analog_input.frequency",
                format!("{} Hz exceeds the {} Hz device limit",
                    input.frequency, cmd::MAX_SAMPLE_RATE_HZ)));
        }
        if input.channels.len() > cmd::NUM_CHANNELS {
            return Err(Error::config("analog_input.channels",
                format!("device has {} channels", cmd::NUM_CHANNELS)));
        }

        let channels = (0..cmd::NUM_CHANNELS)
            .map(|index| {
                let entry = input.channels.get(index);
                Channel {
                    index: index as u8,
                    enabled: entry.map_or(false, |entry| entry.enabled),
                    range: entry.map_or_else(Default::default, |entry| entry.range),
                    description: match entry {
                        Some(entry) if !entry.description.is_empty() =>
                            entry.description.clone(),
                        _ => format!("ch{}", index),
                    },
                }
            })
            .collect::<Vec<_>>();

        let enabled = channels.iter().filter(|channel| channel.enabled).count();
        if enabled == 0 {
            return Err(Error::config("analog_input.channels",
                "at least one channel must be enabled"));
        }
        if self.scans_per_buffer == 0 {
            return Err(Error::config("scans_per_buffer", "must be positive"));
        }
        let total_buffers = NonZeroU32::new(self.total_buffers)
            .ok_or_else(|| Error::config("total_buffers", "must be positive"))?;
        let aggregate = input.frequency * enabled as f64;
        if aggregate > cmd::MAX_THROUGHPUT_SPS {
            return Err(Error::config("analog_input.frequency",
                format!("aggregate {} S/s over {} channels exceeds the sustained \
                         {} S/s bulk throughput", aggregate, enabled, cmd::MAX_THROUGHPUT_SPS)));
        }

        Ok(ScanConfig {
            frequency: input.frequency,
            channels,
            scans_per_buffer: self.scans_per_buffer as usize,
            total_buffers: Some(total_buffers),
            pacing: input.pacing,
            transfer_mode: input.transfer_mode,
        })
    }
}

/// One physical input line. Immutable once a scan is armed.
#[derive(Debug, Clone, Serialize)]
pub struct Channel {
    pub index: u8,
    pub enabled: bool,
    pub range: VoltageRange,
    pub description: String,
}

/// Validated acquisition parameters, immutable for the duration of a run.
#[derive(Debug, Clone, Serialize)]
pub struct ScanConfig {
    pub frequency: f64,
    /// Always [`cmd::NUM_CHANNELS`] entries, disabled channels included.
    pub channels: Vec<Channel>,
    pub scans_per_buffer: usize,
    /// `None` runs continuously until the transport fails; the JSON path
    /// always produces a count.
    pub total_buffers: Option<NonZeroU32>,
    pub pacing: Pacing,
    pub transfer_mode: TransferMode,
}

impl ScanConfig {
    pub fn enabled_channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter().filter(|channel| channel.enabled)
    }

    pub fn enabled_channel_count(&self) -> usize {
        self.enabled_channels().count()
    }

    pub fn channel_mask(&self) -> u8 {
        self.enabled_channels().fold(0, |mask, channel| mask | 1 << channel.index)
    }

    pub fn ranges(&self) -> [VoltageRange; cmd::NUM_CHANNELS] {
        let mut ranges = [VoltageRange::default(); cmd::NUM_CHANNELS];
        for channel in &self.channels {
            ranges[channel.index as usize] = channel.range;
        }
        ranges
    }

    /// Byte length of one drained buffer:
    /// `scans_per_buffer × enabled channels × 2`.
    pub fn bytes_per_buffer(&self) -> usize {
        self.scans_per_buffer * self.enabled_channel_count() * cmd::BYTES_PER_SAMPLE
    }

    pub fn scan_options(&self) -> ScanOptions {
        let mut options = ScanOptions::empty();
        if let TransferMode::Immediate = self.transfer_mode {
            options |= ScanOptions::IMMEDIATE_TRANSFER;
        }
        if let Pacing::External = self.pacing {
            options |= ScanOptions::EXT_TRIGGER;
        }
        options
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn document(text: &str) -> ConfigDocument {
        ConfigDocument::from_json(text).unwrap()
    }

    fn rejected_field(text: &str) -> &'static str {
        match document(text).scan_config() {
            Err(Error::Config { field, .. }) => field,
            other => panic!("expected ConfigError, got {:?}", other),
        }
    }

    const SINGLE_CHANNEL: &str = r#"{
        "scans_per_buffer": 256,
        "total_buffers": 10,
        "analog_input": {
            "frequency": 20000,
            "channels": [{"range": "10V", "description": "accel_x"}]
        }
    }"#;

    #[test]
    fn test_single_channel_document() {
        let config = document(SINGLE_CHANNEL).scan_config().unwrap();
        assert_eq!(config.enabled_channel_count(), 1);
        assert_eq!(config.channel_mask(), 0b0000_0001);
        assert_eq!(config.bytes_per_buffer(), 512);
        assert_eq!(config.total_buffers.unwrap().get(), 10);
        assert_eq!(config.channels[0].description, "accel_x");
        // channels not named by the document exist but stay disabled
        assert_eq!(config.channels.len(), cmd::NUM_CHANNELS);
        assert!(!config.channels[7].enabled);
        assert_eq!(config.channels[7].description, "ch7");
        assert_eq!(config.scan_options(), ScanOptions::empty());
    }

    #[test]
    fn test_num_files_alias() {
        let config = document(r#"{
            "scans_per_buffer": 64,
            "num_files": 3,
            "analog_input": {"frequency": 1000, "channels": [{}]}
        }"#).scan_config().unwrap();
        assert_eq!(config.total_buffers.unwrap().get(), 3);
    }

    #[test]
    fn test_app_fields_parsed() {
        let document = document(r#"{
            "daq_sn": "01ACD334",
            "output_file": "/data/run42",
            "disable_gpio3": true,
            "rpi": [{"gpio": 18, "output": "high"}],
            "scans_per_buffer": 1,
            "total_buffers": 1,
            "analog_input": {"frequency": 100, "channels": [{}]}
        }"#);
        assert_eq!(document.daq_sn.as_deref(), Some("01ACD334"));
        assert_eq!(document.output_file.as_deref(), Some("/data/run42"));
        assert!(document.disable_gpio3);
        assert_eq!(document.rpi[0].gpio, 18);
        assert_eq!(document.rpi[0].output, "high");
    }

    #[test]
    fn test_range_spellings() {
        let config = document(r#"{
            "scans_per_buffer": 1,
            "total_buffers": 1,
            "analog_input": {"frequency": 100,
                "channels": [{"range": "5V"}, {"range": "±2V"}]}
        }"#).scan_config().unwrap();
        assert_eq!(config.channels[0].range, VoltageRange::Bip5V);
        assert_eq!(config.channels[1].range, VoltageRange::Bip2V);
    }

    #[test]
    fn test_external_pacing_and_immediate_transfer() {
        let config = document(r#"{
            "scans_per_buffer": 1,
            "total_buffers": 1,
            "analog_input": {"frequency": 100, "pacing": "external",
                "transfer_mode": "immediate", "channels": [{}]}
        }"#).scan_config().unwrap();
        assert_eq!(config.scan_options(),
            ScanOptions::EXT_TRIGGER | ScanOptions::IMMEDIATE_TRANSFER);
    }

    #[test]
    fn test_rejects_zero_scans_per_buffer() {
        assert_eq!(rejected_field(r#"{
            "scans_per_buffer": 0,
            "total_buffers": 1,
            "analog_input": {"frequency": 100, "channels": [{}]}
        }"#), "scans_per_buffer");
    }

    #[test]
    fn test_rejects_missing_total_buffers() {
        assert_eq!(rejected_field(r#"{
            "scans_per_buffer": 16,
            "analog_input": {"frequency": 100, "channels": [{}]}
        }"#), "total_buffers");
    }

    #[test]
    fn test_rejects_no_enabled_channels() {
        assert_eq!(rejected_field(r#"{
            "scans_per_buffer": 16,
            "total_buffers": 1,
            "analog_input": {"frequency": 100,
                "channels": [{"enabled": false}]}
        }"#), "analog_input.channels");
        assert_eq!(rejected_field(r#"{
            "scans_per_buffer": 16,
            "total_buffers": 1,
            "analog_input": {"frequency": 100, "channels": []}
        }"#), "analog_input.channels");
    }

    #[test]
    fn test_rejects_too_many_channels() {
        assert_eq!(rejected_field(r#"{
            "scans_per_buffer": 16,
            "total_buffers": 1,
            "analog_input": {"frequency": 100,
                "channels": [{}, {}, {}, {}, {}, {}, {}, {}, {}]}
        }"#), "analog_input.channels");
    }

    #[test]
    fn test_rejects_unsupported_sample_rate() {
        assert_eq!(rejected_field(r#"{
            "scans_per_buffer": 16,
            "total_buffers": 1,
            "analog_input": {"frequency": 0, "channels": [{}]}
        }"#), "analog_input.frequency");
        assert_eq!(rejected_field(r#"{
            "scans_per_buffer": 16,
            "total_buffers": 1,
            "analog_input": {"frequency": 200000, "channels": [{}]}
        }"#), "analog_input.frequency");
    }

    #[test]
    fn test_rejects_aggregate_throughput() {
        // 80 kHz × 8 channels = 640 kS/s, above the 400 kS/s bulk ceiling
        assert_eq!(rejected_field(r#"{
            "scans_per_buffer": 16,
            "total_buffers": 1,
            "analog_input": {"frequency": 80000,
                "channels": [{}, {}, {}, {}, {}, {}, {}, {}]}
        }"#), "analog_input.frequency");
    }

    #[test]
    fn test_rejects_malformed_document() {
        assert!(matches!(ConfigDocument::from_json("{not json"),
            Err(Error::Config { field: "document", .. })));
    }

    #[test]
    fn test_channel_mask_skips_disabled() {
        let config = document(r#"{
            "scans_per_buffer": 1,
            "total_buffers": 1,
            "analog_input": {"frequency": 100,
                "channels": [{}, {"enabled": false}, {}]}
        }"#).scan_config().unwrap();
        assert_eq!(config.channel_mask(), 0b0000_0101);
        assert_eq!(config.enabled_channel_count(), 2);
        assert_eq!(config.bytes_per_buffer(), 4);
    }
}
