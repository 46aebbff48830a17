//! Per-channel calibration and raw-code to voltage conversion.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cmd;
use crate::{Error, Result};

/// Mid-scale code of the bipolar 16-bit converter.
const BIPOLAR_ZERO: f64 = 32768.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VoltageRange {
    #[default]
    #[serde(rename = "10V", alias = "±10V")]
    Bip10V,
    #[serde(rename = "5V", alias = "±5V")]
    Bip5V,
    #[serde(rename = "2V", alias = "±2V")]
    Bip2V,
    #[serde(rename = "1V", alias = "±1V")]
    Bip1V,
}

impl VoltageRange {
    pub const ALL: [VoltageRange; 4] = [
        VoltageRange::Bip10V,
        VoltageRange::Bip5V,
        VoltageRange::Bip2V,
        VoltageRange::Bip1V,
    ];

    pub(crate) fn code(self) -> u8 {
        match self {
            Self::Bip10V => 0,
            Self::Bip5V  => 1,
            Self::Bip2V  => 2,
            Self::Bip1V  => 3,
        }
    }

    pub fn from_code(code: u8) -> Result<VoltageRange> {
        match code {
            0 => Ok(Self::Bip10V),
            1 => Ok(Self::Bip5V),
            2 => Ok(Self::Bip2V),
            3 => Ok(Self::Bip1V),
            _ => Err(Error::UnsupportedRange(code)),
        }
    }

    /// Half-span of the range in volts.
    pub fn full_scale(self) -> f64 {
        match self {
            Self::Bip10V => 10.0,
            Self::Bip5V  => 5.0,
            Self::Bip2V  => 2.0,
            Self::Bip1V  => 1.0,
        }
    }
}

impl fmt::Display for VoltageRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "±{}V", self.full_scale())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationEntry {
    pub slope: f64,
    pub intercept: f64,
}

impl Default for CalibrationEntry {
    fn default() -> Self {
        CalibrationEntry { slope: 1.0, intercept: 0.0 }
    }
}

/// Per-(range, channel) calibration coefficients, read once from device
/// calibration memory before the first scan and immutable afterwards.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GainTable {
    entries: [[CalibrationEntry; cmd::NUM_CHANNELS]; 4],
}

impl GainTable {
    /// Parse a raw calibration memory image: little-endian `f32`
    /// (slope, intercept) pairs laid out range-major.
    pub fn parse(image: &[u8; cmd::CAL_MEMORY_LEN]) -> GainTable {
        let mut entries = [[CalibrationEntry::default(); cmd::NUM_CHANNELS]; 4];
        for (index, pair) in image.chunks_exact(8).enumerate() {
            let slope = f32::from_le_bytes(pair[0..4].try_into().unwrap()) as f64;
            let intercept = f32::from_le_bytes(pair[4..8].try_into().unwrap()) as f64;
            entries[index / cmd::NUM_CHANNELS][index % cmd::NUM_CHANNELS] =
                CalibrationEntry { slope, intercept };
        }
        GainTable { entries }
    }

    pub fn entry(&self, channel: usize, range: VoltageRange) -> CalibrationEntry {
        self.entries[range.code() as usize][channel]
    }

    /// Convert the 2-byte little-endian sample of `channel` into volts.
    pub fn volts(&self, channel: usize, range: VoltageRange, raw: &[u8]) -> Result<f64> {
        convert(raw, range, self.entry(channel, range))
    }
}

/// Apply calibration and scale one raw sample code to volts.
///
/// Pure, no side effects; safe to call concurrently from multiple sinks on
/// the same buffer. The calibrated code is clamped to the 16-bit domain
/// before scaling, so a pathological gain table cannot push a reading
/// outside the range span.
pub fn convert(raw: &[u8], range: VoltageRange, cal: CalibrationEntry) -> Result<f64> {
    let code = match raw {
        &[lo, hi] => u16::from_le_bytes([lo, hi]),
        _ => return Err(Error::TruncatedSample { len: raw.len() }),
    };
    let calibrated = (f64::from(code) * cal.slope + cal.intercept).clamp(0.0, 65535.0);
    Ok((calibrated - BIPOLAR_ZERO) / BIPOLAR_ZERO * range.full_scale())
}
