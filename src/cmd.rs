//! Vendor command set of the USB-1608FS-Plus.

#![allow(dead_code)]

use std::time::Duration;

use bitflags::bitflags;

pub const VENDOR_ID: u16 = 0x09db;
pub const PRODUCT_ID: u16 = 0x00ea;

/// Bulk endpoint carrying scan data, device to host.
pub const EP_SCAN_IN: u8 = 0x81;

pub const NUM_CHANNELS: usize = 8;
pub const BYTES_PER_SAMPLE: usize = 2;

/// Base clock of the internal scan pacer.
pub const PACER_CLOCK_HZ: f64 = 40_000_000.0;
/// Highest supported per-channel sample rate.
pub const MAX_SAMPLE_RATE_HZ: f64 = 100_000.0;
/// Sustained aggregate throughput the bulk pipe can keep up with,
/// in samples per second across all enabled channels.
pub const MAX_THROUGHPUT_SPS: f64 = 400_000.0;

/// Quiescence window after each scan-control operation. The device firmware
/// corrupts its scan state if the next control operation arrives sooner.
pub const SETTLE_DELAY: Duration = Duration::from_millis(100);

pub const CONTROL_TIMEOUT: Duration = Duration::from_secs(1);

// Vendor request codes.

/// Single analog input read.
pub const AIN: u8 = 0x10;
/// Start a paced analog input scan.
pub const AIN_SCAN_START: u8 = 0x11;
/// Stop any analog input scan in progress.
pub const AIN_SCAN_STOP: u8 = 0x12;
/// Commit the per-channel voltage range table.
pub const AIN_CONFIG: u8 = 0x14;
/// Discard any samples pending in the device-side scan FIFO.
pub const AIN_CLEAR_FIFO: u8 = 0x15;
/// Calibration memory read; `wValue` is the byte offset.
pub const CAL_MEMORY: u8 = 0x30;
/// Blink the device LED `data[0]` times.
pub const BLINK_LED: u8 = 0x41;
pub const RESET: u8 = 0x42;
pub const STATUS: u8 = 0x44;
/// Serial number, 8 ASCII bytes.
pub const SERIAL: u8 = 0x48;

/// Calibration memory: (slope, intercept) `f32` pairs, range-major.
pub const CAL_MEMORY_LEN: usize = 4 * NUM_CHANNELS * 8;

bitflags! {
    /// Options byte of `AIN_SCAN_START`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ScanOptions: u8 {
        /// Transfer each sample as soon as it is taken instead of in
        /// endpoint-sized blocks.
        const IMMEDIATE_TRANSFER = 1 << 0;
        /// Drive the pacer clock onto the SYNC pin.
        const PACER_OUT          = 1 << 1;
        /// Wait for a rising edge on the external trigger input instead of
        /// starting immediately.
        const EXT_TRIGGER        = 1 << 2;
        /// Re-arm the external trigger after each counted scan.
        const RETRIGGER          = 1 << 5;
        /// Keep the bulk pipe alive on a FIFO overrun instead of stalling.
        const INHIBIT_STALL      = 1 << 7;
    }
}

bitflags! {
    /// Device status word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Status: u16 {
        const AIN_SCAN_RUNNING = 1 << 1;
        const AIN_SCAN_OVERRUN = 1 << 2;
    }
}
