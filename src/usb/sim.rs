//! Scripted transport for exercising the pipeline without hardware.

use std::sync::{Arc, Mutex};

use crate::cmd;
use crate::{Error, Result};

/// One recorded transport operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    StopScan,
    ClearFifo,
    ConfigRanges(Vec<u8>),
    StartScan { count: u32, pacer_period: u32, channel_mask: u8, options: u8 },
    Blink(u8),
    ReadScan(usize),
}

pub struct SimTransport {
    ops: Arc<Mutex<Vec<Op>>>,
    serial: String,
    cal_image: Vec<u8>,
    fail_read_at: Option<usize>,
    reads_issued: usize,
    next_code: u16,
}

impl SimTransport {
    pub fn new() -> SimTransport {
        SimTransport {
            ops: Arc::new(Mutex::new(Vec::new())),
            serial: "01ABCDEF".into(),
            cal_image: identity_cal_image(),
            fail_read_at: None,
            reads_issued: 0,
            next_code: 0,
        }
    }

    /// Fail the zero-based `index`th scan read with a transfer error.
    pub fn fail_read_at(mut self, index: usize) -> SimTransport {
        self.fail_read_at = Some(index);
        self
    }

    /// Handle onto the operation journal; stays valid after the transport
    /// is consumed by the pipeline.
    pub fn journal(&self) -> Arc<Mutex<Vec<Op>>> {
        Arc::clone(&self.ops)
    }

    fn record(&self, op: Op) {
        self.ops.lock().unwrap().push(op);
    }
}

/// Calibration image with slope 1.0 and intercept 0.0 for every entry.
pub fn identity_cal_image() -> Vec<u8> {
    let mut image = Vec::with_capacity(cmd::CAL_MEMORY_LEN);
    for _ in 0..cmd::CAL_MEMORY_LEN / 8 {
        image.extend_from_slice(&1.0f32.to_le_bytes());
        image.extend_from_slice(&0.0f32.to_le_bytes());
    }
    image
}

impl super::Transport for SimTransport {
    fn control_out(&mut self, request: u8, _value: u16, _index: u16, data: &[u8]) -> Result<()> {
        match request {
            cmd::AIN_SCAN_STOP => self.record(Op::StopScan),
            cmd::AIN_CLEAR_FIFO => self.record(Op::ClearFifo),
            cmd::AIN_CONFIG => self.record(Op::ConfigRanges(data.to_vec())),
            cmd::AIN_SCAN_START => {
                assert_eq!(data.len(), 10, "malformed scan start packet");
                self.record(Op::StartScan {
                    count: u32::from_le_bytes(data[0..4].try_into().unwrap()),
                    pacer_period: u32::from_le_bytes(data[4..8].try_into().unwrap()),
                    channel_mask: data[8],
                    options: data[9],
                });
            }
            cmd::BLINK_LED => self.record(Op::Blink(data[0])),
            _ => panic!("unexpected control_out request {:#04x}", request),
        }
        Ok(())
    }

    fn control_in(&mut self, request: u8, value: u16, _index: u16, data: &mut [u8]) -> Result<usize> {
        match request {
            cmd::SERIAL => {
                let bytes = self.serial.as_bytes();
                let n = bytes.len().min(data.len());
                data[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            }
            cmd::CAL_MEMORY => {
                let offset = value as usize;
                let end = (offset + data.len()).min(self.cal_image.len());
                let n = end.saturating_sub(offset);
                data[..n].copy_from_slice(&self.cal_image[offset..end]);
                Ok(n)
            }
            cmd::STATUS => {
                data[..2].copy_from_slice(&0u16.to_le_bytes());
                Ok(2)
            }
            _ => panic!("unexpected control_in request {:#04x}", request),
        }
    }

    fn read_bulk(&mut self, data: &mut [u8]) -> Result<()> {
        let index = self.reads_issued;
        self.reads_issued += 1;
        self.record(Op::ReadScan(data.len()));
        if self.fail_read_at == Some(index) {
            return Err(Error::Usb(nusb::transfer::TransferError::Stall));
        }
        // monotonic ramp, so tests can check buffer contents end to end
        for pair in data.chunks_exact_mut(2) {
            pair.copy_from_slice(&self.next_code.to_le_bytes());
            self.next_code = self.next_code.wrapping_add(1);
        }
        Ok(())
    }
}
