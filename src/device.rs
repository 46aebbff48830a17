use crate::calibration::{GainTable, VoltageRange};
use crate::cmd::{self, ScanOptions, Status};
use crate::usb::Transport;
use crate::{Error, Result};

/// The device-driver collaborator: sequences vendor requests and sized bulk
/// reads over a [`Transport`]. Exclusively owned by the acquisition loop for
/// the duration of a run; the USB handle closes when this is dropped.
#[derive(Debug)]
pub struct Daq<T: Transport> {
    transport: T,
}

impl Daq<crate::usb::imp::NusbTransport> {
    /// Open the first attached USB-1608FS-Plus.
    pub fn open() -> Result<Daq<crate::usb::imp::NusbTransport>> {
        Ok(Daq { transport: crate::usb::imp::NusbTransport::open_first()? })
    }

    /// Open the attached USB-1608FS-Plus with the given serial number.
    pub fn open_serial(serial: &str) -> Result<Daq<crate::usb::imp::NusbTransport>> {
        Ok(Daq { transport: crate::usb::imp::NusbTransport::open_serial(serial)? })
    }
}

impl<T: Transport> Daq<T> {
    pub fn new(transport: T) -> Daq<T> {
        Daq { transport }
    }

    pub fn serial_number(&mut self) -> Result<String> {
        let mut bytes = [0u8; 8];
        let read = self.transport.control_in(cmd::SERIAL, 0, 0, &mut bytes)?;
        let text = String::from_utf8_lossy(&bytes[..read]);
        let serial = text.trim_end_matches('\0').to_string();
        log::debug!("serial_number() = {:?}", serial);
        Ok(serial)
    }

    pub fn blink(&mut self, count: u8) -> Result<()> {
        log::debug!("blink({})", count);
        self.transport.control_out(cmd::BLINK_LED, 0, 0, &[count])
    }

    pub fn status(&mut self) -> Result<Status> {
        let mut bytes = [0u8; 2];
        let read = self.transport.control_in(cmd::STATUS, 0, 0, &mut bytes)?;
        if read != bytes.len() {
            return Err(Error::ShortRead { expected: bytes.len(), actual: read });
        }
        let value = Status::from_bits_retain(u16::from_le_bytes(bytes));
        log::debug!("status() = {:?}", value);
        Ok(value)
    }

    /// Read the factory calibration memory into a gain table.
    pub fn read_gain_table(&mut self) -> Result<GainTable> {
        let mut image = [0u8; cmd::CAL_MEMORY_LEN];
        // calibration memory is limited to 64-byte control reads
        for (index, chunk) in image.chunks_mut(64).enumerate() {
            let read = self.transport.control_in(
                cmd::CAL_MEMORY, (index * 64) as u16, 0, chunk)?;
            if read != chunk.len() {
                return Err(Error::ShortRead { expected: chunk.len(), actual: read });
            }
        }
        log::debug!("read_gain_table() = {} bytes", image.len());
        Ok(GainTable::parse(&image))
    }

    pub fn stop_scan(&mut self) -> Result<()> {
        log::debug!("stop_scan()");
        self.transport.control_out(cmd::AIN_SCAN_STOP, 0, 0, &[])
    }

    pub fn clear_scan_buffer(&mut self) -> Result<()> {
        log::debug!("clear_scan_buffer()");
        self.transport.control_out(cmd::AIN_CLEAR_FIFO, 0, 0, &[])
    }

    /// Commit per-channel voltage ranges. Not idempotent under live-scan
    /// conditions: the scan must be fully stopped and the FIFO cleared
    /// before this is issued.
    pub fn set_scan_ranges(&mut self, ranges: &[VoltageRange; cmd::NUM_CHANNELS]) -> Result<()> {
        let codes = ranges.map(VoltageRange::code);
        log::debug!("set_scan_ranges({:?})", codes);
        self.transport.control_out(cmd::AIN_CONFIG, 0, 0, &codes)
    }

    /// Start a hardware-paced scan. `count` is the number of scans the
    /// device takes on its own, 0 for continuous sampling into its internal
    /// ring buffer.
    pub fn start_scan(&mut self, count: u32, frequency: f64, channel_mask: u8,
                      options: ScanOptions) -> Result<()> {
        let pacer_period = pacer_period(frequency);
        log::debug!("start_scan(count={}, pacer_period={}, channel_mask={:#04x}, options={:?})",
            count, pacer_period, channel_mask, options);
        let mut packet = [0u8; 10];
        packet[0..4].copy_from_slice(&count.to_le_bytes());
        packet[4..8].copy_from_slice(&pacer_period.to_le_bytes());
        packet[8] = channel_mask;
        packet[9] = options.bits();
        self.transport.control_out(cmd::AIN_SCAN_START, 0, 0, &packet)
    }

    /// Blocking read of one buffer's worth of scan data. Fills `data`
    /// exactly; a short transfer is a transport error.
    pub fn read_scan(&mut self, data: &mut [u8]) -> Result<()> {
        self.transport.read_bulk(data)?;
        log::trace!("read_scan({} bytes)", data.len());
        Ok(())
    }
}

fn pacer_period(frequency: f64) -> u32 {
    (cmd::PACER_CLOCK_HZ / frequency).round() as u32 - 1
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::usb::sim::{Op, SimTransport};

    #[test]
    fn test_pacer_period() {
        assert_eq!(pacer_period(20_000.0), 1999);
        assert_eq!(pacer_period(100_000.0), 399);
        assert_eq!(pacer_period(50.0), 799_999);
    }

    #[test]
    fn test_serial_number() {
        let mut daq = Daq::new(SimTransport::new());
        assert_eq!(daq.serial_number().unwrap(), "01ABCDEF");
    }

    #[test]
    fn test_gain_table_read() {
        let mut daq = Daq::new(SimTransport::new());
        let table = daq.read_gain_table().unwrap();
        let entry = table.entry(7, VoltageRange::Bip1V);
        assert_eq!(entry.slope, 1.0);
        assert_eq!(entry.intercept, 0.0);
    }

    #[test]
    fn test_start_scan_packet() {
        let transport = SimTransport::new();
        let journal = transport.journal();
        let mut daq = Daq::new(transport);
        daq.start_scan(0, 20_000.0, 0b0000_0011, ScanOptions::empty()).unwrap();
        assert_eq!(journal.lock().unwrap().as_slice(), &[
            Op::StartScan { count: 0, pacer_period: 1999, channel_mask: 0b11, options: 0 },
        ]);
    }

    #[test]
    fn test_scan_ranges_codes() {
        let transport = SimTransport::new();
        let journal = transport.journal();
        let mut daq = Daq::new(transport);
        let mut ranges = [VoltageRange::Bip10V; cmd::NUM_CHANNELS];
        ranges[1] = VoltageRange::Bip2V;
        daq.set_scan_ranges(&ranges).unwrap();
        assert_eq!(journal.lock().unwrap().as_slice(), &[
            Op::ConfigRanges(vec![0, 2, 0, 0, 0, 0, 0, 0]),
        ]);
    }
}
