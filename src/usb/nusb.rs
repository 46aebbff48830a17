use nusb::transfer::{Control, ControlType, Recipient, RequestBuffer};
use nusb::{DeviceInfo, Interface};

use crate::cmd;
use crate::{Error, Result};

// Largest single bulk request submitted to the queue. Reads longer than this
// are accumulated across completions.
const MAX_BULK_REQUEST: usize = 16384;

pub struct NusbTransport {
    interface: Interface,
    queue: nusb::transfer::Queue<RequestBuffer>,
}

impl NusbTransport {
    /// Open the first attached USB-1608FS-Plus.
    pub fn open_first() -> Result<NusbTransport> {
        Self::open_matching(None)
    }

    /// Open the attached USB-1608FS-Plus with the given serial number.
    pub fn open_serial(serial: &str) -> Result<NusbTransport> {
        Self::open_matching(Some(serial))
    }

    fn open_matching(serial: Option<&str>) -> Result<NusbTransport> {
        let info = nusb::list_devices()?
            .filter(|info| info.vendor_id() == cmd::VENDOR_ID &&
                           info.product_id() == cmd::PRODUCT_ID)
            .find(|info| serial.map_or(true, |serial| info.serial_number() == Some(serial)))
            .ok_or(Error::NotFound)?;
        Self::open_info(&info)
    }

    fn open_info(info: &DeviceInfo) -> Result<NusbTransport> {
        log::debug!("opening {:04x}:{:04x} at bus {} addr {}",
            info.vendor_id(), info.product_id(), info.bus_number(), info.device_address());
        let device = info.open()?;
        let interface = device.claim_interface(0)?;
        let queue = interface.bulk_in_queue(cmd::EP_SCAN_IN);
        Ok(NusbTransport { interface, queue })
    }

    fn control(request: u8, value: u16, index: u16) -> Control {
        Control {
            control_type: ControlType::Vendor,
            recipient: Recipient::Device,
            request,
            value,
            index,
        }
    }
}

impl super::Transport for NusbTransport {
    fn control_out(&mut self, request: u8, value: u16, index: u16, data: &[u8]) -> Result<()> {
        let written = self.interface.control_out_blocking(
            Self::control(request, value, index), data, cmd::CONTROL_TIMEOUT)?;
        if written != data.len() {
            return Err(Error::ShortRead { expected: data.len(), actual: written });
        }
        Ok(())
    }

    fn control_in(&mut self, request: u8, value: u16, index: u16, data: &mut [u8]) -> Result<usize> {
        let read = self.interface.control_in_blocking(
            Self::control(request, value, index), data, cmd::CONTROL_TIMEOUT)?;
        Ok(read)
    }

    fn read_bulk(&mut self, data: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < data.len() {
            let request = (data.len() - filled).min(MAX_BULK_REQUEST);
            self.queue.submit(RequestBuffer::new(request));
            let completion = futures_lite::future::block_on(self.queue.next_complete());
            completion.status.map_err(Error::Usb)?;
            if completion.data.is_empty() {
                // zero-length packet with data still owed: the device-side
                // scan has desynchronized from the host
                return Err(Error::ShortRead { expected: data.len(), actual: filled });
            }
            data[filled..filled + completion.data.len()].copy_from_slice(&completion.data);
            filled += completion.data.len();
        }
        Ok(())
    }
}
