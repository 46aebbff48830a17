mod usb;
mod cmd;
mod calibration;
mod device;
mod config;
mod scan;
mod sink;

#[derive(Debug)]
pub enum Error {
    NotFound,
    Usb(nusb::transfer::TransferError),
    Io(std::io::Error),
    ShortRead { expected: usize, actual: usize },
    Config { field: &'static str, reason: String },
    UnsupportedRange(u8),
    TruncatedSample { len: usize },
}

impl Error {
    pub(crate) fn config(field: &'static str, reason: impl Into<String>) -> Error {
        Error::Config { field, reason: reason.into() }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::NotFound =>
                write!(f, "device not connected"),
            Self::Usb(transfer_error) =>
                write!(f, "USB transfer error: {}", transfer_error),
            Self::Io(io_error) =>
                write!(f, "I/O error: {}", io_error),
            Self::ShortRead { expected, actual } =>
                write!(f, "short scan read: {} of {} bytes", actual, expected),
            Self::Config { field, reason } =>
                write!(f, "invalid configuration: {}: {}", field, reason),
            Self::UnsupportedRange(code) =>
                write!(f, "unsupported voltage range code {:#04x}", code),
            Self::TruncatedSample { len } =>
                write!(f, "sample slice must be 2 bytes, got {}", len),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            &Self::Usb(ref transfer_error) => Some(transfer_error),
            &Self::Io(ref io_error) => Some(io_error),
            _ => None
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Io(error)
    }
}

impl From<nusb::transfer::TransferError> for Error {
    fn from(error: nusb::transfer::TransferError) -> Self {
        Error::Usb(error)
    }
}

pub type Result<T> =
    core::result::Result<T, Error>;

pub use cmd::{
    ScanOptions,
    Status,
    NUM_CHANNELS,
    VENDOR_ID,
    PRODUCT_ID,
};

pub use calibration::{
    convert,
    CalibrationEntry,
    GainTable,
    VoltageRange,
};

pub use config::{
    AnalogInputConfig,
    Channel,
    ChannelConfig,
    ConfigDocument,
    Pacing,
    RpiGpio,
    ScanConfig,
    TransferMode,
};

pub use scan::{
    Buffer,
    RunSummary,
    ScanRunner,
    ScanState,
    Sink,
};

pub use sink::{
    ChannelReadout,
    DisplaySnapshot,
    LiveSink,
    RecordingHeader,
    RecordingSink,
};

pub use usb::Transport;
pub use usb::imp::NusbTransport;

pub use device::Daq;
