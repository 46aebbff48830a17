use std::path::Path;

use clap::Parser;

use mcc1608fs::{ConfigDocument, Daq, Error, RecordingSink, ScanRunner};

/// Drain a counted analog scan into `.dat`/`.hdr` artifact pairs.
#[derive(Debug, Parser)]
struct Args {
    /// JSON config filename.
    #[arg(long, default_value = "./remote_config.json")]
    config: String,
}

fn main() -> mcc1608fs::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let document = ConfigDocument::from_path(&args.config)?;
    let config = document.scan_config()?;
    let output_dir = document.output_file.as_deref()
        .ok_or_else(|| Error::Config {
            field: "output_file",
            reason: "recording needs an output directory".to_string(),
        })?;

    if document.disable_gpio3 || !document.rpi.is_empty() {
        // pin setup belongs to the GPIO collaborator on the host SBC
        log::info!("GPIO configuration present; left to the GPIO agent");
    }

    let mut daq = match document.daq_sn.as_deref() {
        Some(serial) => Daq::open_serial(serial)?,
        None => Daq::open()?,
    };
    match daq.serial_number() {
        Ok(serial) => log::info!("S/N {}", serial),
        Err(error) => log::warn!("serial number read failed: {}", error),
    }

    let sink = RecordingSink::new(Path::new(output_dir))?;
    let mut runner = ScanRunner::new(daq, config);
    runner.add_sink(Box::new(sink));
    let summary = runner.run()?;
    log::info!("recorded {} buffers ({} bytes) to {}",
        summary.buffers_delivered, summary.bytes_read, output_dir);
    Ok(())
}
