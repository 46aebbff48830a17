use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use ratatui::crossterm::event::{self, Event, KeyCode};
use ratatui::layout::{Constraint, Layout};
use ratatui::style::{Color, Style};
use ratatui::widgets::{Block, List, Paragraph};

use mcc1608fs::{ConfigDocument, Daq, DisplaySnapshot, LiveSink, ScanConfig, ScanRunner};

/// Live terminal view of a counted analog scan.
#[derive(Debug, Parser)]
struct Args {
    /// JSON config filename.
    #[arg(long, default_value = "./dashboard_config.json")]
    config: String,
}

fn main() -> mcc1608fs::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let document = ConfigDocument::from_path(&args.config)?;
    let config = document.scan_config()?;

    let mut daq = match document.daq_sn.as_deref() {
        Some(serial) => Daq::open_serial(serial)?,
        None => Daq::open()?,
    };
    let serial = daq.serial_number().unwrap_or_else(|error| {
        log::warn!("serial number read failed: {}", error);
        "Unknown".to_string()
    });
    let gain = Arc::new(daq.read_gain_table()?);

    let live = LiveSink::new(gain);
    let snapshot = live.snapshot_handle();
    let mut runner = ScanRunner::new(daq, config.clone());
    runner.add_sink(Box::new(live));
    let scan = thread::spawn(move || runner.run());

    let mut terminal = ratatui::init();
    let mut done = false;
    loop {
        let view = snapshot.lock().unwrap().clone();
        done = done || scan.is_finished();
        terminal.draw(|frame| draw(frame, &serial, &config, &view, done))?;
        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.code == KeyCode::Char('q') {
                    break;
                }
            }
        }
    }
    ratatui::restore();

    if !scan.is_finished() {
        eprintln!("waiting for the scan to finish...");
    }
    let summary = scan.join().expect("scan thread panicked")?;
    println!("scan complete: {} buffers ({} bytes)",
        summary.buffers_delivered, summary.bytes_read);
    Ok(())
}

fn draw(frame: &mut ratatui::Frame, serial: &str, config: &ScanConfig,
        view: &DisplaySnapshot, done: bool) {
    let [info_area, channels_area, help_area] = Layout::vertical([
        Constraint::Length(7),
        Constraint::Length(8),
        Constraint::Length(1),
    ]).areas(frame.area());

    let total_buffers = config.total_buffers
        .map(|count| count.to_string())
        .unwrap_or_else(|| "continuous".to_string());
    let info = List::new([
        format!("S/N {}", serial),
        format!("Scans/buffer = {}", config.scans_per_buffer),
        format!("Total buffers = {}", total_buffers),
        format!("Bytes read = {}", view.bytes_read),
        format!("Frequency = {} Hz", config.frequency),
    ])
    .style(Style::default().fg(Color::Yellow))
    .block(Block::bordered().title("USB-1608FS-Plus Info"));
    frame.render_widget(info, info_area);

    let readouts = view.channels.iter().map(|readout| match &readout.volts {
        Ok(volts) => format!("{:>6} = {:.5} V ({} / {:#06x}) @ {} range",
            readout.description, volts, readout.code, readout.code, readout.range),
        Err(error) => format!("{:>6} = {} (Error: {})",
            readout.description, readout.code, error),
    }).collect::<Vec<_>>();
    let channels = List::new(readouts)
        .style(Style::default().fg(Color::Yellow))
        .block(Block::bordered().title("Analog Inputs"));
    frame.render_widget(channels, channels_area);

    let help = Paragraph::new(if done {
        "Scan complete. Press q to quit"
    } else {
        "Press q to quit"
    });
    frame.render_widget(help, help_area);
}
