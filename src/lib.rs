pub mod audio;
pub mod cli;
pub mod session;
mod wave;

use audio::{resolver::resolve_loopback_device, sys::open_host, AudioHost};
use cli::Args;
use log::info;
use session::{CaptureReport, CaptureSettings};
use std::{
    error::Error,
    sync::mpsc::{self, Receiver},
};

pub type Res<T> = Result<T, Box<dyn Error>>;
pub type Nothing = Res<()>;

pub fn run(args: Args) -> Nothing {
    let host = open_host()?;

    if args.list_devices {
        return list_devices(host.as_ref());
    }

    let settings = args.capture_settings();
    let interrupt = setup_terminate_handler()?;
    let report = record_loopback(host.as_ref(), &settings, &interrupt)?;

    info!(
        "Wrote {} bytes ({} buffers, {:.2}s) to {}",
        report.bytes_written,
        report.buffers,
        report.elapsed.as_secs_f64(),
        report.file_name.display()
    );
    Ok(())
}

/// Resolve the loopback device for the default output and record it.
pub fn record_loopback(
    host: &dyn AudioHost,
    settings: &CaptureSettings,
    interrupt: &Receiver<()>,
) -> Res<CaptureReport> {
    let device = resolve_loopback_device(host)?;
    info!("Recording from: {device}");
    session::record(host, &device, settings, interrupt)
}

/// Print the default output device and every loopback device the host offers.
fn list_devices(host: &dyn AudioHost) -> Nothing {
    let default_output = host.default_output_device()?;
    println!(
        "Default output: {default_output} ({} channels, {} Hz{})",
        default_output.max_output_channels,
        default_output.default_sample_rate,
        if default_output.is_loopback {
            ", loopback"
        } else {
            ""
        }
    );

    println!("Loopback devices:");
    for device in host.loopback_devices()? {
        println!(
            "  {device} ({} channels, {} Hz)",
            device.max_input_channels, device.default_sample_rate
        );
    }
    Ok(())
}

/// Installs a Ctrl-C handler that ends the current recording early. The returned receiver gets a
/// message for every Ctrl-C.
///
/// # Errors
/// Returns an error if the [`ctrlc`] crate fails to set the handler, for example when one is
/// already installed.
fn setup_terminate_handler() -> Res<Receiver<()>> {
    let (sender, receiver) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = sender.send(());
    })?;
    Ok(receiver)
}
