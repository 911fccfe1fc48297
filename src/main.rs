use clap::Parser;
use env_logger::Builder;
use log::{error, info};
use loopback_recorder::{audio::CaptureError, cli::Args, run};
use std::process;

fn main() {
    let args = Args::parse();

    Builder::new().filter_level(args.log_level()).init();
    info!("Starting loopback recorder application");

    if let Err(err) = run(args) {
        match err.downcast_ref::<CaptureError>() {
            Some(setup_err) if setup_err.is_setup_failure() => error!("{setup_err}. Exiting..."),
            _ => error!("Application failed with error: {err}"),
        }
        process::exit(1);
    }
}
