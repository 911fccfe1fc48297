use std::{path::PathBuf, time::Duration};

use clap::{Parser, ValueEnum};
use log::LevelFilter;

use crate::{audio::SampleFormat, session::CaptureSettings};

pub const DEFAULT_FILE_NAME: &str = "loopback_record.wav";

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Records what you hear from the default output device into a WAV file.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Args {
    /// The file name to write to. Extension `.wav` will be appended if not specified.
    #[arg(default_value = DEFAULT_FILE_NAME)]
    file_name: String,

    /// How long to record, in seconds. Ctrl-C stops the recording early.
    #[arg(short, long, default_value = "5", value_parser = parse_duration)]
    pub duration: Duration,

    /// Sample format to request from the device and write to the file. Channel count and sample
    /// rate always follow the loopback device.
    #[arg(short, long, default_value = "int16")]
    pub format: SampleFormat,

    /// Print the default output device and the available loopback devices, then exit.
    #[arg(long)]
    pub list_devices: bool,

    /// The log level. `Off` to disable, `Trace` is the most granular.
    #[arg(short, long, default_value = "info")]
    log_level: LogLevel,
}

impl Args {
    /// Get the file name to write to. If file name is missing extension, it will be appended here.
    pub fn file_name(&self) -> String {
        if !self.file_name.ends_with(".wav") {
            return format!("{}.wav", &self.file_name[..]);
        };
        self.file_name.clone()
    }

    /// Map the log level config property to a [`log::LevelFilter`] value.
    pub fn log_level(&self) -> LevelFilter {
        match self.log_level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }

    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            file_name: PathBuf::from(self.file_name()),
            duration: self.duration,
            format: self.format,
        }
    }
}

/// Parse a positive number of seconds, fractions allowed.
fn parse_duration(value: &str) -> Result<Duration, String> {
    let seconds: f64 = value
        .parse()
        .map_err(|_| format!("`{value}` is not a number of seconds"))?;
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(format!("duration must be a positive number of seconds, got {value}"));
    }
    Duration::try_from_secs_f64(seconds)
        .map_err(|err| format!("`{value}` is not a usable duration: {err}"))
}
