use crate::Res;

use super::AudioHost;

#[cfg(windows)]
mod winapi;

#[cfg(windows)]
pub use winapi::WasapiHost;

/// Open the platform audio host used for loopback capture.
#[cfg(windows)]
pub fn open_host() -> Res<Box<dyn AudioHost>> {
    Ok(Box::new(WasapiHost::new()?))
}

/// Loopback capture needs WASAPI; every other platform reports the subsystem as unavailable.
#[cfg(not(windows))]
pub fn open_host() -> Res<Box<dyn AudioHost>> {
    Err(Box::new(super::CaptureError::SubsystemUnavailable))
}
