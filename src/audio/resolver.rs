use log::{debug, trace};

use crate::Res;

use super::{AudioHost, CaptureError, DeviceDescriptor};

/// Find a device that captures what the default output device is playing.
///
/// If the default output is itself a loopback device it is returned as is. Otherwise the first
/// loopback device whose name contains the default device's name is chosen. Hosts typically name
/// loopback endpoints after the output they mirror, but nothing guarantees the match is unique or
/// correct.
pub fn resolve_loopback_device(host: &dyn AudioHost) -> Res<DeviceDescriptor> {
    let default_speakers = host.default_output_device()?;
    debug!("Default output device: {default_speakers}");

    if default_speakers.is_loopback {
        return Ok(default_speakers);
    }

    for loopback in host.loopback_devices()? {
        trace!("Considering loopback device {loopback}");
        if loopback.name.contains(&default_speakers.name) {
            return Ok(loopback);
        }
    }

    Err(Box::new(CaptureError::NoLoopbackDevice))
}
