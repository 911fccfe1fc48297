use std::{error::Error, fmt::Display};

use clap::ValueEnum;

use crate::{Nothing, Res};

#[cfg(test)]
pub mod mock;
pub mod resolver;
pub mod sys;

/// Audio bit depth and sample format.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleFormat {
    Int16,
    Int24,
    Int32,
    Float32,
}

impl SampleFormat {
    /// Return the appropriate bit depth for the selected sample format.
    pub fn bit_depth(&self) -> u16 {
        match self {
            SampleFormat::Int16 => 16,
            SampleFormat::Int24 => 24,
            SampleFormat::Int32 => 32,
            SampleFormat::Float32 => 32,
        }
    }

    /// Gives the type format header for the selected audio format. `1` for PCM, `3` for float.
    pub fn type_format_header(&self) -> u16 {
        match self {
            SampleFormat::Int16 | SampleFormat::Int24 | SampleFormat::Int32 => 1u16,
            SampleFormat::Float32 => 3u16,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, SampleFormat::Float32)
    }
}

/// Snapshot of an audio endpoint as reported by the host at query time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub index: usize,
    pub name: String,
    pub is_loopback: bool,
    pub max_input_channels: u16,
    pub max_output_channels: u16,
    pub default_sample_rate: u32,
}

impl Display for DeviceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}){}", self.index, self.name)
    }
}

/// Basic info about the audio format to capture and write.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AudioFormatInfo {
    pub sample_rate: u32,
    pub num_channels: u16,
    pub format: SampleFormat,
}

impl AudioFormatInfo {
    /// Derive the capture format for a loopback device. The stream and the WAV header are both
    /// built from the returned value, so they cannot disagree.
    pub fn for_device(device: &DeviceDescriptor, format: SampleFormat) -> Res<Self> {
        if device.max_input_channels == 0 || device.default_sample_rate == 0 {
            return Err(Box::new(CaptureError::InvalidDeviceFormat(device.name.clone())));
        }
        Ok(AudioFormatInfo {
            sample_rate: device.default_sample_rate,
            num_channels: device.max_input_channels,
            format,
        })
    }

    /// Return the number of bits per sample for the chosen [`SampleFormat`].
    pub fn bit_depth(&self) -> u16 {
        self.format.bit_depth()
    }

    /// Return the audio type header to the chosen [`SampleFormat`].
    pub fn type_format_header(&self) -> u16 {
        self.format.type_format_header()
    }

    /// Return the number of bytes per second based on the given sample rate, bit depth and number
    /// of channels.
    pub fn bytes_per_second(&self) -> u32 {
        self.sample_rate * self.block_alignment() as u32
    }

    /// Return the block alignment for the audio format.
    /// The block alignment is the number of bytes per audio frame of interleaved audio data.
    pub fn block_alignment(&self) -> u16 {
        (self.bit_depth() / 8) * self.num_channels
    }
}

impl Display for AudioFormatInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} Hz, {}-bit {}, {} channel(s)",
            self.sample_rate,
            self.bit_depth(),
            if self.format.is_float() {
                "float"
            } else {
                "integer"
            },
            self.num_channels
        )
    }
}

/// Directive returned by a capture callback after each buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallbackFlow {
    /// Keep delivering buffers.
    Continue,
    /// Stop delivering; the stream goes inactive.
    Complete,
}

/// Invoked on the stream's own thread with each buffer of interleaved frames.
pub type CaptureCallback = Box<dyn FnMut(&[u8]) -> CallbackFlow + Send + 'static>;

#[derive(Debug)]
pub enum CaptureError {
    SubsystemUnavailable,
    NoLoopbackDevice,
    InvalidDeviceFormat(String),
    StreamFailure(String),
    WriteFailure(String),
    WaveTooLarge,
}

impl CaptureError {
    /// Errors raised while locating a device, before any stream or file exists.
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            CaptureError::SubsystemUnavailable | CaptureError::NoLoopbackDevice
        )
    }
}

impl Error for CaptureError {}

impl Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureError::SubsystemUnavailable => {
                write!(f, "Looks like WASAPI is not available on the system")
            }
            CaptureError::NoLoopbackDevice => write!(
                f,
                "Default loopback output device not found. Run with --list-devices to check available devices"
            ),
            CaptureError::InvalidDeviceFormat(name) => {
                write!(f, "Device '{name}' reports no usable input format")
            }
            CaptureError::StreamFailure(msg) => write!(f, "Capture stream failed: {msg}"),
            CaptureError::WriteFailure(msg) => write!(f, "Failed to write audio data: {msg}"),
            CaptureError::WaveTooLarge => {
                write!(f, "Recording exceeds the maximum size of a WAV file")
            }
        }
    }
}

/// An audio system able to enumerate devices and open loopback capture streams.
pub trait AudioHost {
    /// The system default output (render) device.
    fn default_output_device(&self) -> Res<DeviceDescriptor>;

    /// All devices that can capture what an output device is playing.
    fn loopback_devices(&self) -> Res<Vec<DeviceDescriptor>>;

    /// Open and start a capture stream. `callback` is invoked from a thread owned by the stream
    /// until it returns [`CallbackFlow::Complete`] or the stream is closed.
    fn open_capture_stream(
        &self,
        device: &DeviceDescriptor,
        format: AudioFormatInfo,
        callback: CaptureCallback,
    ) -> Res<Box<dyn CaptureStream>>;
}

/// A running capture stream. Dropping it stops delivery and releases the device.
pub trait CaptureStream {
    fn is_active(&self) -> bool;

    /// Stop the stream and wait for the delivery thread to finish.
    fn close(self: Box<Self>) -> Nothing;
}
