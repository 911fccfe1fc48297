//! In-process audio host for exercising device resolution and capture without hardware.

use std::{
    cell::{Cell, RefCell},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crate::{Nothing, Res};

use super::{
    AudioFormatInfo, AudioHost, CallbackFlow, CaptureCallback, CaptureError, CaptureStream,
    DeviceDescriptor,
};

const DEFAULT_BUFFER_FRAMES: usize = 480;

/// A non-loopback stereo 48 kHz output device.
pub fn output_device(index: usize, name: &str) -> DeviceDescriptor {
    DeviceDescriptor {
        index,
        name: name.to_owned(),
        is_loopback: false,
        max_input_channels: 0,
        max_output_channels: 2,
        default_sample_rate: 48000,
    }
}

#[derive(Default)]
pub struct StreamState {
    pub closed: AtomicBool,
    pub buffers: AtomicUsize,
}

pub struct MockHost {
    default_output: Option<DeviceDescriptor>,
    loopback: Vec<DeviceDescriptor>,
    pub buffer_frames: usize,
    scans: Cell<usize>,
    streams: RefCell<Vec<Arc<StreamState>>>,
}

impl MockHost {
    pub fn new(default_output: DeviceDescriptor, loopback: Vec<DeviceDescriptor>) -> Self {
        MockHost {
            default_output: Some(default_output),
            loopback,
            buffer_frames: DEFAULT_BUFFER_FRAMES,
            scans: Cell::new(0),
            streams: RefCell::new(Vec::new()),
        }
    }

    /// A host whose audio subsystem cannot be reached.
    pub fn unavailable() -> Self {
        MockHost {
            default_output: None,
            loopback: Vec::new(),
            buffer_frames: DEFAULT_BUFFER_FRAMES,
            scans: Cell::new(0),
            streams: RefCell::new(Vec::new()),
        }
    }

    /// A host whose default output has a matching loopback device.
    pub fn with_speakers(name: &str) -> Self {
        let speakers = output_device(0, name);
        let loopback = vec![Self::loopback_for(&speakers)];
        Self::new(speakers, loopback)
    }

    /// The loopback counterpart of an output device, named the way WASAPI hosts name them.
    pub fn loopback_for(output: &DeviceDescriptor) -> DeviceDescriptor {
        DeviceDescriptor {
            index: output.index,
            name: format!("{} [Loopback]", output.name),
            is_loopback: true,
            max_input_channels: output.max_output_channels,
            max_output_channels: 0,
            default_sample_rate: output.default_sample_rate,
        }
    }

    pub fn loopback_scans(&self) -> usize {
        self.scans.get()
    }

    pub fn opened_streams(&self) -> Vec<Arc<StreamState>> {
        self.streams.borrow().clone()
    }
}

impl AudioHost for MockHost {
    fn default_output_device(&self) -> Res<DeviceDescriptor> {
        self.default_output
            .clone()
            .ok_or_else(|| CaptureError::SubsystemUnavailable.into())
    }

    fn loopback_devices(&self) -> Res<Vec<DeviceDescriptor>> {
        if self.default_output.is_none() {
            return Err(Box::new(CaptureError::SubsystemUnavailable));
        }
        self.scans.set(self.scans.get() + 1);
        Ok(self.loopback.clone())
    }

    fn open_capture_stream(
        &self,
        device: &DeviceDescriptor,
        format: AudioFormatInfo,
        callback: CaptureCallback,
    ) -> Res<Box<dyn CaptureStream>> {
        if self.default_output.is_none() {
            return Err(Box::new(CaptureError::SubsystemUnavailable));
        }
        if !device.is_loopback {
            return Err(Box::new(CaptureError::StreamFailure(format!(
                "{device} is not a loopback device"
            ))));
        }

        let state = Arc::new(StreamState::default());
        self.streams.borrow_mut().push(Arc::clone(&state));
        Ok(Box::new(MockStream::start(
            format,
            self.buffer_frames,
            callback,
            state,
        )))
    }
}

/// Delivers silence-free test frames at the real-time rate of the requested format.
struct MockStream {
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    state: Arc<StreamState>,
}

impl MockStream {
    fn start(
        format: AudioFormatInfo,
        buffer_frames: usize,
        mut callback: CaptureCallback,
        state: Arc<StreamState>,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let worker_running = Arc::clone(&running);
        let worker_state = Arc::clone(&state);

        let worker = thread::spawn(move || {
            let frame_bytes = format.block_alignment() as usize;
            let buffer: Vec<u8> = (0..buffer_frames * frame_bytes)
                .map(|i| (i % 251) as u8)
                .collect();
            let started = Instant::now();
            let mut delivered = 0usize;

            while worker_running.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(2));
                let due = (started.elapsed().as_secs_f64() * format.sample_rate as f64) as usize;
                while due - delivered >= buffer_frames {
                    if callback(&buffer) == CallbackFlow::Complete {
                        worker_running.store(false, Ordering::Relaxed);
                        return;
                    }
                    delivered += buffer_frames;
                    worker_state.buffers.fetch_add(1, Ordering::Relaxed);
                }
            }
        });

        MockStream {
            running,
            worker: Some(worker),
            state,
        }
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.state.closed.store(true, Ordering::Relaxed);
    }
}

impl CaptureStream for MockStream {
    fn is_active(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    fn close(mut self: Box<Self>) -> Nothing {
        self.stop();
        Ok(())
    }
}

impl Drop for MockStream {
    fn drop(&mut self) {
        self.stop();
    }
}
