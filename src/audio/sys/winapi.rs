use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Sender},
        Arc,
    },
    thread::{self, JoinHandle},
};

use log::{debug, trace, warn};
use wasapi::{
    AudioCaptureClient, AudioClient, Device, DeviceCollection, Direction, Handle, SampleType,
    ShareMode, WaveFormat,
};

use crate::{
    audio::{
        AudioFormatInfo, AudioHost, CallbackFlow, CaptureCallback, CaptureError, CaptureStream,
        DeviceDescriptor,
    },
    Nothing, Res,
};

/// Loopback endpoints don't signal while nothing is playing, so the worker wakes up periodically
/// to check whether it was asked to stop.
const EVENT_TIMEOUT_MS: u32 = 200;

const LOOPBACK_SUFFIX: &str = " [Loopback]";

fn initialize_com() -> Nothing {
    match wasapi::initialize_mta().ok() {
        Ok(_) => Ok(()),
        Err(_) => Err(Box::new(CaptureError::SubsystemUnavailable)),
    }
}

fn render_devices() -> Res<DeviceCollection> {
    DeviceCollection::new(&Direction::Render)
        .map_err(|_| CaptureError::SubsystemUnavailable.into())
}

fn render_device_at(index: usize) -> Res<Device> {
    render_devices()?.get_device_at_index(index as u32)
}

fn wave_format_for(format: &AudioFormatInfo) -> WaveFormat {
    let sample_type = if format.format.is_float() {
        SampleType::Float
    } else {
        SampleType::Int
    };
    WaveFormat::new(
        format.bit_depth() as usize,
        format.bit_depth() as usize,
        &sample_type,
        format.sample_rate as usize,
        format.num_channels as usize,
        None,
    )
}

/// Audio host backed by the Windows Audio Session API. Every active render endpoint is offered
/// as a loopback device.
pub struct WasapiHost;

impl WasapiHost {
    pub fn new() -> Res<Self> {
        initialize_com()?;
        render_devices()?;
        Ok(WasapiHost)
    }

    fn describe(index: usize, device: &Device, is_loopback: bool) -> Res<DeviceDescriptor> {
        let name = device.get_friendlyname()?;
        let mix_format = device.get_iaudioclient()?.get_mixformat()?;
        let channels = mix_format.get_nchannels();

        Ok(DeviceDescriptor {
            index,
            name: if is_loopback {
                format!("{name}{LOOPBACK_SUFFIX}")
            } else {
                name
            },
            is_loopback,
            max_input_channels: if is_loopback { channels } else { 0 },
            max_output_channels: if is_loopback { 0 } else { channels },
            default_sample_rate: mix_format.get_samplespersec(),
        })
    }
}

impl AudioHost for WasapiHost {
    fn default_output_device(&self) -> Res<DeviceDescriptor> {
        let default_device = wasapi::get_default_device(&Direction::Render)
            .map_err(|err| {
                debug!("No default render endpoint: {err}");
                CaptureError::NoLoopbackDevice
            })?;
        let default_id = default_device.get_id()?;

        let collection = render_devices()?;
        for index in 0..collection.get_nbr_devices()? {
            let device = collection.get_device_at_index(index)?;
            if device.get_id()? == default_id {
                return Self::describe(index as usize, &device, false);
            }
        }
        Err(Box::new(CaptureError::NoLoopbackDevice))
    }

    fn loopback_devices(&self) -> Res<Vec<DeviceDescriptor>> {
        let collection = render_devices()?;
        let mut devices = Vec::new();
        for index in 0..collection.get_nbr_devices()? {
            let device = collection.get_device_at_index(index)?;
            match Self::describe(index as usize, &device, true) {
                Ok(descriptor) => devices.push(descriptor),
                Err(err) => warn!("Skipping render device {index}: {err}"),
            }
        }
        Ok(devices)
    }

    fn open_capture_stream(
        &self,
        device: &DeviceDescriptor,
        format: AudioFormatInfo,
        callback: CaptureCallback,
    ) -> Res<Box<dyn CaptureStream>> {
        Ok(Box::new(WasapiCaptureStream::start(
            device.index,
            format,
            callback,
        )?))
    }
}

/// Everything the capture worker needs once the client is running.
struct LoopbackClient {
    client: AudioClient,
    capture_client: AudioCaptureClient,
    event_handle: Handle,
    block_align: usize,
}

impl LoopbackClient {
    /// Open a render endpoint in capture direction, which is how WASAPI exposes loopback.
    fn open(index: usize, format: &AudioFormatInfo) -> Res<Self> {
        initialize_com()?;
        let device = render_device_at(index)?;
        let wave_format = wave_format_for(format);

        let mut client = device.get_iaudioclient()?;
        let (_, min_time) = client.get_periods()?;
        client.initialize_client(
            &wave_format,
            min_time,
            &Direction::Capture,
            &ShareMode::Shared,
            true,
        )?;

        let capture_client = client.get_audiocaptureclient()?;
        let event_handle = client.set_get_eventhandle()?;
        client.start_stream()?;

        Ok(LoopbackClient {
            client,
            capture_client,
            event_handle,
            block_align: wave_format.get_blockalign() as usize,
        })
    }

    fn run(&self, running: &AtomicBool, callback: &mut CaptureCallback) -> Nothing {
        let mut sample_queue: VecDeque<u8> = VecDeque::new();

        while running.load(Ordering::Relaxed) {
            if self.event_handle.wait_for_event(EVENT_TIMEOUT_MS).is_err() {
                continue;
            }
            self.capture_client
                .read_from_device_to_deque(&mut sample_queue)?;

            let whole_frames = sample_queue.len() - sample_queue.len() % self.block_align;
            if whole_frames == 0 {
                continue;
            }
            let buffer: Vec<u8> = sample_queue.drain(..whole_frames).collect();
            trace!("Delivering {} bytes", buffer.len());
            if callback(&buffer) == CallbackFlow::Complete {
                debug!("Capture callback completed the stream");
                running.store(false, Ordering::Relaxed);
            }
        }

        self.client.stop_stream()?;
        Ok(())
    }
}

/// Loopback stream whose capture loop runs on a dedicated worker thread.
pub struct WasapiCaptureStream {
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<Result<(), String>>>,
}

impl WasapiCaptureStream {
    fn start(index: usize, format: AudioFormatInfo, callback: CaptureCallback) -> Res<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = mpsc::channel();

        let worker_running = Arc::clone(&running);
        let worker = thread::spawn(move || {
            Self::capture_thread(index, format, callback, &worker_running, ready_tx)
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {
                debug!("Loopback stream started on device {index}");
                Ok(WasapiCaptureStream {
                    running,
                    worker: Some(worker),
                })
            }
            Ok(Err(msg)) => {
                let _ = worker.join();
                Err(Box::new(CaptureError::StreamFailure(msg)))
            }
            Err(_) => {
                let msg = match worker.join() {
                    Ok(Err(msg)) => msg,
                    _ => String::from("capture thread exited before the stream started"),
                };
                Err(Box::new(CaptureError::StreamFailure(msg)))
            }
        }
    }

    fn capture_thread(
        index: usize,
        format: AudioFormatInfo,
        mut callback: CaptureCallback,
        running: &AtomicBool,
        ready: Sender<Result<(), String>>,
    ) -> Result<(), String> {
        let client = match LoopbackClient::open(index, &format) {
            Ok(client) => client,
            Err(err) => {
                let msg = err.to_string();
                let _ = ready.send(Err(msg.clone()));
                return Err(msg);
            }
        };
        let _ = ready.send(Ok(()));
        client
            .run(running, &mut callback)
            .map_err(|err| err.to_string())
    }

    fn stop(&mut self) -> Nothing {
        self.running.store(false, Ordering::Relaxed);
        match self.worker.take().map(|worker| worker.join()) {
            Some(Ok(Err(msg))) => Err(Box::new(CaptureError::StreamFailure(msg))),
            Some(Err(_)) => Err(Box::new(CaptureError::StreamFailure(String::from(
                "capture thread panicked",
            )))),
            _ => Ok(()),
        }
    }
}

impl CaptureStream for WasapiCaptureStream {
    fn is_active(&self) -> bool {
        self.running.load(Ordering::Relaxed)
            && self
                .worker
                .as_ref()
                .is_some_and(|worker| !worker.is_finished())
    }

    fn close(mut self: Box<Self>) -> Nothing {
        self.stop()
    }
}

impl Drop for WasapiCaptureStream {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!("Loopback stream stopped with error: {err}");
        }
    }
}
