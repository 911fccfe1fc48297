use std::{
    path::PathBuf,
    sync::{
        mpsc::{Receiver, RecvTimeoutError},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

use log::{debug, error, info, warn};

use crate::{
    audio::{
        AudioFormatInfo, AudioHost, CallbackFlow, CaptureCallback, CaptureError, DeviceDescriptor,
        SampleFormat,
    },
    wave::WaveWriter,
    Res,
};

/// What to record and where to put it.
#[derive(Clone, Debug)]
pub struct CaptureSettings {
    pub file_name: PathBuf,
    pub duration: Duration,
    pub format: SampleFormat,
}

/// Summary of a finished recording.
#[derive(Debug)]
pub struct CaptureReport {
    pub device: DeviceDescriptor,
    pub format: AudioFormatInfo,
    pub file_name: PathBuf,
    pub bytes_written: u64,
    pub buffers: u64,
    pub elapsed: Duration,
    pub interrupted: bool,
}

/// State shared with the stream callback.
struct Sink {
    writer: WaveWriter,
    buffers: u64,
    failure: Option<String>,
}

/// Record from `device` into a WAV file for the configured duration, or until a message arrives
/// on `interrupt`.
///
/// The stream's callback appends every buffer to the file on the stream's own thread while this
/// thread waits. The file is only published once the stream has been closed and the header
/// finalized; on any error the partial file is discarded.
pub fn record(
    host: &dyn AudioHost,
    device: &DeviceDescriptor,
    settings: &CaptureSettings,
    interrupt: &Receiver<()>,
) -> Res<CaptureReport> {
    let format = AudioFormatInfo::for_device(device, settings.format)?;
    debug!("Capture format: {format}");

    let sink = Arc::new(Mutex::new(Sink {
        writer: WaveWriter::open(&settings.file_name, format)?,
        buffers: 0,
        failure: None,
    }));
    let stream = host.open_capture_stream(device, format, write_to(Arc::clone(&sink)))?;

    info!(
        "The next {:.1} seconds will be written to {}",
        settings.duration.as_secs_f64(),
        settings.file_name.display()
    );
    let started = Instant::now();
    let interrupted = wait_for(settings.duration, interrupt);
    let elapsed = started.elapsed();

    if !stream.is_active() {
        warn!("Capture stream stopped before the recording finished");
    }
    stream.close()?;

    let mut state = sink
        .lock()
        .map_err(|_| CaptureError::WriteFailure(String::from("capture callback panicked")))?;
    if let Some(msg) = state.failure.take() {
        return Err(Box::new(CaptureError::WriteFailure(msg)));
    }
    let bytes_written = state.writer.commit()?;

    Ok(CaptureReport {
        device: device.clone(),
        format: state.writer.format(),
        file_name: settings.file_name.clone(),
        bytes_written,
        buffers: state.buffers,
        elapsed,
        interrupted,
    })
}

fn write_to(sink: Arc<Mutex<Sink>>) -> CaptureCallback {
    Box::new(move |data: &[u8]| {
        let Ok(mut state) = sink.lock() else {
            return CallbackFlow::Complete;
        };
        match state.writer.write(data) {
            Ok(()) => {
                state.buffers += 1;
                CallbackFlow::Continue
            }
            Err(err) => {
                error!("Failed to write captured audio: {err}");
                state.failure = Some(err.to_string());
                CallbackFlow::Complete
            }
        }
    })
}

/// Block for `duration`. Returns `true` if the wait was cut short by `interrupt`.
fn wait_for(duration: Duration, interrupt: &Receiver<()>) -> bool {
    let deadline = Instant::now() + duration;
    match interrupt.recv_timeout(duration) {
        Ok(()) => {
            info!("Recording interrupted");
            true
        }
        Err(RecvTimeoutError::Timeout) => false,
        Err(RecvTimeoutError::Disconnected) => {
            thread::sleep(deadline.saturating_duration_since(Instant::now()));
            false
        }
    }
}
