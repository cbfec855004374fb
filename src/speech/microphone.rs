//! Microphone [`AudioSource`] on top of cpal.
//!
//! cpal streams are not `Send`, so each recording owns a worker thread that
//! builds the input stream, plays it and holds it until told to stop. Frames
//! are averaged down to mono `f32` at the device's default rate.

use super::recording::{AudioSource, Recording};
use super::transcribe::CapturedAudio;
use crate::error::SpeechError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, info, warn};

const STARTUP_TIMEOUT: Duration = Duration::from_secs(2);

type SampleBuffer = Arc<Mutex<Vec<f32>>>;

/// Records from the default input device, or from one picked by name.
#[derive(Debug, Clone, Default)]
pub struct MicrophoneSource {
    device_name: Option<String>,
}

impl MicrophoneSource {
    pub fn default_device() -> Self {
        Self::default()
    }

    /// Prefer the input device called `name`; falls back to the default
    /// device when no such device exists.
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            device_name: Some(name).filter(|n| !n.trim().is_empty()),
        }
    }

    fn device(&self) -> Result<Device, SpeechError> {
        let host = cpal::default_host();
        if let Some(wanted) = self.device_name.as_deref().map(str::trim) {
            if let Ok(mut devices) = host.input_devices() {
                if let Some(device) = devices.find(|d| d.name().is_ok_and(|n| n == wanted)) {
                    return Ok(device);
                }
            }
            warn!("Input device {:?} not found, using the default", wanted);
        }
        host.default_input_device()
            .ok_or_else(|| SpeechError::CaptureFailed("no input device".into()))
    }
}

impl AudioSource for MicrophoneSource {
    fn start(&self) -> Result<Box<dyn Recording>, SpeechError> {
        let device = self.device()?;
        Ok(Box::new(MicrophoneRecording::open(device)?))
    }
}

struct MicrophoneRecording {
    stop_tx: Option<mpsc::Sender<()>>,
    worker: Option<JoinHandle<()>>,
    buffer: SampleBuffer,
    sample_rate_hz: u32,
}

impl MicrophoneRecording {
    fn open(device: Device) -> Result<Self, SpeechError> {
        let name = device.name().unwrap_or_else(|_| "unknown device".into());
        let supported = device
            .default_input_config()
            .map_err(|e| SpeechError::CaptureFailed(format!("{name}: {e}")))?;
        let sample_rate_hz = supported.sample_rate().0;
        let format = supported.sample_format();
        let config: StreamConfig = supported.into();

        let buffer = SampleBuffer::default();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let sink = Arc::clone(&buffer);
        let worker = std::thread::spawn(move || {
            let stream = match build_stream(&device, &config, format, sink) {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(format!("play stream: {e}")));
                return;
            }
            let _ = ready_tx.send(Ok(()));
            // Returns on stop or when the recording is dropped.
            let _ = stop_rx.recv();
            drop(stream);
        });

        let mut recording = Self {
            stop_tx: Some(stop_tx),
            worker: Some(worker),
            buffer,
            sample_rate_hz,
        };
        match ready_rx.recv_timeout(STARTUP_TIMEOUT) {
            Ok(Ok(())) => {
                info!("Recording from {} at {} Hz", name, sample_rate_hz);
                Ok(recording)
            }
            Ok(Err(e)) => {
                recording.shutdown();
                Err(SpeechError::CaptureFailed(e))
            }
            Err(_) => {
                recording.shutdown();
                Err(SpeechError::CaptureFailed(format!(
                    "{name} did not start within {}s",
                    STARTUP_TIMEOUT.as_secs()
                )))
            }
        }
    }

    fn shutdown(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Audio worker panicked");
            }
        }
    }
}

impl Recording for MicrophoneRecording {
    fn finish(mut self: Box<Self>) -> Result<CapturedAudio, SpeechError> {
        self.shutdown();
        let samples = match self.buffer.lock() {
            Ok(mut buf) => std::mem::take(&mut *buf),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        Ok(CapturedAudio {
            sample_rate_hz: self.sample_rate_hz,
            samples,
        })
    }
}

impl Drop for MicrophoneRecording {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn build_stream(
    device: &Device,
    config: &StreamConfig,
    format: SampleFormat,
    sink: SampleBuffer,
) -> Result<Stream, String> {
    let stream = match format {
        SampleFormat::I8 => input_stream::<i8>(device, config, sink),
        SampleFormat::I16 => input_stream::<i16>(device, config, sink),
        SampleFormat::I32 => input_stream::<i32>(device, config, sink),
        SampleFormat::U8 => input_stream::<u8>(device, config, sink),
        SampleFormat::U16 => input_stream::<u16>(device, config, sink),
        SampleFormat::U32 => input_stream::<u32>(device, config, sink),
        SampleFormat::F32 => input_stream::<f32>(device, config, sink),
        SampleFormat::F64 => input_stream::<f64>(device, config, sink),
        other => return Err(format!("unsupported sample format {other:?}")),
    };
    stream.map_err(|e| format!("build stream: {e}"))
}

fn input_stream<T>(
    device: &Device,
    config: &StreamConfig,
    sink: SampleBuffer,
) -> Result<Stream, cpal::BuildStreamError>
where
    T: Sample + SizedSample + Send + 'static,
    f32: FromSample<T>,
{
    let channels = usize::from(config.channels.max(1));
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let Ok(mut buf) = sink.lock() else {
                return;
            };
            buf.extend(data.chunks_exact(channels).map(|frame| {
                frame.iter().map(|&s| s.to_sample::<f32>()).sum::<f32>() / channels as f32
            }));
        },
        |err| error!("Audio stream error: {}", err),
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_device_name_means_default_device() {
        assert_eq!(MicrophoneSource::named("  ").device_name, None);
        assert_eq!(
            MicrophoneSource::named("USB Mic").device_name.as_deref(),
            Some("USB Mic")
        );
        assert_eq!(MicrophoneSource::default_device().device_name, None);
    }
}
