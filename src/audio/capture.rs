//! Microphone capture.
//!
//! [`CaptureSource`] is the seam the listener and the interrupt detector read
//! frames through. [`CpalCapture`] opens the default (or named) input device
//! at its native rate, down-mixes to mono, resamples to the requested rate,
//! and hands out fixed-size frames from a lock-free ring buffer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use tracing::{debug, error, info};

use super::frame::{resample_linear, to_mono, AudioFrame};
use super::ring_buffer::{audio_ring_buffer, AudioConsumer};
use crate::error::CaptureError;

/// Sleep between ring buffer checks while waiting for a full frame.
const READ_POLL: Duration = Duration::from_millis(2);

/// Parameters a capture source is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSpec {
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_samples: usize,
}

/// A source of fixed-size PCM frames.
///
/// `read_frame` blocks for at most `timeout` and returns `Ok(None)` when no
/// full frame arrived in time, so a reader can check its stop flag between
/// reads. Sources are moved onto the reading thread; closing one from another
/// execution context goes through that reader's stop flag.
pub trait CaptureSource: Send {
    fn open(&mut self, spec: CaptureSpec) -> Result<(), CaptureError>;

    fn read_frame(&mut self, timeout: Duration) -> Result<Option<AudioFrame>, CaptureError>;

    fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// List available input device names.
pub fn list_devices() -> Vec<String> {
    let host = cpal::default_host();
    let mut names = Vec::new();
    if let Ok(devices) = host.input_devices() {
        for dev in devices {
            if let Ok(name) = dev.name() {
                names.push(name);
            }
        }
    }
    names
}

/// Wrapper to make `cpal::Stream` Send.
///
/// `cpal::Stream` is `!Send` on some platforms because of internal raw
/// pointers. We only keep it alive and drop it from the thread that reads
/// frames; the audio callback runs on cpal's own thread.
struct SendStream(#[allow(dead_code)] Stream);

// SAFETY: the stream is never accessed after creation, only held and dropped.
unsafe impl Send for SendStream {}

/// Capture source backed by a cpal input stream.
pub struct CpalCapture {
    device_name: Option<String>,
    stream: Option<SendStream>,
    consumer: Option<AudioConsumer>,
    spec: Option<CaptureSpec>,
    stream_failed: Arc<AtomicBool>,
}

impl CpalCapture {
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            stream: None,
            consumer: None,
            spec: None,
            stream_failed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn resolve_device(&self) -> Result<cpal::Device, CaptureError> {
        let host = cpal::default_host();
        let device = if let Some(name) = &self.device_name {
            host.input_devices()?
                .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                .ok_or_else(|| CaptureError::Open(format!("Input device not found: {name}")))?
        } else {
            host.default_input_device()
                .ok_or_else(|| CaptureError::Open("No default input device available".into()))?
        };
        let dev_name = device.name().unwrap_or_else(|_| "unknown".into());
        info!(device = %dev_name, "Selected input device");
        Ok(device)
    }
}

impl CaptureSource for CpalCapture {
    fn open(&mut self, spec: CaptureSpec) -> Result<(), CaptureError> {
        if self.is_open() {
            self.close();
        }

        let device = self.resolve_device()?;
        let default_config = device.default_input_config()?;
        let native_rate = default_config.sample_rate().0;
        let native_channels = default_config.channels();

        let stream_config = StreamConfig {
            channels: native_channels,
            sample_rate: cpal::SampleRate(native_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        info!(
            native_rate,
            native_channels,
            target_rate = spec.sample_rate,
            frame_samples = spec.frame_samples,
            "Opening capture stream"
        );

        // Room for ~10 s at the target rate, never less than a few frames.
        let capacity = (spec.sample_rate as usize * 10).max(spec.frame_samples * 8);
        let (mut producer, consumer) = audio_ring_buffer(Some(capacity));
        let target_rate = spec.sample_rate;
        let failed = Arc::clone(&self.stream_failed);
        failed.store(false, Ordering::SeqCst);

        let stream = device.build_input_stream(
            &stream_config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                let mono = to_mono(data, native_channels);
                let resampled = resample_linear(&mono, native_rate, target_rate);
                // A full ring drops the newest audio; the reader catches up.
                producer.push_slice(&resampled);
            },
            move |err| {
                error!("Audio input stream error: {}", err);
                failed.store(true, Ordering::SeqCst);
            },
            None,
        )?;
        stream.play()?;

        self.stream = Some(SendStream(stream));
        self.consumer = Some(consumer);
        self.spec = Some(spec);
        info!("Audio capture started");
        Ok(())
    }

    fn read_frame(&mut self, timeout: Duration) -> Result<Option<AudioFrame>, CaptureError> {
        let (Some(consumer), Some(spec)) = (self.consumer.as_mut(), self.spec) else {
            return Err(CaptureError::Closed);
        };
        let deadline = Instant::now() + timeout;
        loop {
            if self.stream_failed.swap(false, Ordering::SeqCst) {
                return Err(CaptureError::Read("input stream reported an error".into()));
            }
            if let Some(samples) = consumer.pop_exact(spec.frame_samples) {
                return Ok(Some(AudioFrame::new(samples, spec.sample_rate, 1)));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(READ_POLL);
        }
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!("Audio capture stopped");
        }
        self.consumer = None;
        self.spec = None;
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.close();
    }
}
