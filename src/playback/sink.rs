//! Output sinks the playback worker writes to.
//!
//! A sink is created on the playback worker thread through a [`SinkFactory`]
//! (rodio's `OutputStream` is `!Send`) and is only ever touched from there.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait};
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamHandle, Sink};
use tracing::{debug, info, warn};

use crate::error::PlaybackError;

/// How a write ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Completed,
    Halted,
}

/// Destination for float PCM buffers.
pub trait PlaybackSink {
    /// Prepare the output for `sample_rate`. Called before the first write
    /// and again whenever the rate of the next item differs.
    fn open(&mut self, sample_rate: u32) -> Result<(), PlaybackError>;

    /// Play `samples` to completion, returning early once `halt` is set.
    fn write(
        &mut self,
        samples: &[f32],
        sample_rate: u32,
        halt: &AtomicBool,
    ) -> Result<WriteOutcome, PlaybackError>;

    /// Drop anything still buffered in the device.
    fn stop(&mut self);
}

/// Builds a sink on the worker thread.
pub type SinkFactory = Box<dyn FnMut() -> Result<Box<dyn PlaybackSink>, PlaybackError> + Send>;

/// Factory for the default rodio sink.
pub fn rodio_factory(device: Option<String>, volume: f32, poll: Duration) -> SinkFactory {
    Box::new(move || Ok(Box::new(RodioSink::new(device.clone(), volume, poll)) as Box<dyn PlaybackSink>))
}

/// Sink backed by a rodio `OutputStream` on the configured (or default) device.
pub struct RodioSink {
    device_name: Option<String>,
    volume: f32,
    poll: Duration,
    stream: Option<(OutputStream, OutputStreamHandle)>,
    sink: Option<Sink>,
    sample_rate: Option<u32>,
}

impl RodioSink {
    pub fn new(device_name: Option<String>, volume: f32, poll: Duration) -> Self {
        Self {
            device_name,
            volume: volume.clamp(0.0, 2.0),
            poll,
            stream: None,
            sink: None,
            sample_rate: None,
        }
    }

    fn ensure_sink(&mut self) -> Result<&Sink, PlaybackError> {
        if self.sink.is_none() {
            let (_, handle) = self
                .stream
                .as_ref()
                .ok_or_else(|| PlaybackError::SinkOpen("output stream not open".into()))?;
            let sink = Sink::try_new(handle)
                .map_err(|e| PlaybackError::SinkOpen(format!("Failed to create audio sink: {}", e)))?;
            sink.set_volume(self.volume);
            self.sink = Some(sink);
        }
        self.sink
            .as_ref()
            .ok_or_else(|| PlaybackError::SinkOpen("audio sink unavailable".into()))
    }
}

impl PlaybackSink for RodioSink {
    fn open(&mut self, sample_rate: u32) -> Result<(), PlaybackError> {
        if self.stream.is_some() && self.sample_rate == Some(sample_rate) {
            return Ok(());
        }
        // Reopen so the device negotiates the new rate instead of resampling.
        self.sink = None;
        self.stream = None;
        let stream = open_output_stream(self.device_name.as_deref())?;
        self.stream = Some(stream);
        self.sample_rate = Some(sample_rate);
        debug!(sample_rate, "Output stream opened");
        Ok(())
    }

    fn write(
        &mut self,
        samples: &[f32],
        sample_rate: u32,
        halt: &AtomicBool,
    ) -> Result<WriteOutcome, PlaybackError> {
        if samples.is_empty() {
            return Ok(WriteOutcome::Completed);
        }
        let poll = self.poll;
        let halted = {
            let sink = self.ensure_sink()?;
            sink.append(SamplesBuffer::new(1, sample_rate, samples.to_vec()));
            loop {
                if sink.empty() {
                    break false;
                }
                if halt.load(Ordering::SeqCst) {
                    sink.stop();
                    break true;
                }
                std::thread::sleep(poll);
            }
        };
        if halted {
            // A stopped rodio Sink is not reused; the next write builds a fresh one.
            self.sink = None;
            return Ok(WriteOutcome::Halted);
        }
        Ok(WriteOutcome::Completed)
    }

    fn stop(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.stop();
        }
    }
}

/// Open the named output device, falling back to the system default.
fn open_output_stream(device_name: Option<&str>) -> Result<(OutputStream, OutputStreamHandle), PlaybackError> {
    if let Some(name) = device_name {
        let host = cpal::default_host();
        let device = host
            .output_devices()
            .map_err(|e| PlaybackError::SinkOpen(format!("Failed to enumerate output devices: {}", e)))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false));

        match device {
            Some(dev) => {
                info!(device = %name, "Using configured output device");
                return OutputStream::try_from_device(&dev)
                    .map_err(|e| PlaybackError::SinkOpen(format!("Failed to open output device '{}': {}", name, e)));
            }
            None => {
                warn!(device = %name, "Configured output device not found, falling back to default");
            }
        }
    }
    OutputStream::try_default()
        .map_err(|e| PlaybackError::SinkOpen(format!("No audio output device available: {}", e)))
}
