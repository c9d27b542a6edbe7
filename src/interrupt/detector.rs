//! Barge-in detection while the assistant is speaking.
//!
//! A dedicated thread reads frames from the capture source, scores each one
//! for energy and speech probability, and feeds an [`ActivationCounter`].
//! Sustained activity fires the phase's [`InterruptSignal`] exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::hysteresis::ActivationCounter;
use super::signal::InterruptSignal;
use crate::audio::{CaptureSource, CaptureSpec};
use crate::config::InterruptConfig;
use crate::error::CaptureError;
use crate::vad::{rms, SpeechScorer};

/// Upper bound on a single blocking read; also bounds how long stop() takes.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Back-off after a transient capture error.
const ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Capture + scorer pair, owned by the detector thread while it runs.
struct DetectorParts {
    capture: Box<dyn CaptureSource>,
    scorer: Box<dyn SpeechScorer>,
}

struct Running {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<DetectorParts>,
}

/// Per-frame decision, exposed for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameVerdict {
    pub energy: f32,
    pub probability: f32,
    pub active: bool,
}

/// Classify a frame: active iff energy AND probability clear their thresholds.
pub fn classify(config: &InterruptConfig, energy: f32, probability: f32) -> FrameVerdict {
    FrameVerdict {
        energy,
        probability,
        active: energy > config.energy_threshold && probability >= config.probability_threshold,
    }
}

/// Interrupt detector: start at the beginning of a Speak phase, stop at its end.
pub struct InterruptDetector {
    config: InterruptConfig,
    parts: Option<DetectorParts>,
    capture_only: Option<Box<dyn CaptureSource>>,
    running: Option<Running>,
    stopping: Option<JoinHandle<DetectorParts>>,
}

impl InterruptDetector {
    /// Build a detector. Without a scorer, `start` is a no-op.
    pub fn new(
        config: InterruptConfig,
        capture: Box<dyn CaptureSource>,
        scorer: Option<Box<dyn SpeechScorer>>,
    ) -> Self {
        let (parts, capture_only) = match scorer {
            Some(scorer) => (Some(DetectorParts { capture, scorer }), None),
            None => (None, Some(capture)),
        };
        Self {
            config,
            parts,
            capture_only,
            running: None,
            stopping: None,
        }
    }

    /// Whether interrupts can fire at all (enabled and a scorer is loaded).
    pub fn is_available(&self) -> bool {
        self.config.enabled && self.capture_only.is_none()
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .map(|r| !r.handle.is_finished())
            .unwrap_or(false)
    }

    /// Begin listening for barge-in; fires `signal` on sustained speech.
    ///
    /// Returns `false` when interrupts are unavailable, in which case the
    /// phase simply runs without them.
    pub fn start(&mut self, signal: InterruptSignal) -> bool {
        if !self.is_available() {
            debug!("Interrupt detector unavailable, speaking without barge-in");
            return false;
        }
        if self.is_running() {
            debug!("Interrupt detector already running");
            return true;
        }
        self.reclaim();

        let Some(mut parts) = self.parts.take() else {
            warn!("Interrupt detector components were lost, interrupts disabled");
            return false;
        };
        parts.scorer.reset();

        let stop = Arc::new(AtomicBool::new(false));
        let config = self.config.clone();
        let stop_flag = Arc::clone(&stop);
        let spawned = std::thread::Builder::new()
            .name("interrupt-detector".into())
            .spawn(move || listen(parts, config, signal, stop_flag));

        match spawned {
            Ok(handle) => {
                self.running = Some(Running { stop, handle });
                true
            }
            Err(e) => {
                // The closure (and the parts) are gone with the failed spawn.
                error!("Failed to spawn interrupt detector thread: {}", e);
                false
            }
        }
    }

    /// Stop listening. Idempotent; returns without waiting for the thread.
    pub fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            running.stop.store(true, Ordering::SeqCst);
            self.stopping = Some(running.handle);
            debug!("Interrupt detector stop requested");
        }
    }

    /// Take back the components of the previous run without blocking the
    /// runtime. Call before [`start`](Self::start) from async code; `start`
    /// then has nothing left to join.
    pub async fn settle(&mut self) {
        let finished = self.running.as_ref().is_some_and(|r| r.handle.is_finished());
        let handle = match self.stopping.take() {
            Some(handle) => handle,
            None if finished => match self.running.take() {
                Some(running) => running.handle,
                None => return,
            },
            None => return,
        };
        match tokio::task::spawn_blocking(move || handle.join()).await {
            Ok(Ok(parts)) => self.parts = Some(parts),
            Ok(Err(_)) => error!("Interrupt detector thread panicked"),
            Err(e) => error!("Failed to join interrupt detector thread: {}", e),
        }
    }

    /// Wait for a previous run to hand its components back.
    fn reclaim(&mut self) {
        let handle = self
            .stopping
            .take()
            .or_else(|| self.running.take().map(|r| r.handle));
        if let Some(handle) = handle {
            match handle.join() {
                Ok(parts) => self.parts = Some(parts),
                Err(_) => error!("Interrupt detector thread panicked"),
            }
        }
    }
}

impl Drop for InterruptDetector {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Detector thread body. Returns the components so the next phase can reuse them.
fn listen(
    mut parts: DetectorParts,
    config: InterruptConfig,
    signal: InterruptSignal,
    stop: Arc<AtomicBool>,
) -> DetectorParts {
    let spec = CaptureSpec {
        sample_rate: config.sample_rate,
        channels: 1,
        frame_samples: config.frame_samples,
    };
    if let Err(e) = parts.capture.open(spec) {
        error!("Failed to open interrupt capture stream: {}, interrupts disabled for this phase", e);
        return parts;
    }

    info!(
        sample_rate = spec.sample_rate,
        frame_samples = spec.frame_samples,
        scorer = %parts.scorer.name(),
        "Interrupt listener started"
    );

    let mut counter = ActivationCounter::new(config.activation_threshold);

    while !stop.load(Ordering::SeqCst) {
        match parts.capture.read_frame(READ_TIMEOUT) {
            Ok(Some(frame)) => {
                let energy = rms(&frame.samples);
                let probability = match parts.scorer.score(&frame.samples) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("Speech scoring failed: {}", e);
                        0.0
                    }
                };
                let verdict = classify(&config, energy, probability);
                if counter.observe(verdict.active) && signal.fire() {
                    info!(
                        energy = verdict.energy as f64,
                        probability = verdict.probability as f64,
                        frames = counter.threshold(),
                        "Interrupt detected"
                    );
                }
            }
            Ok(None) => continue,
            Err(CaptureError::Closed) => {
                error!("Interrupt capture stream closed unexpectedly");
                break;
            }
            Err(e) => {
                warn!("Capture error in interrupt listener, skipping frame: {}", e);
                std::thread::sleep(ERROR_BACKOFF);
            }
        }
    }

    parts.capture.close();
    debug!("Interrupt listener exited");
    parts
}
