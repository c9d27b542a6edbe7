//! Listening phase: capture one utterance for transcription.
//!
//! [`VadRecorder`] waits for speech onset within the timeout, records until
//! a pause or the phrase limit, and retries on timeout, low energy, or a
//! capture failure before giving up.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio::{CaptureSource, CaptureSpec};
use crate::config::ListenConfig;
use crate::vad::rms;

/// Capture granularity while listening.
const FRAME_MS: u32 = 30;

/// Audio kept from before onset so the first syllable is not clipped.
const PRE_ROLL: Duration = Duration::from_millis(300);

/// Pause between listening attempts.
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// What a listening attempt produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ListenOutcome {
    Audio { samples: Vec<f32>, sample_rate: u32 },
    /// No speech onset before the timeout.
    Timeout,
    /// Something was recorded but too quiet to be speech.
    LowEnergy,
    Error(String),
}

impl ListenOutcome {
    fn retryable(&self) -> bool {
        !matches!(self, Self::Audio { .. })
    }
}

/// Source of user utterances.
pub trait Listener: Send {
    fn listen<'a>(
        &'a mut self,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = ListenOutcome> + Send + 'a>>;
}

/// Energy-gated recorder over a [`CaptureSource`].
pub struct VadRecorder {
    config: ListenConfig,
    capture: Option<Box<dyn CaptureSource>>,
}

impl VadRecorder {
    pub fn new(config: ListenConfig, capture: Box<dyn CaptureSource>) -> Self {
        Self {
            config,
            capture: Some(capture),
        }
    }

    /// One attempt on a blocking thread; the capture source travels with it.
    async fn attempt(&mut self, cancel: &CancellationToken) -> ListenOutcome {
        let Some(mut capture) = self.capture.take() else {
            return ListenOutcome::Error("capture source unavailable".into());
        };
        let config = self.config.clone();
        let cancel = cancel.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let outcome = record_utterance(capture.as_mut(), &config, &cancel);
            (capture, outcome)
        })
        .await;

        match joined {
            Ok((capture, outcome)) => {
                self.capture = Some(capture);
                outcome
            }
            Err(e) => ListenOutcome::Error(format!("recorder task failed: {}", e)),
        }
    }
}

impl Listener for VadRecorder {
    fn listen<'a>(
        &'a mut self,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = ListenOutcome> + Send + 'a>> {
        Box::pin(async move {
            let max_retries = self.config.max_retries;
            let mut attempt = 0;
            loop {
                let outcome = self.attempt(cancel).await;
                if !outcome.retryable() || attempt >= max_retries || cancel.is_cancelled() {
                    return outcome;
                }
                attempt += 1;
                info!(attempt, max_retries, ?outcome, "Retrying listen");
                tokio::select! {
                    _ = cancel.cancelled() => return outcome,
                    _ = tokio::time::sleep(RETRY_DELAY) => {}
                }
            }
        })
    }
}

/// Record one utterance from `capture`. Blocking.
pub fn record_utterance(
    capture: &mut dyn CaptureSource,
    config: &ListenConfig,
    cancel: &CancellationToken,
) -> ListenOutcome {
    let spec = CaptureSpec {
        sample_rate: config.sample_rate,
        channels: 1,
        frame_samples: (config.sample_rate * FRAME_MS / 1000) as usize,
    };
    if let Err(e) = capture.open(spec) {
        return ListenOutcome::Error(e.to_string());
    }
    let outcome = record_open(capture, spec, config, cancel);
    capture.close();
    outcome
}

fn record_open(
    capture: &mut dyn CaptureSource,
    spec: CaptureSpec,
    config: &ListenConfig,
    cancel: &CancellationToken,
) -> ListenOutcome {
    let read_timeout = Duration::from_millis(FRAME_MS as u64 * 4);
    let pre_roll_samples = (spec.sample_rate as f64 * PRE_ROLL.as_secs_f64()) as usize;
    let pause = Duration::from_secs_f64(config.pause_secs.max(0.0));

    // Wait for onset.
    let started = Instant::now();
    let mut recorded: Vec<f32> = Vec::new();
    loop {
        if cancel.is_cancelled() {
            return ListenOutcome::Error("listening cancelled".into());
        }
        if started.elapsed() >= config.timeout() {
            debug!("No speech within {:?}", config.timeout());
            return ListenOutcome::Timeout;
        }
        match capture.read_frame(read_timeout) {
            Ok(Some(frame)) => {
                let voiced = rms(&frame.samples) >= config.speech_energy;
                recorded.extend_from_slice(&frame.samples);
                if voiced {
                    break;
                }
                if recorded.len() > pre_roll_samples {
                    recorded.drain(..recorded.len() - pre_roll_samples);
                }
            }
            Ok(None) => {}
            Err(e) => return ListenOutcome::Error(e.to_string()),
        }
    }

    // Record until a pause or the phrase limit.
    let onset = Instant::now();
    let mut last_voice = onset;
    loop {
        if cancel.is_cancelled() {
            return ListenOutcome::Error("listening cancelled".into());
        }
        let now = Instant::now();
        if now.duration_since(onset) >= config.phrase_limit() {
            debug!("Phrase limit reached");
            break;
        }
        if now.duration_since(last_voice) >= pause {
            break;
        }
        match capture.read_frame(read_timeout) {
            Ok(Some(frame)) => {
                if rms(&frame.samples) >= config.speech_energy {
                    last_voice = Instant::now();
                }
                recorded.extend_from_slice(&frame.samples);
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Capture error while recording: {}", e);
                break;
            }
        }
    }

    let energy = rms(&recorded);
    if energy < config.min_energy {
        info!(energy = energy as f64, min = config.min_energy as f64, "Recording too quiet");
        return ListenOutcome::LowEnergy;
    }
    info!(
        duration_secs = recorded.len() as f64 / spec.sample_rate as f64,
        "Utterance captured"
    );
    ListenOutcome::Audio {
        samples: recorded,
        sample_rate: spec.sample_rate,
    }
}
