//! Error types for the voice engine.
//!
//! Phase-local failures are typed here so the interaction state machine can
//! map them onto a [`TurnStatus`](crate::interaction::TurnStatus) instead of
//! unwinding the conversation loop. Collaborator adapters (HTTP clients,
//! model loaders) return `anyhow::Result` and are wrapped at the seam.

use thiserror::Error;

/// Errors raised by the playback engine and its sinks.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlaybackError {
    #[error("samples contain non-finite values")]
    InvalidSamples,

    #[error("invalid sample rate: {0}")]
    InvalidSampleRate(u32),

    #[error("failed to open output stream: {0}")]
    SinkOpen(String),

    #[error("failed to write to output stream: {0}")]
    SinkWrite(String),

    #[error("playback engine stopped")]
    Stopped,
}

/// Errors raised by a capture source.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("failed to open capture stream: {0}")]
    Open(String),

    #[error("capture read error: {0}")]
    Read(String),

    #[error("capture stream is closed")]
    Closed,
}

/// Errors raised while scoring a frame for speech.
#[derive(Error, Debug)]
pub enum ScorerError {
    #[error("frame has {got} samples, scorer expects {expected}")]
    FrameSize { expected: usize, got: usize },

    #[error("inference failed: {0}")]
    Inference(String),
}

/// Errors surfaced by a single interaction turn.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("required component not available: {0}")]
    MissingComponent(&'static str),

    #[error("listening failed: {0}")]
    Listen(String),

    #[error("transcription failed: {0}")]
    Transcribe(String),

    #[error("response generation failed: {0}")]
    Respond(String),

    #[error("synthesis failed: {0}")]
    Synthesis(String),

    #[error("playback failed: {0}")]
    Playback(#[from] PlaybackError),

    #[error("capture failed: {0}")]
    Capture(#[from] CaptureError),
}

impl From<cpal::DevicesError> for CaptureError {
    fn from(err: cpal::DevicesError) -> Self {
        CaptureError::Open(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for CaptureError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        CaptureError::Open(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for CaptureError {
    fn from(err: cpal::BuildStreamError) -> Self {
        CaptureError::Open(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for CaptureError {
    fn from(err: cpal::PlayStreamError) -> Self {
        CaptureError::Open(err.to_string())
    }
}
