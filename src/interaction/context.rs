//! Collaborators a conversation runs against.
//!
//! Everything an interaction touches is handed in here rather than looked up
//! from global state, so hosts and tests can swap any piece.

use std::sync::Arc;

use tracing::info;

use crate::config::EngineConfig;
use crate::conversation::Summarizer;
use crate::error::EngineError;
use crate::interrupt::InterruptDetector;
use crate::ipc::{EventSink, NullSink};
use crate::listen::Listener;
use crate::llm::Responder;
use crate::playback::PlaybackEngine;
use crate::stt::Transcriber;
use crate::tts::Synthesizer;

pub struct EngineContext {
    pub config: EngineConfig,
    pub playback: Arc<PlaybackEngine>,
    pub events: Arc<dyn EventSink>,
    pub listener: Option<Box<dyn Listener>>,
    pub transcriber: Option<Box<dyn Transcriber>>,
    pub responder: Option<Box<dyn Responder>>,
    pub synthesizer: Option<Box<dyn Synthesizer>>,
    pub detector: Option<InterruptDetector>,
    pub summarizer: Option<Box<dyn Summarizer>>,
}

impl EngineContext {
    /// A context with playback only; attach the rest with the `with_*` methods.
    pub fn new(config: EngineConfig, playback: Arc<PlaybackEngine>) -> Self {
        Self {
            config,
            playback,
            events: Arc::new(NullSink),
            listener: None,
            transcriber: None,
            responder: None,
            synthesizer: None,
            detector: None,
            summarizer: None,
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_listener(mut self, listener: Box<dyn Listener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn with_transcriber(mut self, transcriber: Box<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    pub fn with_responder(mut self, responder: Box<dyn Responder>) -> Self {
        self.responder = Some(responder);
        self
    }

    pub fn with_synthesizer(mut self, synthesizer: Box<dyn Synthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    pub fn with_detector(mut self, detector: InterruptDetector) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn with_summarizer(mut self, summarizer: Box<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// Swap in a synthesizer speaking with `voice`.
    ///
    /// The current synthesizer builds its replacement; it is only swapped
    /// once that succeeds, so a bad voice leaves the old one in place.
    pub fn reconfigure_synthesizer(&mut self, voice: &str) -> Result<(), EngineError> {
        let current = self
            .synthesizer
            .as_ref()
            .ok_or(EngineError::MissingComponent("synthesizer"))?;
        let replacement = current
            .reconfigure(voice)
            .map_err(|e| EngineError::Synthesis(e.to_string()))?;
        info!(from = %current.name(), to = %replacement.name(), "Synthesizer reconfigured");
        self.synthesizer = Some(replacement);
        Ok(())
    }

    /// Stop everything that may still be running between or after turns.
    pub fn halt_audio(&mut self) {
        if let Some(detector) = self.detector.as_mut() {
            detector.stop();
        }
        self.playback.stop(true);
    }
}
