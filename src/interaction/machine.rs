//! One turn: Listening -> Transcribing -> Processing -> Speaking.
//!
//! Listening failures are statuses, not errors: they short-circuit with a
//! canned apology and skip Processing and Speaking. Anything that does go
//! wrong surfaces as [`EngineError`] and ends the turn as ERROR.

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::context::EngineContext;
use super::TurnStatus;
use crate::audio::{InteractionState, StateCell};
use crate::conversation::ConversationHistory;
use crate::error::EngineError;
use crate::interrupt::InterruptSignal;
use crate::ipc::EngineEvent;
use crate::listen::ListenOutcome;
use crate::speak::{AudioOutput, SpeakOutcome, SpeechPipeline, TokenSource};

/// A single turn over borrowed engine state.
pub struct Interaction<'a> {
    ctx: &'a mut EngineContext,
    history: &'a mut ConversationHistory,
    state: &'a StateCell,
    signal: &'a InterruptSignal,
}

impl<'a> Interaction<'a> {
    pub fn new(
        ctx: &'a mut EngineContext,
        history: &'a mut ConversationHistory,
        state: &'a StateCell,
        signal: &'a InterruptSignal,
    ) -> Self {
        Self {
            ctx,
            history,
            state,
            signal,
        }
    }

    /// Run the turn to completion. Never fails; errors become an ERROR status.
    pub async fn run(mut self, cancel: &CancellationToken) -> TurnStatus {
        match self.run_phases(cancel).await {
            Ok(status) => status,
            Err(e) => self.fail(e).await,
        }
    }

    async fn run_phases(&mut self, cancel: &CancellationToken) -> Result<TurnStatus, EngineError> {
        if self.ctx.listener.is_none() {
            return Err(EngineError::MissingComponent("listener"));
        }
        if self.ctx.transcriber.is_none() {
            return Err(EngineError::MissingComponent("transcriber"));
        }

        if self.ctx.playback.is_playing() {
            info!("Stopping playback before listening");
            self.ctx.playback.stop(false);
        }

        // Listening
        self.enter(InteractionState::Listening, None);
        let outcome = match self.ctx.listener.as_mut() {
            Some(listener) => listener.listen(cancel).await,
            None => return Err(EngineError::MissingComponent("listener")),
        };
        let (samples, sample_rate) = match outcome {
            ListenOutcome::Audio {
                samples,
                sample_rate,
            } => (samples, sample_rate),
            ListenOutcome::Timeout => return Ok(self.apologize(TurnStatus::Timeout, "timeout").await),
            ListenOutcome::LowEnergy => {
                return Ok(self.apologize(TurnStatus::LowEnergy, "low energy").await)
            }
            ListenOutcome::Error(msg) => return Err(EngineError::Listen(msg)),
        };

        // Transcribing
        self.enter(InteractionState::Transcribing, None);
        let transcribed = match self.ctx.transcriber.as_ref() {
            Some(transcriber) => transcriber.transcribe(&samples, sample_rate).await,
            None => return Err(EngineError::MissingComponent("transcriber")),
        };
        let text = transcribed.map_err(|e| EngineError::Transcribe(e.to_string()))?;
        let text = text.trim();
        if text.is_empty() {
            return Ok(self.apologize(TurnStatus::LowEnergy, "no input").await);
        }
        info!(text = %text, "User said");
        self.ctx.events.emit(EngineEvent::Transcription {
            text: text.to_string(),
        });
        self.history.push_user(text);

        // Processing
        self.enter(InteractionState::Processing, None);
        let source = match self.ctx.responder.as_ref() {
            Some(responder) => responder.respond(self.history).await,
            None => return Err(EngineError::MissingComponent("responder")),
        };
        let source = source.map_err(|e| EngineError::Respond(e.to_string()))?;

        // Speaking
        let outcome = self.speak(source).await;
        if self.history.push_assistant(&outcome.text) {
            self.ctx.events.emit(EngineEvent::Response {
                text: outcome.text.trim().to_string(),
            });
        }
        Ok(self.finish(outcome.status))
    }

    /// Speak `source` with the interrupt detector armed.
    async fn speak(&mut self, source: TokenSource) -> SpeakOutcome {
        self.signal.reset();
        self.enter(InteractionState::Speaking, None);
        self.ctx.events.emit(EngineEvent::SpeakingStart {});

        if self.ctx.config.interrupt.enabled {
            if let Some(detector) = self.ctx.detector.as_mut() {
                detector.settle().await;
                if !detector.start(self.signal.clone()) {
                    debug!("Interrupt detection unavailable for this reply");
                }
            }
        }

        let ctx = &*self.ctx;
        let synthesizer = if ctx.config.turn.tts_enabled {
            ctx.synthesizer.as_deref()
        } else {
            None
        };
        let output = if ctx.config.turn.remote_audio {
            AudioOutput::Remote(ctx.events.as_ref())
        } else {
            AudioOutput::Local(ctx.playback.as_ref())
        };
        let outcome = SpeechPipeline::new(synthesizer, output, &ctx.config.chunking)
            .speak(source, self.signal)
            .await;

        if let Some(detector) = self.ctx.detector.as_mut() {
            detector.stop();
        }
        if outcome.status == TurnStatus::Interrupted {
            self.ctx.events.emit(EngineEvent::Interrupted {
                spoken: outcome.text.clone(),
            });
        }
        self.ctx.events.emit(EngineEvent::SpeakingEnd {
            status: outcome.status,
        });
        outcome
    }

    /// Record and speak a canned reply, then end the turn with `status`.
    async fn apologize(&mut self, status: TurnStatus, reason: &str) -> TurnStatus {
        let text = match status {
            TurnStatus::Error => format!("Sorry, I encountered an issue: {}. Please try again.", reason),
            _ => format!("I didn't quite catch that ({}). Could you please repeat?", reason),
        };
        info!(%status, "Assistant: {}", text);
        self.history.push_assistant(&text);
        self.ctx.events.emit(EngineEvent::Response { text: text.clone() });

        let spoken = self.speak(TokenSource::from(text)).await;
        if spoken.status != TurnStatus::Completed {
            debug!(status = %spoken.status, "Apology not fully spoken");
        }
        self.finish(status)
    }

    async fn fail(&mut self, err: EngineError) -> TurnStatus {
        error!("Interaction failed: {}", err);
        let reason = err.to_string();
        self.enter(InteractionState::Error, Some(&reason));
        self.ctx.events.emit(EngineEvent::error(reason.clone()));
        if self.ctx.playback.is_playing() {
            self.ctx.playback.stop(true);
        }
        self.apologize(TurnStatus::Error, &reason).await
    }

    fn finish(&self, status: TurnStatus) -> TurnStatus {
        self.enter(status.final_state(), None);
        status
    }

    fn enter(&self, next: InteractionState, message: Option<&str>) {
        if let Err(from) = self.state.advance(next) {
            warn!(%from, %next, "Unexpected state transition, forcing");
            self.state.force(next);
        }
        self.ctx.events.emit(EngineEvent::state(next, message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::config::{EngineConfig, PlaybackConfig};
    use crate::interrupt::InterruptDetector;
    use crate::playback::PlaybackEngine;
    use crate::testing::{
        speech, CollectingSink, FakeResponder, FakeSynthesizer, FakeTranscriber, RecordingSink,
        ScriptedCapture, ScriptedListener, ScriptedScorer,
    };

    struct Harness {
        ctx: EngineContext,
        history: ConversationHistory,
        state: StateCell,
        signal: InterruptSignal,
        events: CollectingSink,
        synth: FakeSynthesizer,
    }

    impl Harness {
        fn new(config: EngineConfig, sink: RecordingSink) -> Self {
            let playback = PlaybackEngine::new(
                PlaybackConfig {
                    poll_interval_ms: 5,
                    ..Default::default()
                },
                sink.factory(),
            );
            let events = CollectingSink::new();
            let synth = FakeSynthesizer::new();
            let ctx = EngineContext::new(config, Arc::new(playback))
                .with_events(Arc::new(events.clone()))
                .with_synthesizer(Box::new(synth.clone()));
            Self {
                ctx,
                history: ConversationHistory::new(None),
                state: StateCell::new(),
                signal: InterruptSignal::new(),
                events,
                synth,
            }
        }

        fn with(mut self, f: impl FnOnce(EngineContext) -> EngineContext) -> Self {
            self.ctx = f(self.ctx);
            self
        }

        async fn run(&mut self) -> TurnStatus {
            Interaction::new(&mut self.ctx, &mut self.history, &self.state, &self.signal)
                .run(&CancellationToken::new())
                .await
        }

        fn states(&self) -> Vec<InteractionState> {
            self.events
                .events()
                .into_iter()
                .filter_map(|e| match e {
                    EngineEvent::StateChange { state, .. } => Some(state),
                    _ => None,
                })
                .collect()
        }
    }

    fn full(config: EngineConfig) -> Harness {
        Harness::new(config, RecordingSink::new()).with(|ctx| {
            ctx.with_listener(Box::new(ScriptedListener::new(vec![speech()])))
                .with_transcriber(Box::new(FakeTranscriber::new(vec![Ok("hello there".into())])))
                .with_responder(Box::new(FakeResponder::new().reply("Hi. How can I help?")))
        })
    }

    #[tokio::test]
    async fn test_completed_turn_walks_every_phase() {
        let mut h = full(EngineConfig::default());
        assert_eq!(h.run().await, TurnStatus::Completed);

        use InteractionState::*;
        assert_eq!(h.states(), vec![Listening, Transcribing, Processing, Speaking, Idle]);
        assert_eq!(h.state.current(), Idle);
        let turns: Vec<_> = h.history.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(turns, vec!["hello there", "Hi. How can I help?"]);
        assert!(h.events.events().contains(&EngineEvent::Transcription {
            text: "hello there".into()
        }));
        assert!(!h.synth.requests().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_apologizes_without_processing() {
        let responder = FakeResponder::new();
        let calls = responder.calls();
        let mut h = Harness::new(EngineConfig::default(), RecordingSink::new()).with(|ctx| {
            ctx.with_listener(Box::new(ScriptedListener::new(vec![ListenOutcome::Timeout])))
                .with_transcriber(Box::new(FakeTranscriber::new(Vec::new())))
                .with_responder(Box::new(responder))
        });

        assert_eq!(h.run().await, TurnStatus::Timeout);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(h.history.len(), 1);
        let apology = &h.history.messages()[0].content;
        assert!(apology.starts_with("I didn't quite catch that (timeout)"));
        assert!(!states_contain(&h, InteractionState::Processing));
        assert_eq!(h.state.current(), InteractionState::Timeout);
        assert!(h.synth.requests().join(" ").contains("catch that"));
    }

    #[tokio::test]
    async fn test_empty_transcript_is_low_energy() {
        let mut h = Harness::new(EngineConfig::default(), RecordingSink::new()).with(|ctx| {
            ctx.with_listener(Box::new(ScriptedListener::new(vec![speech()])))
                .with_transcriber(Box::new(FakeTranscriber::new(vec![Ok("  ".into())])))
                .with_responder(Box::new(FakeResponder::new()))
        });
        assert_eq!(h.run().await, TurnStatus::LowEnergy);
        assert!(h.history.messages()[0].content.contains("(no input)"));
    }

    #[tokio::test]
    async fn test_missing_transcriber_fails_before_listening() {
        let listener = ScriptedListener::new(vec![speech()]);
        let listens = listener.calls();
        let mut h = Harness::new(EngineConfig::default(), RecordingSink::new())
            .with(|ctx| ctx.with_listener(Box::new(listener)));

        assert_eq!(h.run().await, TurnStatus::Error);
        assert!(listens.lock().unwrap().is_empty());
        use InteractionState::*;
        assert_eq!(h.states(), vec![Error, Speaking, Error]);
        assert_eq!(h.state.current(), Error);
        assert!(h.history.messages()[0].content.starts_with("Sorry, I encountered an issue"));
    }

    #[tokio::test]
    async fn test_responder_failure_records_user_turn_once() {
        let mut h = Harness::new(EngineConfig::default(), RecordingSink::new()).with(|ctx| {
            ctx.with_listener(Box::new(ScriptedListener::new(vec![speech()])))
                .with_transcriber(Box::new(FakeTranscriber::new(vec![Ok("what time is it".into())])))
                .with_responder(Box::new(FakeResponder::new().fail("model offline")))
        });

        assert_eq!(h.run().await, TurnStatus::Error);
        let roles: Vec<_> = h.history.messages().iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "assistant"]);
        assert!(h.history.messages()[1].content.contains("model offline"));
        assert!(h
            .events
            .events()
            .iter()
            .any(|e| matches!(e, EngineEvent::Error { message } if message.contains("model offline"))));
    }

    #[tokio::test]
    async fn test_disabled_synthesis_still_records_reply() {
        let mut config = EngineConfig::default();
        config.turn.tts_enabled = false;
        let mut h = full(config);

        assert_eq!(h.run().await, TurnStatus::Disabled);
        assert!(h.synth.requests().is_empty());
        assert_eq!(h.ctx.playback.enqueued_total(), 0);
        assert_eq!(h.history.last().unwrap().content, "Hi. How can I help?");
        assert_eq!(h.state.current(), InteractionState::Disabled);
    }

    #[tokio::test]
    async fn test_detector_barge_in_interrupts_reply() {
        let capture = ScriptedCapture::new(vec![vec![0.5; 512]; 5]);
        let scorer = ScriptedScorer::new(vec![0.9; 5]);
        let detector = InterruptDetector::new(
            Default::default(),
            Box::new(capture),
            Some(Box::new(scorer)),
        );
        let mut h = Harness::new(
            EngineConfig::default(),
            RecordingSink::new().with_write_delay(Duration::from_secs(2)),
        )
        .with(|ctx| {
            ctx.with_listener(Box::new(ScriptedListener::new(vec![speech()])))
                .with_transcriber(Box::new(FakeTranscriber::new(vec![Ok("tell me a story".into())])))
                .with_responder(Box::new(FakeResponder::new().reply("Once upon a time. There was a crate.")))
                .with_detector(detector)
        });

        assert_eq!(h.run().await, TurnStatus::Interrupted);
        assert_eq!(h.state.current(), InteractionState::Interrupted);
        assert!(!h.ctx.detector.as_ref().unwrap().is_running());
        assert!(h
            .events
            .events()
            .iter()
            .any(|e| matches!(e, EngineEvent::Interrupted { .. })));
    }

    fn states_contain(h: &Harness, state: InteractionState) -> bool {
        h.states().contains(&state)
    }
}
