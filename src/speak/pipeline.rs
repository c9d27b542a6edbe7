//! Streaming synthesis: tokens in, chunks synthesized and queued for
//! playback as they become speakable, racing the interrupt signal.

use std::sync::atomic::{AtomicU64, Ordering};

use base64::Engine as _;
use futures_util::StreamExt;
use tracing::{debug, info, warn};

use super::chunker::TextChunker;
use super::source::TokenSource;
use crate::audio::f32_to_pcm16le;
use crate::config::ChunkingConfig;
use crate::error::PlaybackError;
use crate::interaction::TurnStatus;
use crate::interrupt::InterruptSignal;
use crate::ipc::{EngineEvent, EventSink};
use crate::playback::PlaybackEngine;
use crate::tts::Synthesizer;

/// Result of one Speak phase.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakOutcome {
    pub status: TurnStatus,
    /// Everything the token source produced before the phase ended.
    pub text: String,
    /// Chunks handed to playback (or to the event sink in remote mode).
    pub chunks_played: usize,
}

/// Where synthesized audio goes.
#[derive(Clone, Copy)]
pub enum AudioOutput<'a> {
    /// Queue on the local playback engine.
    Local(&'a PlaybackEngine),
    /// Emit as `audio_chunk` events for a host that renders audio itself.
    Remote(&'a dyn EventSink),
}

enum ChunkAbort {
    Interrupted,
    Failed(PlaybackError),
}

/// One Speak phase's worth of collaborators.
pub struct SpeechPipeline<'a> {
    synthesizer: Option<&'a dyn Synthesizer>,
    output: AudioOutput<'a>,
    chunking: &'a ChunkingConfig,
    seq: AtomicU64,
}

impl<'a> SpeechPipeline<'a> {
    /// `synthesizer: None` means synthesis is disabled for this phase.
    pub fn new(
        synthesizer: Option<&'a dyn Synthesizer>,
        output: AudioOutput<'a>,
        chunking: &'a ChunkingConfig,
    ) -> Self {
        Self {
            synthesizer,
            output,
            chunking,
            seq: AtomicU64::new(0),
        }
    }

    /// Speak a token source, aborting promptly once `signal` fires.
    ///
    /// The signal is checked at every token and raced against every
    /// synthesis, enqueue, and the final drain. A chunk that fails to
    /// synthesize is skipped. With synthesis disabled the whole source is
    /// consumed and nothing reaches playback.
    pub async fn speak(&self, source: TokenSource, signal: &InterruptSignal) -> SpeakOutcome {
        let mut tokens = source.into_stream();
        let mut text = String::new();

        let Some(synthesizer) = self.synthesizer else {
            while let Some(token) = tokens.next().await {
                match token {
                    Ok(token) => text.push_str(&token),
                    Err(e) => {
                        warn!("Token source failed: {}", e);
                        break;
                    }
                }
            }
            debug!(chars = text.len(), "Synthesis disabled, reply consumed silently");
            return self.outcome(TurnStatus::Disabled, text, 0);
        };

        let mut chunker = TextChunker::new(self.chunking);
        let mut played = 0usize;
        let mut source_failed = false;

        loop {
            let next = tokio::select! {
                biased;
                _ = signal.fired() => return self.interrupted(text, played),
                next = tokens.next() => next,
            };
            let token = match next {
                None => break,
                Some(Ok(token)) => token,
                Some(Err(e)) => {
                    warn!("Token source failed, speaking what arrived: {}", e);
                    source_failed = true;
                    break;
                }
            };

            text.push_str(&token);
            if signal.is_fired() {
                return self.interrupted(text, played);
            }
            if let Some(chunk) = chunker.push(&token) {
                match self.speak_chunk(synthesizer, &chunk, signal).await {
                    Ok(true) => played += 1,
                    Ok(false) => {}
                    Err(ChunkAbort::Interrupted) => return self.interrupted(text, played),
                    Err(ChunkAbort::Failed(e)) => return self.failed(e, text, played),
                }
            }
        }

        if let Some(chunk) = chunker.finish() {
            match self.speak_chunk(synthesizer, &chunk, signal).await {
                Ok(true) => played += 1,
                Ok(false) => {}
                Err(ChunkAbort::Interrupted) => return self.interrupted(text, played),
                Err(ChunkAbort::Failed(e)) => return self.failed(e, text, played),
            }
        }

        if source_failed && text.trim().is_empty() {
            return self.outcome(TurnStatus::Error, text, played);
        }

        let AudioOutput::Local(playback) = self.output else {
            return self.outcome(TurnStatus::Completed, text, played);
        };

        let drained = tokio::select! {
            biased;
            _ = signal.fired() => return self.interrupted(text, played),
            drained = playback.wait_for_drain(None) => drained,
        };
        match drained {
            Ok(true) => self.outcome(TurnStatus::Completed, text, played),
            Ok(false) => {
                warn!("Playback did not drain in time");
                self.outcome(TurnStatus::Timeout, text, played)
            }
            Err(e) => self.failed(e, text, played),
        }
    }

    /// Synthesize one chunk and hand it to the output.
    ///
    /// The chunk goes to the synthesizer verbatim; blank chunks come back as
    /// empty audio. `Ok(false)` means nothing was played (synthesis failure
    /// or empty audio) and the phase goes on.
    async fn speak_chunk(
        &self,
        synthesizer: &dyn Synthesizer,
        chunk: &str,
        signal: &InterruptSignal,
    ) -> Result<bool, ChunkAbort> {
        if signal.is_fired() {
            return Err(ChunkAbort::Interrupted);
        }
        let speakable = chunk.trim();

        let synthesized = tokio::select! {
            biased;
            _ = signal.fired() => return Err(ChunkAbort::Interrupted),
            result = synthesizer.synthesize(chunk) => result,
        };
        let audio = match synthesized {
            Ok(audio) => audio,
            Err(e) => {
                warn!("Synthesis failed, skipping chunk {:?}: {}", speakable, e);
                return Ok(false);
            }
        };
        if audio.is_empty() {
            debug!("Synthesizer returned no audio for {:?}", speakable);
            return Ok(false);
        }

        match self.output {
            AudioOutput::Remote(events) => {
                if signal.is_fired() {
                    return Err(ChunkAbort::Interrupted);
                }
                let seq = self.seq.fetch_add(1, Ordering::SeqCst);
                events.emit(EngineEvent::AudioChunk {
                    data: base64::engine::general_purpose::STANDARD.encode(f32_to_pcm16le(&audio.samples)),
                    sample_rate: audio.sample_rate,
                    format: "pcm_s16le".to_string(),
                    seq,
                });
                Ok(true)
            }
            AudioOutput::Local(playback) => {
                let queued = tokio::select! {
                    biased;
                    _ = signal.fired() => return Err(ChunkAbort::Interrupted),
                    queued = playback.enqueue_unless_fired(audio.samples, audio.sample_rate, signal) => queued,
                };
                match queued {
                    Ok(true) => {
                        debug!(chars = speakable.len(), "Chunk queued for playback");
                        Ok(true)
                    }
                    Ok(false) => Err(ChunkAbort::Interrupted),
                    Err(e @ (PlaybackError::InvalidSamples | PlaybackError::InvalidSampleRate(_))) => {
                        warn!("Synthesizer produced unplayable audio, skipping chunk: {}", e);
                        Ok(false)
                    }
                    Err(e) => Err(ChunkAbort::Failed(e)),
                }
            }
        }
    }

    fn interrupted(&self, text: String, played: usize) -> SpeakOutcome {
        if let AudioOutput::Local(playback) = self.output {
            playback.stop(false);
        }
        info!(chunks_played = played, chars = text.len(), "Speech interrupted");
        self.outcome(TurnStatus::Interrupted, text, played)
    }

    fn failed(&self, err: PlaybackError, text: String, played: usize) -> SpeakOutcome {
        warn!("Playback failed, aborting speech: {}", err);
        if let AudioOutput::Local(playback) = self.output {
            playback.stop(true);
        }
        self.outcome(TurnStatus::Error, text, played)
    }

    fn outcome(&self, status: TurnStatus, text: String, chunks_played: usize) -> SpeakOutcome {
        SpeakOutcome {
            status,
            text,
            chunks_played,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlaybackConfig;
    use crate::ipc::EngineEvent;
    use crate::testing::{CollectingSink, FakeSynthesizer, RecordingSink};
    use futures_util::stream;
    use std::time::Duration;

    fn engine(sink: RecordingSink) -> PlaybackEngine {
        PlaybackEngine::new(
            PlaybackConfig {
                poll_interval_ms: 5,
                ..Default::default()
            },
            sink.factory(),
        )
    }

    fn chunking(target: usize) -> ChunkingConfig {
        ChunkingConfig {
            initial_chunk_target_words: target,
            ..Default::default()
        }
    }

    fn tokens(list: &[&str]) -> TokenSource {
        TokenSource::from_tokens(list.iter().map(|s| s.to_string()).collect::<Vec<_>>())
    }

    #[tokio::test]
    async fn test_speaks_all_chunks_in_order() {
        let sink = RecordingSink::new();
        let playback = engine(sink.clone());
        let synth = FakeSynthesizer::new();
        let cfg = chunking(3);
        let pipeline = SpeechPipeline::new(Some(&synth), AudioOutput::Local(&playback), &cfg);

        let outcome = pipeline
            .speak(
                tokens(&["Hi", " there", ", ", "how", " are", " you", "?"]),
                &InterruptSignal::new(),
            )
            .await;

        assert_eq!(outcome.status, TurnStatus::Completed);
        assert_eq!(outcome.text, "Hi there, how are you?");
        assert_eq!(outcome.chunks_played, 2);
        assert_eq!(synth.requests(), vec!["Hi there,", "how are you?"]);
        assert_eq!(playback.enqueued_total(), 2);
    }

    #[tokio::test]
    async fn test_synthesized_text_reproduces_stream() {
        let playback = engine(RecordingSink::new());
        let synth = FakeSynthesizer::new();
        let cfg = chunking(4);
        let pipeline = SpeechPipeline::new(Some(&synth), AudioOutput::Local(&playback), &cfg);
        let text = "First, a short one. Then a longer sentence follows here! And the end?";

        let outcome = pipeline.speak(TokenSource::from(text), &InterruptSignal::new()).await;

        assert_eq!(outcome.status, TurnStatus::Completed);
        assert_eq!(outcome.text, text);
        assert_eq!(synth.chunks().concat(), text);
    }

    #[tokio::test]
    async fn test_disabled_consumes_source_and_never_enqueues() {
        let playback = engine(RecordingSink::new());
        let cfg = chunking(2);
        let pipeline = SpeechPipeline::new(None, AudioOutput::Local(&playback), &cfg);

        let outcome = pipeline
            .speak(TokenSource::from("one two three. four five."), &InterruptSignal::new())
            .await;

        assert_eq!(outcome.status, TurnStatus::Disabled);
        assert_eq!(outcome.text, "one two three. four five.");
        assert_eq!(playback.enqueued_total(), 0);
        assert!(!playback.is_playing());
    }

    #[tokio::test]
    async fn test_synthesis_failure_skips_only_that_chunk() {
        let playback = engine(RecordingSink::new());
        let synth = FakeSynthesizer::new().failing_on(1);
        let cfg = chunking(1);
        let pipeline = SpeechPipeline::new(Some(&synth), AudioOutput::Local(&playback), &cfg);

        let outcome = pipeline
            .speak(tokens(&["One.", " Two.", " Three."]), &InterruptSignal::new())
            .await;

        assert_eq!(outcome.status, TurnStatus::Completed);
        assert_eq!(outcome.chunks_played, 2);
        assert_eq!(playback.enqueued_total(), 2);
    }

    #[tokio::test]
    async fn test_no_enqueue_after_interrupt_fires() {
        let playback = engine(RecordingSink::new().with_write_delay(Duration::from_millis(20)));
        let signal = InterruptSignal::new();
        // The detector fires while chunk #2 (0-based) is being synthesized.
        let synth = FakeSynthesizer::new().firing_on(2, signal.clone());
        let cfg = chunking(1);
        let pipeline = SpeechPipeline::new(Some(&synth), AudioOutput::Local(&playback), &cfg);

        let outcome = pipeline
            .speak(tokens(&["A.", " B.", " C.", " D.", " E."]), &signal)
            .await;

        assert_eq!(outcome.status, TurnStatus::Interrupted);
        assert_eq!(playback.enqueued_total(), 2);
        assert_eq!(outcome.chunks_played, 2);
        assert!(outcome.text.starts_with("A. B. C."));
        assert!(!outcome.text.contains('E'));
    }

    #[tokio::test]
    async fn test_interrupt_during_drain_stops_playback() {
        let playback = engine(RecordingSink::new().with_write_delay(Duration::from_secs(2)));
        let synth = FakeSynthesizer::new();
        let cfg = chunking(1);
        let pipeline = SpeechPipeline::new(Some(&synth), AudioOutput::Local(&playback), &cfg);
        let signal = InterruptSignal::new();

        let firer = {
            let signal = signal.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                signal.fire();
            })
        };
        let started = std::time::Instant::now();
        let outcome = pipeline.speak(tokens(&["Long sentence."]), &signal).await;
        firer.await.unwrap();

        assert_eq!(outcome.status, TurnStatus::Interrupted);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(playback.queued_len(), 0);
    }

    #[tokio::test]
    async fn test_already_fired_signal_aborts_before_first_chunk() {
        let playback = engine(RecordingSink::new());
        let synth = FakeSynthesizer::new();
        let cfg = chunking(1);
        let pipeline = SpeechPipeline::new(Some(&synth), AudioOutput::Local(&playback), &cfg);
        let signal = InterruptSignal::new();
        signal.fire();

        let outcome = pipeline.speak(tokens(&["Hello."]), &signal).await;
        assert_eq!(outcome.status, TurnStatus::Interrupted);
        assert!(synth.requests().is_empty());
        assert_eq!(playback.enqueued_total(), 0);
    }

    #[tokio::test]
    async fn test_sink_failure_maps_to_error() {
        let playback = engine(RecordingSink::new().failing_open());
        let synth = FakeSynthesizer::new();
        let cfg = chunking(1);
        let pipeline = SpeechPipeline::new(Some(&synth), AudioOutput::Local(&playback), &cfg);

        let outcome = pipeline.speak(tokens(&["Hello."]), &InterruptSignal::new()).await;
        assert_eq!(outcome.status, TurnStatus::Error);
    }

    #[tokio::test]
    async fn test_drain_timeout_maps_to_timeout() {
        let playback = PlaybackEngine::new(
            PlaybackConfig {
                poll_interval_ms: 5,
                ..Default::default()
            },
            RecordingSink::new().stalling().factory(),
        );
        let synth = FakeSynthesizer::new();
        let cfg = chunking(1);
        let pipeline = SpeechPipeline::new(Some(&synth), AudioOutput::Local(&playback), &cfg);

        tokio::time::pause();
        let outcome = pipeline.speak(tokens(&["Hi."]), &InterruptSignal::new()).await;
        assert_eq!(outcome.status, TurnStatus::Timeout);
    }

    #[tokio::test]
    async fn test_remote_output_emits_audio_events() {
        let events = CollectingSink::new();
        let synth = FakeSynthesizer::new();
        let cfg = chunking(1);
        let pipeline = SpeechPipeline::new(Some(&synth), AudioOutput::Remote(&events), &cfg);

        let outcome = pipeline.speak(tokens(&["One.", " Two."]), &InterruptSignal::new()).await;
        assert_eq!(outcome.status, TurnStatus::Completed);

        let chunks: Vec<_> = events
            .events()
            .into_iter()
            .filter_map(|e| match e {
                EngineEvent::AudioChunk {
                    seq,
                    format,
                    sample_rate,
                    ..
                } => Some((seq, format, sample_rate)),
                _ => None,
            })
            .collect();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].0, 0);
        assert_eq!(chunks[1].0, 1);
        assert_eq!(chunks[0].1, "pcm_s16le");
        assert_eq!(chunks[0].2, FakeSynthesizer::SAMPLE_RATE);
    }

    #[tokio::test]
    async fn test_stream_error_with_no_text_is_error() {
        let playback = engine(RecordingSink::new());
        let synth = FakeSynthesizer::new();
        let cfg = chunking(1);
        let pipeline = SpeechPipeline::new(Some(&synth), AudioOutput::Local(&playback), &cfg);
        let source = TokenSource::Stream(
            stream::iter(vec![Err(anyhow::anyhow!("connection reset"))]).boxed(),
        );

        let outcome = pipeline.speak(source, &InterruptSignal::new()).await;
        assert_eq!(outcome.status, TurnStatus::Error);
    }
}
