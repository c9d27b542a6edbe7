//! In-crate fakes for the engine's collaborators.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::audio::{AudioFrame, CaptureSource, CaptureSpec};
use crate::conversation::{ConversationHistory, Summarizer};
use crate::error::{CaptureError, PlaybackError, ScorerError};
use crate::interrupt::InterruptSignal;
use crate::ipc::{EngineEvent, EventSink};
use crate::listen::{ListenOutcome, Listener};
use crate::llm::Responder;
use crate::playback::{PlaybackSink, SinkFactory, WriteOutcome};
use crate::speak::source::split_tokens;
use crate::speak::TokenSource;
use crate::stt::Transcriber;
use crate::tts::{SynthesizedAudio, Synthesizer};
use crate::vad::SpeechScorer;

/// A captured utterance, as the listener hands it over.
pub fn speech() -> ListenOutcome {
    ListenOutcome::Audio {
        samples: vec![0.1; 1600],
        sample_rate: 16_000,
    }
}

// ---------------------------------------------------------------------------
// Capture + scoring
// ---------------------------------------------------------------------------

/// Capture source replaying a fixed list of frames, then idling.
pub struct ScriptedCapture {
    frames: VecDeque<Vec<f32>>,
    open_failures: usize,
    spec: Option<CaptureSpec>,
    opens: Arc<AtomicUsize>,
}

impl ScriptedCapture {
    pub fn new(frames: Vec<Vec<f32>>) -> Self {
        Self {
            frames: frames.into(),
            open_failures: 0,
            spec: None,
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fail the first `n` opens.
    pub fn failing_opens(mut self, n: usize) -> Self {
        self.open_failures = n;
        self
    }

    /// Open attempts, successful or not.
    pub fn opens(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.opens)
    }
}

impl CaptureSource for ScriptedCapture {
    fn open(&mut self, spec: CaptureSpec) -> Result<(), CaptureError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.open_failures > 0 {
            self.open_failures -= 1;
            return Err(CaptureError::Open("scripted open failure".into()));
        }
        self.spec = Some(spec);
        Ok(())
    }

    fn read_frame(&mut self, timeout: Duration) -> Result<Option<AudioFrame>, CaptureError> {
        let spec = self.spec.ok_or(CaptureError::Closed)?;
        match self.frames.pop_front() {
            Some(samples) => Ok(Some(AudioFrame::new(samples, spec.sample_rate, 1))),
            None => {
                std::thread::sleep(timeout.min(Duration::from_millis(5)));
                Ok(None)
            }
        }
    }

    fn close(&mut self) {
        self.spec = None;
    }

    fn is_open(&self) -> bool {
        self.spec.is_some()
    }
}

/// Scorer returning scripted probabilities, then 0.0.
pub struct ScriptedScorer {
    scores: VecDeque<f32>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedScorer {
    pub fn new(scores: Vec<f32>) -> Self {
        Self {
            scores: scores.into(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl SpeechScorer for ScriptedScorer {
    fn score(&mut self, _frame: &[f32]) -> Result<f32, ScorerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.scores.pop_front().unwrap_or(0.0))
    }

    fn name(&self) -> String {
        "scripted".into()
    }
}

// ---------------------------------------------------------------------------
// Playback
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct WriteRecord {
    pub len: usize,
    pub sample_rate: u32,
    pub silent: bool,
}

#[derive(Default)]
struct SinkLogInner {
    writes: Mutex<Vec<WriteRecord>>,
    opens: Mutex<Vec<u32>>,
    write_calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

/// Shared view of everything a [`RecordingSink`] and its clones saw.
#[derive(Clone, Default)]
pub struct SinkLog {
    inner: Arc<SinkLogInner>,
}

impl SinkLog {
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.inner.writes.lock().unwrap().clone()
    }

    /// Sample rates of successful opens, in order.
    pub fn opens(&self) -> Vec<u32> {
        self.inner.opens.lock().unwrap().clone()
    }

    pub fn max_concurrent_writes(&self) -> usize {
        self.inner.max_active.load(Ordering::SeqCst)
    }
}

/// Playback sink that records writes instead of making sound.
///
/// Non-silent writes take `write_delay` (or forever when stalling) unless
/// halted; silent flush writes return at once.
#[derive(Clone, Default)]
pub struct RecordingSink {
    log: SinkLog,
    write_delay: Duration,
    stalling: bool,
    halt_latency: Duration,
    /// Shared by every clone: the first audible write ignores halt for this long.
    hang_once: Option<Arc<Mutex<Option<Duration>>>>,
    fail_write_at: Option<usize>,
    fail_open: bool,
    opened: Option<u32>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    /// Writes never finish on their own.
    pub fn stalling(mut self) -> Self {
        self.stalling = true;
        self
    }

    /// Take this long to notice a halt, like a device polled on a timer.
    pub fn with_halt_latency(mut self, latency: Duration) -> Self {
        self.halt_latency = latency;
        self
    }

    /// The first audible write, across every sink the factory makes, blocks
    /// for `hang` and ignores halt.
    pub fn hanging_first_write(mut self, hang: Duration) -> Self {
        self.hang_once = Some(Arc::new(Mutex::new(Some(hang))));
        self
    }

    /// Fail the write with this 0-based call index.
    pub fn failing_write(mut self, index: usize) -> Self {
        self.fail_write_at = Some(index);
        self
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn log(&self) -> SinkLog {
        self.log.clone()
    }

    pub fn factory(&self) -> SinkFactory {
        let template = self.clone();
        Box::new(move || Ok(Box::new(template.clone()) as Box<dyn PlaybackSink>))
    }
}

impl PlaybackSink for RecordingSink {
    fn open(&mut self, sample_rate: u32) -> Result<(), PlaybackError> {
        if self.fail_open {
            return Err(PlaybackError::SinkOpen("scripted open failure".into()));
        }
        self.opened = Some(sample_rate);
        self.log.inner.opens.lock().unwrap().push(sample_rate);
        Ok(())
    }

    fn write(
        &mut self,
        samples: &[f32],
        sample_rate: u32,
        halt: &AtomicBool,
    ) -> Result<WriteOutcome, PlaybackError> {
        if self.opened.is_none() {
            return Err(PlaybackError::SinkOpen("not open".into()));
        }
        let inner = &self.log.inner;
        let index = inner.write_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_write_at == Some(index) {
            return Err(PlaybackError::SinkWrite("scripted write failure".into()));
        }
        let silent = samples.iter().all(|&s| s == 0.0);
        inner.writes.lock().unwrap().push(WriteRecord {
            len: samples.len(),
            sample_rate,
            silent,
        });

        let active = inner.active.fetch_add(1, Ordering::SeqCst) + 1;
        inner.max_active.fetch_max(active, Ordering::SeqCst);
        let started = Instant::now();
        let mut outcome = WriteOutcome::Completed;
        let hang = match (&self.hang_once, silent) {
            (Some(once), false) => once.lock().unwrap().take(),
            _ => None,
        };
        if let Some(hang) = hang {
            std::thread::sleep(hang);
        } else if !silent {
            while self.stalling || started.elapsed() < self.write_delay {
                if halt.load(Ordering::SeqCst) {
                    std::thread::sleep(self.halt_latency);
                    outcome = WriteOutcome::Halted;
                    break;
                }
                std::thread::sleep(Duration::from_millis(1));
            }
        }
        inner.active.fetch_sub(1, Ordering::SeqCst);
        Ok(outcome)
    }

    fn stop(&mut self) {}
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct CollectingSink {
    events: Arc<Mutex<Vec<EngineEvent>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: EngineEvent) {
        self.events.lock().unwrap().push(event);
    }
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SynthLog {
    chunks: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

/// Synthesizer producing a short constant tone per chunk.
#[derive(Clone)]
pub struct FakeSynthesizer {
    log: Arc<SynthLog>,
    voice: String,
    fail_on: Option<usize>,
    fire_on: Option<(usize, InterruptSignal)>,
}

impl FakeSynthesizer {
    pub const SAMPLE_RATE: u32 = 16_000;

    pub fn new() -> Self {
        Self {
            log: Arc::default(),
            voice: "default".into(),
            fail_on: None,
            fire_on: None,
        }
    }

    /// Fail the synthesis call with this 0-based index.
    pub fn failing_on(mut self, index: usize) -> Self {
        self.fail_on = Some(index);
        self
    }

    /// Fire `signal` while serving the call with this 0-based index.
    pub fn firing_on(mut self, index: usize, signal: InterruptSignal) -> Self {
        self.fire_on = Some((index, signal));
        self
    }

    /// Chunks as received, trimmed.
    pub fn requests(&self) -> Vec<String> {
        self.chunks().iter().map(|c| c.trim().to_string()).collect()
    }

    /// Chunks exactly as received.
    pub fn chunks(&self) -> Vec<String> {
        self.log.chunks.lock().unwrap().clone()
    }
}

impl Synthesizer for FakeSynthesizer {
    fn synthesize(
        &self,
        text: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<SynthesizedAudio>> + Send + '_>> {
        let text = text.to_string();
        Box::pin(async move {
            let index = self.log.calls.fetch_add(1, Ordering::SeqCst);
            self.log.chunks.lock().unwrap().push(text.clone());
            if let Some((at, signal)) = &self.fire_on {
                if *at == index {
                    signal.fire();
                }
            }
            if self.fail_on == Some(index) {
                anyhow::bail!("scripted synthesis failure");
            }
            if text.trim().is_empty() {
                return Ok(SynthesizedAudio::default());
            }
            Ok(SynthesizedAudio::new(vec![0.1; 1600], Self::SAMPLE_RATE))
        })
    }

    fn reconfigure(&self, voice: &str) -> anyhow::Result<Box<dyn Synthesizer>> {
        if voice.trim().is_empty() {
            anyhow::bail!("voice must not be empty");
        }
        let mut next = self.clone();
        next.voice = voice.to_string();
        Ok(Box::new(next))
    }

    fn name(&self) -> String {
        format!("fake ({})", self.voice)
    }
}

/// Transcriber returning scripted results, then empty text.
pub struct FakeTranscriber {
    script: Mutex<VecDeque<anyhow::Result<String>>>,
}

impl FakeTranscriber {
    pub fn new(script: Vec<anyhow::Result<String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
        }
    }
}

impl Transcriber for FakeTranscriber {
    fn transcribe<'a>(
        &'a self,
        _audio: &'a [f32],
        _sample_rate: u32,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
        let next = self.script.lock().unwrap().pop_front();
        Box::pin(async move { next.unwrap_or_else(|| Ok(String::new())) })
    }

    fn name(&self) -> String {
        "fake".into()
    }
}

enum Reply {
    Text(String),
    Fail(String),
    Panic,
}

/// Responder replaying scripted replies, then "OK."
pub struct FakeResponder {
    script: Mutex<VecDeque<Reply>>,
    calls: Arc<AtomicUsize>,
}

impl FakeResponder {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn reply(self, text: &str) -> Self {
        self.script.lock().unwrap().push_back(Reply::Text(text.into()));
        self
    }

    pub fn fail(self, message: &str) -> Self {
        self.script.lock().unwrap().push_back(Reply::Fail(message.into()));
        self
    }

    pub fn panicking(self) -> Self {
        self.script.lock().unwrap().push_back(Reply::Panic);
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl Responder for FakeResponder {
    fn respond<'a>(
        &'a self,
        _history: &'a ConversationHistory,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<TokenSource>> + Send + 'a>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        Box::pin(async move {
            match next.unwrap_or_else(|| Reply::Text("OK.".into())) {
                Reply::Text(text) => Ok(TokenSource::from_tokens(split_tokens(&text))),
                Reply::Fail(message) => Err(anyhow::anyhow!(message)),
                Reply::Panic => panic!("responder exploded"),
            }
        })
    }

    fn name(&self) -> String {
        "fake".into()
    }
}

/// Listener replaying scripted outcomes. Once the script runs out it blocks
/// forever, optionally cancelling `cancel_when_done` first.
pub struct ScriptedListener {
    script: VecDeque<ListenOutcome>,
    calls: Arc<Mutex<Vec<Instant>>>,
    cancel_when_done: Option<CancellationToken>,
}

impl ScriptedListener {
    pub fn new(script: Vec<ListenOutcome>) -> Self {
        Self {
            script: script.into(),
            calls: Arc::default(),
            cancel_when_done: None,
        }
    }

    pub fn cancel_when_done(mut self, token: CancellationToken) -> Self {
        self.cancel_when_done = Some(token);
        self
    }

    /// When each listen started.
    pub fn calls(&self) -> Arc<Mutex<Vec<Instant>>> {
        Arc::clone(&self.calls)
    }
}

impl Listener for ScriptedListener {
    fn listen<'a>(
        &'a mut self,
        _cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = ListenOutcome> + Send + 'a>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(Instant::now());
            if let Some(outcome) = self.script.pop_front() {
                return outcome;
            }
            if let Some(token) = &self.cancel_when_done {
                token.cancel();
            }
            std::future::pending().await
        })
    }
}

/// Summarizer returning a fixed summary.
pub struct FakeSummarizer {
    summary: String,
    calls: Arc<AtomicUsize>,
}

impl FakeSummarizer {
    pub fn new(summary: &str) -> Self {
        Self {
            summary: summary.into(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl Summarizer for FakeSummarizer {
    fn summarize<'a>(
        &'a self,
        _history: &'a ConversationHistory,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let summary = self.summary.clone();
        Box::pin(async move { Ok(summary) })
    }
}
