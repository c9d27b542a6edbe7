//! Bounded playback queue with a dedicated worker thread.
//!
//! Producers call [`PlaybackEngine::enqueue`]; a single worker pops items in
//! order and writes them to the sink. The queue is bounded by a semaphore
//! whose permit travels with each item, so a full queue suspends the
//! producer until the worker finishes something.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

use super::sink::{SinkFactory, WriteOutcome};
use crate::config::PlaybackConfig;
use crate::error::PlaybackError;
use crate::interrupt::InterruptSignal;

/// Bounds on the default drain timeout, in seconds.
const DRAIN_TIMEOUT_MIN: f64 = 5.0;
const DRAIN_TIMEOUT_MAX: f64 = 60.0;

/// How long a forced stop waits for the worker thread to exit.
const FORCE_JOIN_WAIT: Duration = Duration::from_millis(200);

/// How long a new worker waits for a stopped predecessor to finish its
/// halted write and flush before it touches the device.
const RETIRE_WAIT: Duration = Duration::from_millis(500);

/// One queued buffer. Owned by the queue from enqueue until it is played or
/// discarded; dropping it frees a queue slot.
pub struct PlaybackItem {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    _slot: OwnedSemaphorePermit,
}

impl PlaybackItem {
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

/// State shared between the engine handle and its worker.
struct Shared {
    queue: Mutex<VecDeque<PlaybackItem>>,
    wake: Condvar,
    /// Duration of queued plus in-flight audio, in microseconds.
    buffered_us: AtomicU64,
    /// Items accepted since the engine was created.
    enqueued: AtomicU64,
    last_error: Mutex<Option<PlaybackError>>,
}

impl Shared {
    fn consume_buffered(&self, played: Duration) {
        let played = played.as_micros() as u64;
        let _ = self
            .buffered_us
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |us| Some(us.saturating_sub(played)));
    }

    fn record_error(&self, err: PlaybackError) {
        *lock(&self.last_error) = Some(err);
    }
}

struct Worker {
    cancel: Arc<AtomicBool>,
    /// Items this worker is writing. A worker that was stopped no longer
    /// counts towards [`PlaybackEngine::is_playing`].
    in_flight: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

/// Producer/consumer playback pipeline.
pub struct PlaybackEngine {
    config: PlaybackConfig,
    shared: Arc<Shared>,
    slots: Arc<Semaphore>,
    factory: Arc<Mutex<SinkFactory>>,
    worker: Mutex<Option<Worker>>,
    /// Last stopped worker, possibly still inside its halted write.
    retired: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackEngine {
    pub fn new(config: PlaybackConfig, factory: SinkFactory) -> Self {
        let capacity = config.queue_capacity.max(1);
        Self {
            config,
            shared: Arc::new(Shared {
                queue: Mutex::new(VecDeque::with_capacity(capacity)),
                wake: Condvar::new(),
                buffered_us: AtomicU64::new(0),
                enqueued: AtomicU64::new(0),
                last_error: Mutex::new(None),
            }),
            slots: Arc::new(Semaphore::new(capacity)),
            factory: Arc::new(Mutex::new(factory)),
            worker: Mutex::new(None),
            retired: Mutex::new(None),
        }
    }

    /// Queue a buffer for playback, waiting for a free slot if the queue is full.
    ///
    /// Samples must be finite; buffers peaking above 1.0 are rescaled. Starts
    /// the worker on first use. Fails with the pending sink error, if any, so
    /// a producer stops feeding a dead output.
    pub async fn enqueue(&self, samples: Vec<f32>, sample_rate: u32) -> Result<(), PlaybackError> {
        self.push(samples, sample_rate, None).await.map(|_| ())
    }

    /// [`enqueue`](Self::enqueue), refusing the item once `signal` has fired.
    ///
    /// The signal is checked under the queue lock, so nothing is queued after
    /// the fire is observed. Returns `Ok(false)` when the item was refused.
    pub async fn enqueue_unless_fired(
        &self,
        samples: Vec<f32>,
        sample_rate: u32,
        signal: &InterruptSignal,
    ) -> Result<bool, PlaybackError> {
        self.push(samples, sample_rate, Some(signal)).await
    }

    async fn push(
        &self,
        samples: Vec<f32>,
        sample_rate: u32,
        guard: Option<&InterruptSignal>,
    ) -> Result<bool, PlaybackError> {
        if sample_rate == 0 {
            return Err(PlaybackError::InvalidSampleRate(sample_rate));
        }
        let samples = normalize(samples)?;
        if samples.is_empty() {
            debug!("Skipping empty playback buffer");
            return Ok(true);
        }
        if let Some(err) = self.pending_error() {
            return Err(err);
        }

        let slot = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| PlaybackError::Stopped)?;

        self.ensure_worker()?;

        let item = PlaybackItem {
            samples,
            sample_rate,
            _slot: slot,
        };
        let duration = item.duration();
        {
            let mut queue = lock(&self.shared.queue);
            if guard.is_some_and(|signal| signal.is_fired()) {
                debug!("Interrupt already fired, playback item refused");
                return Ok(false);
            }
            queue.push_back(item);
            self.shared
                .buffered_us
                .fetch_add(duration.as_micros() as u64, Ordering::SeqCst);
            self.shared.enqueued.fetch_add(1, Ordering::SeqCst);
        }
        self.shared.wake.notify_one();
        debug!(duration_secs = duration.as_secs_f64(), "Playback item queued");
        Ok(true)
    }

    /// [`enqueue`](Self::enqueue) for producers running on plain threads.
    ///
    /// Must not be called from inside an async task.
    pub fn enqueue_blocking(&self, samples: Vec<f32>, sample_rate: u32) -> Result<(), PlaybackError> {
        futures::executor::block_on(self.enqueue(samples, sample_rate))
    }

    /// True while the live worker is writing or items remain queued.
    pub fn is_playing(&self) -> bool {
        let writing = lock(&self.worker)
            .as_ref()
            .is_some_and(|w| w.in_flight.load(Ordering::SeqCst) > 0);
        writing || !lock(&self.shared.queue).is_empty()
    }

    /// Total items accepted into the queue over the engine's lifetime.
    pub fn enqueued_total(&self) -> u64 {
        self.shared.enqueued.load(Ordering::SeqCst)
    }

    pub fn queued_len(&self) -> usize {
        lock(&self.shared.queue).len()
    }

    /// Duration of audio queued or playing.
    pub fn buffered_duration(&self) -> Duration {
        Duration::from_micros(self.shared.buffered_us.load(Ordering::SeqCst))
    }

    /// Default drain timeout: buffered * 1.5 + 2s, clamped to [5s, 60s].
    pub fn default_drain_timeout(&self) -> Duration {
        drain_timeout_for(self.buffered_duration())
    }

    /// Halt playback and discard everything queued. Idempotent.
    ///
    /// The worker notices within one poll interval, flushes the device with a
    /// short silence buffer, and exits. The next enqueue starts a fresh
    /// worker, which waits for the old one before writing anything.
    /// With `force`, also waits briefly for the old worker to finish, gives
    /// up on it if it is stuck, and clears any recorded sink error.
    pub fn stop(&self, force: bool) {
        let worker = lock(&self.worker).take();
        if worker.is_none() && !force && !self.is_playing() {
            return;
        }

        let discarded = {
            let mut queue = lock(&self.shared.queue);
            if let Some(w) = &worker {
                // Set under the queue lock so the worker cannot pop another item.
                w.cancel.store(true, Ordering::SeqCst);
            }
            let n = queue.len();
            queue.clear();
            n
        };
        self.shared.buffered_us.store(0, Ordering::SeqCst);
        self.shared.wake.notify_all();

        let stopped = worker.is_some();
        if let Some(w) = worker {
            if force {
                let start = Instant::now();
                while !w.handle.is_finished() && start.elapsed() < FORCE_JOIN_WAIT {
                    std::thread::sleep(Duration::from_millis(5));
                }
                if !w.handle.is_finished() {
                    // Detached: a stuck sink must not hold up the next worker.
                    warn!("Playback worker did not exit within {:?}, abandoning it", FORCE_JOIN_WAIT);
                }
            } else {
                *lock(&self.retired) = Some(w.handle);
            }
        }
        if force {
            *lock(&self.shared.last_error) = None;
        }

        if stopped || discarded > 0 {
            info!(discarded, force, "Playback stopped");
        }
    }

    /// Wait until the queue is empty and nothing is playing.
    ///
    /// Returns `Ok(true)` once drained and `Ok(false)` if the timeout expired,
    /// in which case playback is force-stopped. A sink failure recorded by
    /// the worker is returned as an error. `None` uses
    /// [`default_drain_timeout`](Self::default_drain_timeout).
    pub async fn wait_for_drain(&self, timeout: Option<Duration>) -> Result<bool, PlaybackError> {
        let timeout = timeout.unwrap_or_else(|| self.default_drain_timeout());
        let poll = self.config.poll_interval();
        let deadline = tokio::time::Instant::now() + timeout;
        debug!(
            timeout_secs = timeout.as_secs_f64(),
            buffered_secs = self.buffered_duration().as_secs_f64(),
            "Waiting for playback to drain"
        );

        loop {
            if let Some(err) = self.take_error() {
                return Err(err);
            }
            if !self.is_playing() {
                return Ok(true);
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                warn!(
                    "Timed out waiting for playback to drain after {:.1}s",
                    timeout.as_secs_f64()
                );
                self.stop(true);
                return Ok(false);
            }
            tokio::time::sleep(poll.min(deadline - now)).await;
        }
    }

    /// The sink error recorded by the worker, left in place.
    pub fn pending_error(&self) -> Option<PlaybackError> {
        lock(&self.shared.last_error).clone()
    }

    /// Take the sink error recorded by the worker.
    pub fn take_error(&self) -> Option<PlaybackError> {
        lock(&self.shared.last_error).take()
    }

    fn ensure_worker(&self) -> Result<(), PlaybackError> {
        let mut worker = lock(&self.worker);
        if let Some(w) = worker.as_ref() {
            if !w.handle.is_finished() {
                return Ok(());
            }
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let ctx = WorkerContext {
            shared: Arc::clone(&self.shared),
            factory: Arc::clone(&self.factory),
            config: self.config.clone(),
            cancel: Arc::clone(&cancel),
            in_flight: Arc::clone(&in_flight),
        };
        let previous = lock(&self.retired).take();
        let handle = std::thread::Builder::new()
            .name("playback-worker".into())
            .spawn(move || {
                if let Some(previous) = previous {
                    await_retired(previous);
                }
                run_worker(ctx)
            })
            .map_err(|e| PlaybackError::SinkOpen(format!("Failed to spawn playback worker: {}", e)))?;

        *worker = Some(Worker {
            cancel,
            in_flight,
            handle,
        });
        debug!("Playback worker started");
        Ok(())
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.stop(false);
    }
}

/// Default drain timeout for a given amount of buffered audio.
pub fn drain_timeout_for(buffered: Duration) -> Duration {
    let secs = (buffered.as_secs_f64() * 1.5 + 2.0).clamp(DRAIN_TIMEOUT_MIN, DRAIN_TIMEOUT_MAX);
    Duration::from_secs_f64(secs)
}

/// Reject non-finite samples and rescale buffers that clip.
fn normalize(mut samples: Vec<f32>) -> Result<Vec<f32>, PlaybackError> {
    let mut peak = 0.0f32;
    for &s in &samples {
        if !s.is_finite() {
            return Err(PlaybackError::InvalidSamples);
        }
        peak = peak.max(s.abs());
    }
    if peak > 1.0 {
        debug!(peak, "Rescaling playback buffer");
        for s in &mut samples {
            *s /= peak;
        }
    }
    Ok(samples)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        warn!("Playback lock poisoned, recovering");
        poisoned.into_inner()
    })
}

/// Everything a worker thread owns.
struct WorkerContext {
    shared: Arc<Shared>,
    factory: Arc<Mutex<SinkFactory>>,
    config: PlaybackConfig,
    cancel: Arc<AtomicBool>,
    in_flight: Arc<AtomicUsize>,
}

/// Block the new worker until the stopped one has left the device.
fn await_retired(previous: JoinHandle<()>) {
    let start = Instant::now();
    while !previous.is_finished() {
        if start.elapsed() >= RETIRE_WAIT {
            warn!("Previous playback worker still busy after {:?}, starting anyway", RETIRE_WAIT);
            return;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    if previous.join().is_err() {
        warn!("Previous playback worker panicked");
    }
}

/// Worker thread body: pop, (re)open on rate change, write, repeat.
fn run_worker(ctx: WorkerContext) {
    let WorkerContext {
        shared,
        factory,
        config,
        cancel,
        in_flight,
    } = ctx;
    let poll = config.poll_interval();
    let created = {
        let mut make = lock(&factory);
        (*make)()
    };
    let mut sink = match created {
        Ok(sink) => sink,
        Err(e) => {
            error!("Failed to create playback sink: {}", e);
            abandon(&shared, e);
            return;
        }
    };
    let mut current_rate: Option<u32> = None;

    loop {
        let item = {
            let mut queue = lock(&shared.queue);
            loop {
                if cancel.load(Ordering::SeqCst) {
                    break None;
                }
                if let Some(item) = queue.pop_front() {
                    in_flight.fetch_add(1, Ordering::SeqCst);
                    break Some(item);
                }
                queue = match shared.wake.wait_timeout(queue, poll) {
                    Ok((guard, _)) => guard,
                    Err(poisoned) => poisoned.into_inner().0,
                };
            }
        };
        let Some(item) = item else { break };

        if current_rate != Some(item.sample_rate) {
            if let Err(e) = sink.open(item.sample_rate) {
                error!("Failed to open output stream at {} Hz: {}", item.sample_rate, e);
                in_flight.fetch_sub(1, Ordering::SeqCst);
                drop(item);
                abandon(&shared, e);
                return;
            }
            current_rate = Some(item.sample_rate);
        }

        let duration = item.duration();
        match sink.write(&item.samples, item.sample_rate, &cancel) {
            Ok(WriteOutcome::Completed) => {}
            Ok(WriteOutcome::Halted) => debug!("Playback item halted"),
            Err(e) => warn!("Dropping playback item after write error: {}", e),
        }
        // A stop already zeroed the counter; later items belong to a new worker.
        if !cancel.load(Ordering::SeqCst) {
            shared.consume_buffered(duration);
        }
        in_flight.fetch_sub(1, Ordering::SeqCst);
        drop(item);
    }

    // Stopped: flush the device so the tail of the halted item does not linger.
    sink.stop();
    if let Some(rate) = current_rate {
        let silence = vec![0.0f32; (rate as u64 * config.flush_silence_ms / 1000) as usize];
        let never = AtomicBool::new(false);
        if let Err(e) = sink.write(&silence, rate, &never) {
            debug!("Flush write failed: {}", e);
        }
    }
    debug!("Playback worker exited");
}

/// Record a fatal sink error and drop everything queued.
fn abandon(shared: &Shared, err: PlaybackError) {
    lock(&shared.queue).clear();
    shared.buffered_us.store(0, Ordering::SeqCst);
    shared.record_error(err);
}
