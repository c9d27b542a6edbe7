//! One-shot interrupt latch shared between the detector and the speaker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::Notify;

/// Single-writer / multi-reader one-shot latch.
///
/// The interrupt detector fires it; the speech pipeline and playback waiters
/// read it. Once fired it stays fired until [`reset`](Self::reset) at the
/// start of the next Speak phase. Cloning shares the same latch.
#[derive(Debug, Clone, Default)]
pub struct InterruptSignal {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    fired: AtomicBool,
    fired_at: Mutex<Option<Instant>>,
    notify: Notify,
}

impl InterruptSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the latch. Returns `true` only for the call that actually fired it.
    pub fn fire(&self) -> bool {
        let won = self
            .inner
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            if let Ok(mut at) = self.inner.fired_at.lock() {
                *at = Some(Instant::now());
            }
            self.inner.notify.notify_waiters();
        }
        won
    }

    pub fn is_fired(&self) -> bool {
        self.inner.fired.load(Ordering::Acquire)
    }

    /// When the latch fired, if it has.
    pub fn fired_at(&self) -> Option<Instant> {
        self.inner.fired_at.lock().ok().and_then(|at| *at)
    }

    /// Re-arm for a new Speak phase.
    pub fn reset(&self) {
        if let Ok(mut at) = self.inner.fired_at.lock() {
            *at = None;
        }
        self.inner.fired.store(false, Ordering::Release);
    }

    /// Resolve once the latch has fired. Returns immediately if it already has.
    pub async fn fired(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent fire is not missed.
            notified.as_mut().enable();
            if self.is_fired() {
                return;
            }
            notified.await;
        }
    }
}
