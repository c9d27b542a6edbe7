//! The conversation loop: run turns until shutdown, then clean up once.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::context::EngineContext;
use super::machine::Interaction;
use super::TurnStatus;
use crate::audio::{InteractionState, StateCell};
use crate::conversation::ConversationHistory;
use crate::interrupt::InterruptSignal;
use crate::ipc::EngineEvent;

/// Thread-safe handle for steering a running loop from outside.
#[derive(Clone, Default)]
pub struct LoopHandle {
    signal: InterruptSignal,
    state: Arc<StateCell>,
    pending_voice: Arc<Mutex<Option<String>>>,
}

impl LoopHandle {
    pub fn state(&self) -> InteractionState {
        self.state.current()
    }

    /// Barge in on the current reply. Returns `false` when nothing is being spoken.
    pub fn interrupt(&self) -> bool {
        if self.state.current() != InteractionState::Speaking {
            info!("Interrupt requested while {}, ignoring", self.state.current());
            return false;
        }
        self.signal.fire()
    }

    /// Switch voice before the next turn starts.
    pub fn request_voice(&self, voice: impl Into<String>) {
        let voice = voice.into();
        info!(voice = %voice, "Voice change queued");
        *self
            .pending_voice
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(voice);
    }

    fn take_voice(&self) -> Option<String> {
        self.pending_voice
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

/// Repeats interactions over one conversation history.
pub struct ConversationLoop {
    ctx: EngineContext,
    history: ConversationHistory,
    handle: LoopHandle,
    turns: u64,
    cleaned_up: bool,
}

impl ConversationLoop {
    pub fn new(ctx: EngineContext) -> Self {
        let history = ConversationHistory::new(Some(ctx.config.turn.system_prompt.clone()));
        Self {
            ctx,
            history,
            handle: LoopHandle::default(),
            turns: 0,
            cleaned_up: false,
        }
    }

    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    /// Turns started so far.
    pub fn turns(&self) -> u64 {
        self.turns
    }

    /// Run one interaction. A panic inside the turn is caught and reported
    /// as ERROR; the loop itself never unwinds.
    pub async fn run_turn(&mut self, cancel: &CancellationToken) -> TurnStatus {
        self.apply_pending_voice();
        self.turns += 1;

        let interaction = Interaction::new(
            &mut self.ctx,
            &mut self.history,
            &self.handle.state,
            &self.handle.signal,
        );
        match AssertUnwindSafe(interaction.run(cancel)).catch_unwind().await {
            Ok(status) => status,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(turn = self.turns, "Interaction panicked: {}", message);
                self.ctx.halt_audio();
                self.handle.state.force(InteractionState::Error);
                self.ctx
                    .events
                    .emit(EngineEvent::state(InteractionState::Error, Some(message.as_str())));
                self.ctx.events.emit(EngineEvent::error(message));
                TurnStatus::Error
            }
        }
    }

    /// Run turns until `cancel` fires, then clean up and return the session
    /// summary, if one was produced.
    ///
    /// Cancellation abandons the in-flight turn at its next suspension point.
    /// After an ERROR turn the loop waits `turn.error_recovery_secs` before
    /// listening again.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Option<String> {
        info!(session = %self.history.session_id(), "Conversation loop started");

        while !cancel.is_cancelled() {
            let status = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Shutdown requested, abandoning current turn");
                    break;
                }
                status = self.run_turn(cancel) => status,
            };
            info!(turn = self.turns, %status, "Turn finished");

            if status == TurnStatus::Error {
                let delay = self.ctx.config.turn.error_recovery();
                info!("Recovering from error in {:.1}s", delay.as_secs_f64());
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        self.shutdown().await
    }

    /// [`run`](Self::run) on the caller's thread, for hosts without a runtime.
    pub fn run_blocking(&mut self, cancel: &CancellationToken) -> anyhow::Result<Option<String>> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(runtime.block_on(self.run(cancel)))
    }

    /// Stop audio and summarize the session. Runs at most once.
    pub async fn shutdown(&mut self) -> Option<String> {
        if self.cleaned_up {
            return None;
        }
        self.cleaned_up = true;
        info!(turns = self.turns, messages = self.history.len(), "Conversation loop stopping");

        self.ctx.halt_audio();
        self.handle.state.reset();
        self.ctx
            .events
            .emit(EngineEvent::state(InteractionState::Idle, Some("stopped")));

        let summarizer = self.ctx.summarizer.as_ref()?;
        if self.history.is_empty() {
            return None;
        }
        let timeout = self.ctx.config.turn.summary_timeout();
        match tokio::time::timeout(timeout, summarizer.summarize(&self.history)).await {
            Ok(Ok(summary)) if !summary.trim().is_empty() => {
                info!(chars = summary.len(), "Session summarized");
                self.ctx.events.emit(EngineEvent::Summary {
                    text: summary.clone(),
                });
                Some(summary)
            }
            Ok(Ok(_)) => None,
            Ok(Err(e)) => {
                warn!("Summarization failed: {}", e);
                None
            }
            Err(_) => {
                warn!("Summarization timed out after {:.1}s", timeout.as_secs_f64());
                None
            }
        }
    }

    fn apply_pending_voice(&mut self) {
        let Some(voice) = self.handle.take_voice() else {
            return;
        };
        match self.ctx.reconfigure_synthesizer(&voice) {
            Ok(()) => self.ctx.events.emit(EngineEvent::VoiceChanged { voice }),
            Err(e) => {
                warn!(voice = %voice, "Voice change rejected: {}", e);
                self.ctx.events.emit(EngineEvent::error(e.to_string()));
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
