//! Atomic interaction state machine.
//!
//! Thread-safe phase tracking using `AtomicU8`. Written only by the
//! interaction driver; read by the event sink, the binary's command bridge,
//! and anything else that wants to know what the engine is doing.

use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;

/// Phases of a single interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum InteractionState {
    /// Between turns.
    Idle = 0,
    /// Capturing the user's utterance.
    Listening = 1,
    /// Captured audio is being transcribed.
    Transcribing = 2,
    /// Waiting on the response token source.
    Processing = 3,
    /// Synthesizing and playing the reply.
    Speaking = 4,
    /// The user barged in during Speaking.
    Interrupted = 5,
    Error = 6,
    /// Synthesis is turned off; the reply was consumed silently.
    Disabled = 7,
    Timeout = 8,
}

impl InteractionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Listening,
            2 => Self::Transcribing,
            3 => Self::Processing,
            4 => Self::Speaking,
            5 => Self::Interrupted,
            6 => Self::Error,
            7 => Self::Disabled,
            8 => Self::Timeout,
            _ => Self::Idle,
        }
    }

    /// Terminal states end a turn; the next turn starts from any of them.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Interrupted | Self::Error | Self::Disabled | Self::Timeout
        )
    }

    /// Whether `self -> next` is a legal edge.
    pub fn can_transition(self, next: InteractionState) -> bool {
        use InteractionState::*;
        if next == Error {
            return true;
        }
        match self {
            Idle => matches!(next, Listening),
            Listening => matches!(next, Transcribing | Speaking | Idle) || next.is_terminal(),
            Transcribing => matches!(next, Processing | Speaking | Idle) || next.is_terminal(),
            Processing => matches!(next, Speaking) || next.is_terminal(),
            Speaking => matches!(next, Idle) || next.is_terminal(),
            // An error apology is spoken from Error.
            Error => matches!(next, Idle | Listening | Speaking),
            Interrupted | Disabled | Timeout => matches!(next, Idle | Listening),
        }
    }
}

impl std::fmt::Display for InteractionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Listening => write!(f, "listening"),
            Self::Transcribing => write!(f, "transcribing"),
            Self::Processing => write!(f, "processing"),
            Self::Speaking => write!(f, "speaking"),
            Self::Interrupted => write!(f, "interrupted"),
            Self::Error => write!(f, "error"),
            Self::Disabled => write!(f, "disabled"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// Thread-safe interaction state, shareable via `Arc`.
#[derive(Debug)]
pub struct StateCell {
    state: AtomicU8,
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(InteractionState::Idle as u8),
        }
    }

    pub fn current(&self) -> InteractionState {
        InteractionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `next` if the edge is legal. Returns the previous state on success.
    pub fn advance(&self, next: InteractionState) -> Result<InteractionState, InteractionState> {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let from = InteractionState::from_u8(current);
            if !from.can_transition(next) {
                return Err(from);
            }
            match self.state.compare_exchange_weak(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(from),
                Err(actual) => current = actual,
            }
        }
    }

    /// Force back to Idle (shutdown, or recovery after a crash in a phase).
    pub fn reset(&self) {
        self.force(InteractionState::Idle);
    }

    /// Set `next` without checking the edge.
    pub fn force(&self, next: InteractionState) {
        self.state.store(next as u8, Ordering::Release);
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
