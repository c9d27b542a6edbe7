//! Turn driving: one [`Interaction`] per Listen -> Process -> Speak cycle,
//! repeated by the [`ConversationLoop`].

pub mod context;
pub mod machine;
pub mod runner;

use serde::Serialize;

use crate::audio::InteractionState;

pub use context::EngineContext;
pub use machine::Interaction;
pub use runner::{ConversationLoop, LoopHandle};

/// How a turn ended. Produced once per interaction, consumed by the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Completed,
    /// The user barged in while the reply was playing.
    Interrupted,
    Error,
    /// Synthesis is off; the reply was consumed without audio.
    Disabled,
    /// No speech before the listen timeout, or playback never drained.
    Timeout,
    /// Nothing intelligible was heard.
    LowEnergy,
}

impl TurnStatus {
    /// State the machine rests in after a turn with this status.
    pub fn final_state(self) -> InteractionState {
        match self {
            Self::Completed | Self::LowEnergy => InteractionState::Idle,
            Self::Interrupted => InteractionState::Interrupted,
            Self::Error => InteractionState::Error,
            Self::Disabled => InteractionState::Disabled,
            Self::Timeout => InteractionState::Timeout,
        }
    }
}

impl std::fmt::Display for TurnStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Interrupted => write!(f, "interrupted"),
            Self::Error => write!(f, "error"),
            Self::Disabled => write!(f, "disabled"),
            Self::Timeout => write!(f, "timeout"),
            Self::LowEnergy => write!(f, "low_energy"),
        }
    }
}
