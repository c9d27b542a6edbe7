//! Duplex Voice: a full-duplex voice conversation engine.
//!
//! Captures the user's speech, streams a reply through synthesis as it is
//! generated, and lets the user barge in mid-sentence. The binary drives a
//! [`ConversationLoop`](interaction::ConversationLoop) and talks to its host
//! over JSON lines on stdin/stdout.

pub mod audio;
pub mod config;
pub mod conversation;
pub mod error;
pub mod interaction;
pub mod interrupt;
pub mod ipc;
pub mod listen;
pub mod llm;
pub mod logging;
pub mod playback;
pub mod speak;
pub mod stt;
pub mod tts;
pub mod vad;

#[cfg(test)]
pub(crate) mod testing;

pub use interaction::{ConversationLoop, EngineContext, LoopHandle, TurnStatus};
