//! Status events out, control commands in.
//!
//! Events use `{"event": "<name>", "data": {...}}` format (engine -> host).
//! Commands use `{"command": "<name>", ...}` format (host -> engine).
//!
//! Event sinks are additive: the engine runs the same with a [`NullSink`].

pub mod bridge;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::audio::InteractionState;
use crate::interaction::TurnStatus;

// ---------------------------------------------------------------------------
// Events: engine -> host
// ---------------------------------------------------------------------------

/// All events the engine emits.
///
/// Serialized as `{"event": "<variant>", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum EngineEvent {
    Starting {},
    Ready {},
    StateChange {
        state: InteractionState,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Transcription {
        text: String,
    },
    Response {
        text: String,
    },
    SpeakingStart {},
    SpeakingEnd {
        status: TurnStatus,
    },
    Interrupted {
        spoken: String,
    },
    /// Raw audio for hosts that render speech themselves.
    AudioChunk {
        /// Base64 of little-endian signed 16-bit PCM.
        data: String,
        sample_rate: u32,
        format: String,
        seq: u64,
    },
    Error {
        message: String,
    },
    Summary {
        text: String,
    },
    VoiceChanged {
        voice: String,
    },
    Devices {
        inputs: Vec<String>,
    },
    Pong {},
    Stopping {},
}

impl EngineEvent {
    pub fn state(state: InteractionState, message: Option<&str>) -> Self {
        Self::StateChange {
            state,
            message: message.map(str::to_string),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Destination for engine events. Emission never fails the caller.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    fn emit(&self, event: EngineEvent) {
        (**self).emit(event)
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: EngineEvent) {}
}

/// Forwards events into a channel, for in-process hosts.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: EngineEvent) {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}

// ---------------------------------------------------------------------------
// Commands: host -> engine
// ---------------------------------------------------------------------------

/// Commands read from the host as JSON lines.
///
/// Deserialized from `{"command": "<variant>", ...}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command")]
#[serde(rename_all = "snake_case")]
pub enum EngineCommand {
    Ping {},
    Stop {},
    /// Switch synthesis voice; applied between turns.
    SetVoice { voice: String },
    /// Fire the current interrupt signal as if the user had barged in.
    Interrupt {},
    ListDevices {},
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let json = serde_json::to_string(&EngineEvent::state(InteractionState::Speaking, None)).unwrap();
        assert_eq!(json, r#"{"event":"state_change","data":{"state":"speaking"}}"#);

        let json = serde_json::to_string(&EngineEvent::SpeakingEnd {
            status: TurnStatus::Interrupted,
        })
        .unwrap();
        assert_eq!(json, r#"{"event":"speaking_end","data":{"status":"interrupted"}}"#);

        let json = serde_json::to_string(&EngineEvent::Pong {}).unwrap();
        assert_eq!(json, r#"{"event":"pong","data":{}}"#);
    }

    #[test]
    fn test_command_parsing() {
        let cmd: EngineCommand = serde_json::from_str(r#"{"command":"set_voice","voice":"nova"}"#).unwrap();
        assert_eq!(
            cmd,
            EngineCommand::SetVoice {
                voice: "nova".into()
            }
        );
        let cmd: EngineCommand = serde_json::from_str(r#"{"command":"interrupt"}"#).unwrap();
        assert_eq!(cmd, EngineCommand::Interrupt {});
        let cmd: EngineCommand = serde_json::from_str(r#"{"command":"list_devices"}"#).unwrap();
        assert_eq!(cmd, EngineCommand::ListDevices {});
        assert!(serde_json::from_str::<EngineCommand>(r#"{"command":"dance"}"#).is_err());
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.emit(EngineEvent::Ready {});
    }
}
