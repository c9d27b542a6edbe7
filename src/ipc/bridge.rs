//! stdin/stdout bridge: JSON-line events out, JSON-line commands in.

use std::io::{self, BufRead, Write};

use tokio::sync::mpsc;
use tracing::{debug, error};

use super::{EngineCommand, EngineEvent, EventSink};

/// Emit an event as a JSON line on stdout and flush.
pub fn emit_event(event: &EngineEvent) {
    let json = match serde_json::to_string(event) {
        Ok(j) => j,
        Err(e) => {
            error!("Failed to serialize event: {}", e);
            return;
        }
    };
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    // Ignore write/flush errors; the pipe may be closed.
    let _ = writeln!(handle, "{}", json);
    let _ = handle.flush();
}

/// Event sink writing JSON lines to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl EventSink for StdoutSink {
    fn emit(&self, event: EngineEvent) {
        emit_event(&event);
    }
}

/// Accept `{"type": ...}` as an alias for `{"command": ...}`.
fn normalize_command_json(input: &str) -> String {
    if let Ok(mut obj) = serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(input) {
        if !obj.contains_key("command") {
            if let Some(type_val) = obj.remove("type") {
                obj.insert("command".to_string(), type_val);
                if let Ok(json) = serde_json::to_string(&obj) {
                    return json;
                }
            }
        }
    }
    input.to_string()
}

/// Parse one stdin line. Blank lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<EngineCommand>, serde_json::Error> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(&normalize_command_json(trimmed)).map(Some)
}

/// Spawn a blocking thread that reads JSON-line commands from stdin and
/// forwards them through the returned channel.
///
/// The thread exits when stdin closes or the receiver is dropped.
pub fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<EngineCommand> {
    let (tx, rx) = mpsc::unbounded_channel();

    std::thread::spawn(move || {
        let stdin = io::stdin();
        let reader = stdin.lock();
        for line in reader.lines() {
            match line {
                Ok(text) => match parse_command(&text) {
                    Ok(Some(cmd)) => {
                        debug!(?cmd, "Received command");
                        if tx.send(cmd).is_err() {
                            break;
                        }
                    }
                    Ok(None) => continue,
                    Err(e) => {
                        error!("Invalid JSON command: {} (input: {})", e, text.trim());
                        emit_event(&EngineEvent::error(format!("Invalid JSON command: {}", e)));
                    }
                },
                Err(e) => {
                    error!("stdin read error: {}", e);
                    break;
                }
            }
        }
        debug!("stdin reader thread exiting");
    });

    rx
}
