//! Duplex Voice engine binary.
//!
//! Talks to its host via JSON-line IPC on stdin/stdout, builds the
//! collaborators from `engine_config.json`, and runs the conversation loop
//! until a `stop` command, Ctrl-C, or stdin closing.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use duplex_voice::audio::{list_devices, CpalCapture};
use duplex_voice::config::paths::{get_data_dir, get_log_dir};
use duplex_voice::config::{get_config_path, read_engine_config};
use duplex_voice::interaction::{ConversationLoop, EngineContext, LoopHandle};
use duplex_voice::interrupt::InterruptDetector;
use duplex_voice::ipc::bridge::{emit_event, spawn_stdin_reader, StdoutSink};
use duplex_voice::ipc::{EngineCommand, EngineEvent};
use duplex_voice::listen::VadRecorder;
use duplex_voice::llm::{LlmSummarizer, OllamaResponder, Responder};
use duplex_voice::playback::{rodio_factory, PlaybackEngine};
use duplex_voice::{logging, stt, tts, vad};

#[tokio::main]
async fn main() {
    if let Err(e) = logging::try_init(Some(&get_log_dir())) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    // Emit starting event immediately so the host knows we're alive.
    emit_event(&EngineEvent::Starting {});

    let config = read_engine_config();
    info!(
        path = %get_config_path().display(),
        tts_enabled = config.turn.tts_enabled,
        remote_audio = config.turn.remote_audio,
        interrupts = config.interrupt.enabled,
        "Configuration loaded"
    );

    let playback = Arc::new(PlaybackEngine::new(
        config.playback.clone(),
        rodio_factory(
            config.playback.output_device.clone(),
            config.playback.volume,
            config.playback.poll_interval(),
        ),
    ));
    let capture = CpalCapture::new(config.listen.input_device.clone());
    let mut ctx = EngineContext::new(config.clone(), playback)
        .with_events(Arc::new(StdoutSink))
        .with_listener(Box::new(VadRecorder::new(config.listen.clone(), Box::new(capture))));

    match stt::create_transcriber(&config.stt) {
        Ok(transcriber) => {
            info!("STT: {}", transcriber.name());
            ctx = ctx.with_transcriber(transcriber);
        }
        Err(e) => warn!("Speech-to-text unavailable: {}", e),
    }

    match tts::create_synthesizer(&config.tts) {
        Ok(synthesizer) => {
            info!("TTS: {}", synthesizer.name());
            ctx = ctx.with_synthesizer(synthesizer);
        }
        Err(e) => warn!("Text-to-speech unavailable, replies will not be spoken: {}", e),
    }

    let responder = OllamaResponder::from_config(&config.llm);
    info!("LLM: {}", responder.name());
    ctx = ctx
        .with_responder(Box::new(responder.clone()))
        .with_summarizer(Box::new(LlmSummarizer::new(responder)));

    if config.interrupt.enabled {
        let scorer = vad::load_scorer(&config.interrupt, &get_data_dir().join("models"));
        let capture = CpalCapture::new(config.interrupt.input_device.clone());
        ctx = ctx.with_detector(InterruptDetector::new(
            config.interrupt.clone(),
            Box::new(capture),
            scorer,
        ));
    }

    let mut conversation = ConversationLoop::new(ctx);
    let cancel = CancellationToken::new();

    let commands = tokio::spawn(handle_commands(
        spawn_stdin_reader(),
        conversation.handle(),
        cancel.clone(),
    ));
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received, shutting down");
                cancel.cancel();
            }
        });
    }

    emit_event(&EngineEvent::Ready {});
    info!("Voice engine ready");

    conversation.run(&cancel).await;

    commands.abort();
    emit_event(&EngineEvent::Stopping {});
    info!("Voice engine shut down");
}

/// Forward host commands to the loop until shutdown.
async fn handle_commands(
    mut rx: mpsc::UnboundedReceiver<EngineCommand>,
    handle: LoopHandle,
    cancel: CancellationToken,
) {
    loop {
        let cmd = tokio::select! {
            _ = cancel.cancelled() => break,
            cmd = rx.recv() => cmd,
        };
        match cmd {
            Some(command) => {
                if !handle_command(command, &handle) {
                    cancel.cancel();
                    break;
                }
            }
            None => {
                // stdin closed: parent process gone
                info!("stdin closed, shutting down");
                cancel.cancel();
                break;
            }
        }
    }
}

/// Handle a single command. Returns `false` if the engine should stop.
fn handle_command(cmd: EngineCommand, handle: &LoopHandle) -> bool {
    match cmd {
        EngineCommand::Ping {} => emit_event(&EngineEvent::Pong {}),
        EngineCommand::Stop {} => {
            info!("Stop command received");
            return false;
        }
        EngineCommand::SetVoice { voice } => handle.request_voice(voice),
        EngineCommand::Interrupt {} => {
            if handle.interrupt() {
                info!("Reply interrupted by host");
            }
        }
        EngineCommand::ListDevices {} => emit_event(&EngineEvent::Devices {
            inputs: list_devices(),
        }),
    }
    true
}
