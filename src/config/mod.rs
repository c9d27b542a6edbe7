//! Engine configuration and data directory paths.
//!
//! Configuration is read from `<data_dir>/engine_config.json`. Every field
//! has a default, so a missing or partial file still yields a usable config.

pub mod paths;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use paths::get_data_dir;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub playback: PlaybackConfig,
    pub interrupt: InterruptConfig,
    pub chunking: ChunkingConfig,
    pub listen: ListenConfig,
    pub turn: TurnConfig,
    pub stt: AdapterConfig,
    pub tts: AdapterConfig,
    pub llm: AdapterConfig,
}

/// Audio playback engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Maximum number of items waiting in the playback queue.
    pub queue_capacity: usize,
    /// Worker poll interval; also bounds how long a stop takes to land.
    pub poll_interval_ms: u64,
    /// Length of the silence buffer written after a stop.
    pub flush_silence_ms: u64,
    /// Sample rate used to open the output stream before the first item arrives.
    pub default_sample_rate: u32,
    pub output_device: Option<String>,
    pub volume: f32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            poll_interval_ms: 50,
            flush_silence_ms: 50,
            default_sample_rate: 24_000,
            output_device: None,
            volume: 1.0,
        }
    }
}

impl PlaybackConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Interrupt (barge-in) detector settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterruptConfig {
    pub enabled: bool,
    /// Samples per scored frame. Silero expects 512 at 16 kHz.
    pub frame_samples: usize,
    pub sample_rate: u32,
    /// Normalized RMS a frame must exceed to count as active.
    pub energy_threshold: f32,
    /// Minimum speech probability for an active frame.
    pub probability_threshold: f32,
    /// Active-frame count at which the interrupt fires.
    pub activation_threshold: u32,
    pub input_device: Option<String>,
    /// Directory holding `silero_vad.onnx`.
    pub model_dir: Option<PathBuf>,
    /// Score frames by energy alone when the neural model is unavailable.
    pub energy_fallback: bool,
}

impl Default for InterruptConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            frame_samples: 512,
            sample_rate: 16_000,
            energy_threshold: 0.01,
            probability_threshold: 0.5,
            activation_threshold: 3,
            input_device: None,
            model_dir: None,
            energy_fallback: false,
        }
    }
}

/// Text chunking policy for streaming synthesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Word count that triggers the first cut when no delimiter shows up.
    pub initial_chunk_target_words: usize,
    /// Characters that end a speakable chunk.
    pub delimiters: String,
    /// Hard cap on buffered text before a cut is forced.
    pub max_buffer_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            initial_chunk_target_words: 8,
            delimiters: ".!?\n,;\u{2013}".to_string(),
            max_buffer_chars: 400,
        }
    }
}

/// Listening (capture + transcription) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    /// Seconds to wait for speech onset.
    pub timeout_secs: f64,
    /// Maximum length of a single utterance.
    pub phrase_limit_secs: f64,
    /// Trailing silence that ends an utterance.
    pub pause_secs: f64,
    /// Overall RMS below which a recording is rejected as low energy.
    pub min_energy: f32,
    /// RMS above which a frame counts as speech onset.
    pub speech_energy: f32,
    pub max_retries: u32,
    pub sample_rate: u32,
    pub input_device: Option<String>,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 5.0,
            phrase_limit_secs: 10.0,
            pause_secs: 1.5,
            min_energy: 0.003,
            speech_energy: 0.01,
            max_retries: 3,
            sample_rate: 16_000,
            input_device: None,
        }
    }
}

impl ListenConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs.max(0.0))
    }

    pub fn phrase_limit(&self) -> Duration {
        Duration::from_secs_f64(self.phrase_limit_secs.max(0.0))
    }
}

/// Per-turn behaviour of the interaction state machine and loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnConfig {
    /// Pause after an ERROR turn before listening again.
    pub error_recovery_secs: f64,
    pub tts_enabled: bool,
    /// Send synthesized audio to the event sink instead of the local speaker.
    pub remote_audio: bool,
    pub system_prompt: String,
    /// Upper bound for the shutdown summarization pass.
    pub summary_timeout_secs: f64,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            error_recovery_secs: 2.0,
            tts_enabled: true,
            remote_audio: false,
            system_prompt: "You are a helpful assistant.".to_string(),
            summary_timeout_secs: 30.0,
        }
    }
}

impl TurnConfig {
    pub fn error_recovery(&self) -> Duration {
        Duration::from_secs_f64(self.error_recovery_secs.max(0.0))
    }

    pub fn summary_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.summary_timeout_secs.max(0.0))
    }
}

/// Settings shared by the HTTP-backed collaborator adapters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
}

/// Read engine_config.json from the data directory.
pub fn read_engine_config() -> EngineConfig {
    read_engine_config_from(&get_config_path())
}

/// Read an engine config from an explicit path, falling back to defaults.
pub fn read_engine_config_from(path: &Path) -> EngineConfig {
    read_json_file(path).unwrap_or_default()
}

/// Path to engine_config.json.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("engine_config.json")
}

/// Generic helper: read a JSON file and deserialize it.
fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(val) => Some(val),
            Err(e) => {
                warn!("Failed to parse {}: {}", path.display(), e);
                None
            }
        },
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to read {}: {}", path.display(), e);
            }
            None
        }
    }
}
