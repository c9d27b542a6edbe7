//! Text-to-speech seam.
//!
//! The engine only needs `synthesize(text) -> (samples, rate)`. Changing
//! voice mid-session goes through [`Synthesizer::reconfigure`], which builds
//! a replacement instead of mutating one that may be in use.

pub mod cloud;

use std::future::Future;
use std::pin::Pin;

use crate::config::AdapterConfig;

pub use cloud::CloudSynthesizer;

/// Mono f32 PCM produced by a synthesizer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SynthesizedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl SynthesizedAudio {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Common trait for TTS engines (dyn-compatible).
pub trait Synthesizer: Send + Sync {
    /// Synthesize text to mono f32 PCM. Empty or whitespace-only text yields
    /// an empty buffer rather than an error.
    fn synthesize(
        &self,
        text: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<SynthesizedAudio>> + Send + '_>>;

    /// Build a new synthesizer speaking with `voice`.
    fn reconfigure(&self, voice: &str) -> anyhow::Result<Box<dyn Synthesizer>>;

    /// Display name (e.g. "OpenAI TTS (alloy)").
    fn name(&self) -> String;
}

/// Create the synthesizer described by the `tts` config section.
pub fn create_synthesizer(config: &AdapterConfig) -> anyhow::Result<Box<dyn Synthesizer>> {
    Ok(Box::new(CloudSynthesizer::from_config(config)?))
}
