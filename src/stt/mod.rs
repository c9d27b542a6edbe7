//! Speech-to-text seam.

pub mod cloud;

use std::future::Future;
use std::pin::Pin;

use crate::config::AdapterConfig;

pub use cloud::CloudTranscriber;

/// Transcribes one utterance.
///
/// Audio is 16 kHz mono f32. Silence or unintelligible audio yields an empty
/// string; transport failures are errors the caller maps to an ERROR turn.
pub trait Transcriber: Send + Sync {
    fn transcribe<'a>(
        &'a self,
        audio: &'a [f32],
        sample_rate: u32,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>>;

    fn name(&self) -> String;
}

/// Create the transcriber described by the `stt` config section.
pub fn create_transcriber(config: &AdapterConfig) -> anyhow::Result<Box<dyn Transcriber>> {
    Ok(Box::new(CloudTranscriber::from_config(config)?))
}
