//! OpenAI-compatible `/audio/speech` synthesizer.
//!
//! Requests raw PCM (24 kHz, 16-bit mono) so no decoder is needed.

use std::future::Future;
use std::pin::Pin;

use tracing::info;

use super::{SynthesizedAudio, Synthesizer};
use crate::audio::pcm16le_to_f32;
use crate::config::AdapterConfig;

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "tts-1";
const DEFAULT_VOICE: &str = "alloy";

/// Rate of the `pcm` response format.
pub const PCM_SAMPLE_RATE: u32 = 24_000;

/// Cloud TTS over an OpenAI-compatible REST API.
#[derive(Clone)]
pub struct CloudSynthesizer {
    endpoint: String,
    api_key: Option<String>,
    model: String,
    voice: String,
    client: reqwest::Client,
}

impl CloudSynthesizer {
    pub fn new(endpoint: &str, api_key: Option<String>, model: &str, voice: &str) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
            voice: voice.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Build from the `tts` config section; the key falls back to `OPENAI_API_KEY`.
    pub fn from_config(config: &AdapterConfig) -> anyhow::Result<Self> {
        let endpoint = config.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT);
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        if api_key.is_none() && endpoint == DEFAULT_ENDPOINT {
            anyhow::bail!("OpenAI TTS requires an API key (tts.api_key or OPENAI_API_KEY)");
        }
        Ok(Self::new(
            endpoint,
            api_key,
            config.model.as_deref().unwrap_or(DEFAULT_MODEL),
            config.voice.as_deref().unwrap_or(DEFAULT_VOICE),
        ))
    }

    pub fn voice(&self) -> &str {
        &self.voice
    }

    fn speech_url(&self) -> String {
        format!("{}/audio/speech", self.endpoint)
    }
}

impl Synthesizer for CloudSynthesizer {
    fn synthesize(
        &self,
        text: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<SynthesizedAudio>> + Send + '_>> {
        let text = text.trim().to_string();
        Box::pin(async move {
            if text.is_empty() {
                return Ok(SynthesizedAudio::new(Vec::new(), PCM_SAMPLE_RATE));
            }

            info!(voice = %self.voice, text_len = text.len(), "TTS request");

            let body = serde_json::json!({
                "model": self.model,
                "input": text,
                "voice": self.voice,
                "response_format": "pcm",
            });

            let mut req = self.client.post(self.speech_url()).json(&body);
            if let Some(key) = &self.api_key {
                req = req.bearer_auth(key);
            }
            let resp = req
                .send()
                .await
                .map_err(|e| anyhow::anyhow!("TTS request failed: {}", e))?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                anyhow::bail!("TTS API error {}: {}", status, body);
            }

            let bytes = resp
                .bytes()
                .await
                .map_err(|e| anyhow::anyhow!("Failed to read TTS response: {}", e))?;
            let samples = pcm16le_to_f32(&bytes);

            info!(samples = samples.len(), "TTS synthesis complete");
            Ok(SynthesizedAudio::new(samples, PCM_SAMPLE_RATE))
        })
    }

    fn reconfigure(&self, voice: &str) -> anyhow::Result<Box<dyn Synthesizer>> {
        let voice = voice.trim();
        if voice.is_empty() {
            anyhow::bail!("Voice name must not be empty");
        }
        let mut next = self.clone();
        next.voice = voice.to_string();
        info!(from = %self.voice, to = %next.voice, "TTS voice reconfigured");
        Ok(Box::new(next))
    }

    fn name(&self) -> String {
        format!("OpenAI TTS ({})", self.voice)
    }
}
