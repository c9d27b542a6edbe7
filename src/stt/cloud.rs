//! OpenAI-compatible `/audio/transcriptions` adapter.

use std::future::Future;
use std::pin::Pin;

use reqwest::multipart;
use tracing::debug;

use super::Transcriber;
use crate::config::AdapterConfig;

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "whisper-1";

/// Encode f32 audio samples as 16-bit PCM mono WAV bytes.
pub fn encode_wav(audio: &[f32], sample_rate: u32) -> Vec<u8> {
    let bytes_per_sample: u16 = 2;
    let num_channels: u16 = 1;
    let data_size = audio.len() as u32 * bytes_per_sample as u32;
    let file_size = 36 + data_size;

    let mut buf = Vec::with_capacity(44 + data_size as usize);

    // RIFF header
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&file_size.to_le_bytes());
    buf.extend_from_slice(b"WAVE");

    // fmt sub-chunk
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM
    buf.extend_from_slice(&num_channels.to_le_bytes());
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    let byte_rate = sample_rate * num_channels as u32 * bytes_per_sample as u32;
    buf.extend_from_slice(&byte_rate.to_le_bytes());
    buf.extend_from_slice(&(num_channels * bytes_per_sample).to_le_bytes());
    buf.extend_from_slice(&(bytes_per_sample * 8).to_le_bytes());

    // data sub-chunk
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_size.to_le_bytes());
    buf.extend_from_slice(&crate::audio::f32_to_pcm16le(audio));

    buf
}

/// Cloud transcription over an OpenAI-compatible REST API.
pub struct CloudTranscriber {
    endpoint: String,
    api_key: Option<String>,
    model: String,
    client: reqwest::Client,
}

impl CloudTranscriber {
    pub fn new(endpoint: &str, api_key: Option<String>, model: &str) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Build from the `stt` config section; the key falls back to `OPENAI_API_KEY`.
    pub fn from_config(config: &AdapterConfig) -> anyhow::Result<Self> {
        let endpoint = config.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT);
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        if api_key.is_none() && endpoint == DEFAULT_ENDPOINT {
            anyhow::bail!("OpenAI STT requires an API key (stt.api_key or OPENAI_API_KEY)");
        }
        Ok(Self::new(
            endpoint,
            api_key,
            config.model.as_deref().unwrap_or(DEFAULT_MODEL),
        ))
    }

    fn transcriptions_url(&self) -> String {
        format!("{}/audio/transcriptions", self.endpoint)
    }
}

impl Transcriber for CloudTranscriber {
    fn transcribe<'a>(
        &'a self,
        audio: &'a [f32],
        sample_rate: u32,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
        Box::pin(async move {
            if audio.is_empty() {
                return Ok(String::new());
            }
            let wav = encode_wav(audio, sample_rate);
            debug!(bytes = wav.len(), endpoint = %self.endpoint, "Sending audio for transcription");

            let file_part = multipart::Part::bytes(wav)
                .file_name("audio.wav")
                .mime_str("audio/wav")?;
            let form = multipart::Form::new()
                .text("model", self.model.clone())
                .part("file", file_part);

            let mut req = self.client.post(self.transcriptions_url()).multipart(form);
            if let Some(key) = &self.api_key {
                req = req.bearer_auth(key);
            }
            let resp = req.send().await?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                anyhow::bail!("STT API error {}: {}", status, body);
            }

            let json: serde_json::Value = resp.json().await?;
            Ok(json["text"].as_str().unwrap_or("").trim().to_string())
        })
    }

    fn name(&self) -> String {
        format!("Cloud STT ({})", self.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wav_header() {
        let wav = encode_wav(&[0.0, 0.5, -0.5], 16_000);
        assert_eq!(wav.len(), 44 + 6);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]), 16_000);
        assert_eq!(u32::from_le_bytes([wav[40], wav[41], wav[42], wav[43]]), 6);
    }

    #[tokio::test]
    async fn test_empty_audio_skips_request() {
        let stt = CloudTranscriber::new("http://127.0.0.1:9/v1", None, "whisper-1");
        assert_eq!(stt.transcribe(&[], 16_000).await.unwrap(), "");
    }

    #[test]
    fn test_default_endpoint_requires_key() {
        std::env::remove_var("OPENAI_API_KEY");
        assert!(CloudTranscriber::from_config(&AdapterConfig::default()).is_err());
    }
}
