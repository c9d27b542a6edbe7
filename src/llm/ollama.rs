//! Ollama `/api/chat` client.
//!
//! Streaming replies arrive as newline-delimited JSON; each line carries a
//! `message.content` fragment until one with `"done": true`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::{future, stream, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{build_messages, ReplyMode, Responder, Retrieval, Retriever};
use crate::config::AdapterConfig;
use crate::conversation::{ConversationHistory, Message};
use crate::speak::TokenSource;

const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:11434";
const DEFAULT_MODEL: &str = "llama3.2";

/// Streaming chat responder backed by an Ollama server.
#[derive(Clone)]
pub struct OllamaResponder {
    endpoint: String,
    model: String,
    client: reqwest::Client,
    retriever: Option<Arc<dyn Retriever>>,
}

impl OllamaResponder {
    pub fn new(endpoint: &str, model: &str) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client: reqwest::Client::new(),
            retriever: None,
        }
    }

    pub fn from_config(config: &AdapterConfig) -> Self {
        Self::new(
            config.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT),
            config.model.as_deref().unwrap_or(DEFAULT_MODEL),
        )
    }

    /// Ground replies with context from `retriever` when it has any.
    pub fn with_retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.endpoint)
    }

    async fn post_chat(&self, messages: &[Message], stream: bool) -> anyhow::Result<reqwest::Response> {
        let body = chat_body(&self.model, messages, stream);
        let resp = self
            .client
            .post(self.chat_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Ollama request failed: {}", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Ollama API error {}: {}", status, body);
        }
        Ok(resp)
    }

    /// Non-streaming chat call returning the whole reply.
    pub async fn chat_once(&self, messages: &[Message]) -> anyhow::Result<String> {
        let resp = self.post_chat(messages, false).await?;
        let line: ChatLine = resp
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to parse Ollama response: {}", e))?;
        if let Some(err) = line.error {
            anyhow::bail!("Ollama error: {}", err);
        }
        Ok(line.message.map(|m| m.content).unwrap_or_default())
    }
}

impl Responder for OllamaResponder {
    fn respond<'a>(
        &'a self,
        history: &'a ConversationHistory,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<TokenSource>> + Send + 'a>> {
        Box::pin(async move {
            let retrieval = match (&self.retriever, history.last_user()) {
                (Some(retriever), Some(query)) => Some(retriever.retrieve(&query.content).await),
                _ => None,
            };
            if let Some(Retrieval::Unavailable(reason)) = &retrieval {
                warn!("Retrieval unavailable ({}), answering directly", reason);
            }

            let (messages, mode) = build_messages(history, retrieval.as_ref());
            match mode {
                ReplyMode::Grounded => info!("Answering with retrieved context"),
                ReplyMode::DirectNoMatches => info!("Retrieval found no matches, answering directly"),
                ReplyMode::DirectUnavailable | ReplyMode::Direct => {}
            }

            debug!(model = %self.model, messages = messages.len(), "Ollama chat request");
            let resp = self.post_chat(&messages, true).await?;

            let tokens = resp
                .bytes_stream()
                .scan(NdjsonDecoder::default(), |decoder, chunk| {
                    let out = match chunk {
                        Ok(bytes) => decoder.push(&bytes),
                        Err(e) => vec![Err(anyhow::anyhow!("Ollama stream error: {}", e))],
                    };
                    future::ready(Some(stream::iter(out)))
                })
                .flatten()
                .boxed();
            Ok(TokenSource::Stream(tokens))
        })
    }

    fn name(&self) -> String {
        format!("Ollama ({})", self.model)
    }
}

fn chat_body(model: &str, messages: &[Message], stream: bool) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = messages
        .iter()
        .map(|m| serde_json::json!({ "role": m.role.as_str(), "content": m.content }))
        .collect();
    serde_json::json!({
        "model": model,
        "messages": messages,
        "stream": stream,
    })
}

#[derive(Debug, Deserialize)]
struct ChatLine {
    #[serde(default)]
    message: Option<ChatContent>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatContent {
    #[serde(default)]
    content: String,
}

/// Splits a byte stream into JSON lines and pulls out content fragments.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    pending: Vec<u8>,
    done: bool,
}

impl NdjsonDecoder {
    /// Feed raw bytes; returns the fragments completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<anyhow::Result<String>> {
        self.pending.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            if self.done {
                continue;
            }
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<ChatLine>(line) {
                Ok(parsed) => {
                    if let Some(err) = parsed.error {
                        out.push(Err(anyhow::anyhow!("Ollama error: {}", err)));
                        self.done = true;
                        continue;
                    }
                    if let Some(msg) = parsed.message {
                        if !msg.content.is_empty() {
                            out.push(Ok(msg.content));
                        }
                    }
                    self.done = parsed.done;
                }
                Err(e) => warn!("Skipping malformed chat line: {}", e),
            }
        }
        out
    }

    pub fn is_done(&self) -> bool {
        self.done
    }
}
