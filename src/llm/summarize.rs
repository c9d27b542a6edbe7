//! Session summary via the chat model.

use std::future::Future;
use std::pin::Pin;

use tracing::{debug, info};

use super::OllamaResponder;
use crate::conversation::{ConversationHistory, Message, Role, Summarizer};

const SYSTEM_PROMPT: &str = "You are an objective summarization engine. Your sole task is to create a \
neutral, third-person summary of the provided conversation text, focusing only on the interaction \
sequence and content. Do not inject any personality or evaluation.";

const INSTRUCTIONS: &str = "Objectively summarize the conversation below between a User and an AI \
Assistant. Use a neutral, factual tone and write in the third person (\"The user asked...\", \"The \
assistant explained...\"). Cover the key topics, questions, answers, and stated goals. Keep it \
concise and add no introductory or concluding remarks.";

/// Summarizes a session with a single non-streaming chat call.
#[derive(Clone)]
pub struct LlmSummarizer {
    client: OllamaResponder,
}

impl LlmSummarizer {
    pub fn new(client: OllamaResponder) -> Self {
        Self { client }
    }
}

/// The two messages sent to the model, or `None` when there is nothing to summarize.
pub fn summary_request(history: &ConversationHistory) -> Option<Vec<Message>> {
    if history.is_empty() {
        return None;
    }
    let prompt = format!(
        "{}\n\nConversation history:\n{}\n\nSummary:",
        INSTRUCTIONS,
        history.transcript()
    );
    Some(vec![
        Message::new(Role::System, SYSTEM_PROMPT),
        Message::new(Role::User, prompt),
    ])
}

impl Summarizer for LlmSummarizer {
    fn summarize<'a>(
        &'a self,
        history: &'a ConversationHistory,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
        Box::pin(async move {
            let Some(messages) = summary_request(history) else {
                debug!("History is empty, skipping summarization");
                return Ok(String::new());
            };
            info!(turns = history.len(), "Summarizing session");
            let summary = self.client.chat_once(&messages).await?;
            Ok(summary.trim().to_string())
        })
    }
}
