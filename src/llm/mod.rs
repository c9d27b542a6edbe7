//! Response generation: the token source behind the Processing phase.
//!
//! Retrieval is optional and its outcome is explicit: a retriever that is
//! down and one that found nothing both fall back to a direct model call,
//! but they are logged and reported differently.

pub mod ollama;
pub mod summarize;

use std::future::Future;
use std::pin::Pin;

use crate::conversation::{ConversationHistory, Message, Role};
use crate::speak::TokenSource;

pub use ollama::OllamaResponder;
pub use summarize::LlmSummarizer;

/// Produces the reply token source for the current history.
pub trait Responder: Send + Sync {
    fn respond<'a>(
        &'a self,
        history: &'a ConversationHistory,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<TokenSource>> + Send + 'a>>;

    fn name(&self) -> String;
}

/// What a retrieval attempt produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Retrieval {
    /// The retriever could not be queried (not configured, index down, ...).
    Unavailable(String),
    /// The query ran but matched nothing.
    NoMatches,
    /// Context passages to ground the reply in.
    Context(String),
}

/// Looks up context for a query.
pub trait Retriever: Send + Sync {
    fn retrieve<'a>(&'a self, query: &'a str) -> Pin<Box<dyn Future<Output = Retrieval> + Send + 'a>>;
}

/// How a reply was produced, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyMode {
    Grounded,
    DirectNoMatches,
    DirectUnavailable,
    Direct,
}

/// Chat messages for a reply, grounded in `retrieval` when it carried context.
///
/// Grounding replaces the last user turn with a prompt wrapping the context
/// around the question; the recorded history is not changed.
pub fn build_messages(history: &ConversationHistory, retrieval: Option<&Retrieval>) -> (Vec<Message>, ReplyMode) {
    let mut messages = history.chat_messages();
    let mode = match retrieval {
        None => ReplyMode::Direct,
        Some(Retrieval::Unavailable(_)) => ReplyMode::DirectUnavailable,
        Some(Retrieval::NoMatches) => ReplyMode::DirectNoMatches,
        Some(Retrieval::Context(context)) => {
            if let Some(last) = messages.iter_mut().rev().find(|m| m.role == Role::User) {
                last.content = grounded_prompt(context, &last.content);
                ReplyMode::Grounded
            } else {
                ReplyMode::Direct
            }
        }
    };
    (messages, mode)
}

fn grounded_prompt(context: &str, question: &str) -> String {
    format!(
        "Context information is below.\n\
         ---------------------\n\
         {}\n\
         ---------------------\n\
         Given the context information and not prior knowledge, answer the following question:\n\
         {}",
        context.trim(),
        question
    )
}
