//! Conversation history and end-of-session summarization.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One turn of the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Append-only, ordered record of a session.
///
/// Only the interaction state machine writes to it. Blank messages are
/// ignored so failed phases leave no empty turns behind.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    session_id: Uuid,
    system_prompt: Option<String>,
    messages: Vec<Message>,
}

impl ConversationHistory {
    pub fn new(system_prompt: Option<String>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            system_prompt: system_prompt.filter(|p| !p.trim().is_empty()),
            messages: Vec::new(),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn push_user(&mut self, content: &str) -> bool {
        self.push(Role::User, content)
    }

    pub fn push_assistant(&mut self, content: &str) -> bool {
        self.push(Role::Assistant, content)
    }

    fn push(&mut self, role: Role, content: &str) -> bool {
        let content = content.trim();
        if content.is_empty() {
            return false;
        }
        self.messages.push(Message::new(role, content));
        true
    }

    /// User and assistant turns, oldest first.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Messages as sent to a chat model: the system prompt, then every turn.
    pub fn chat_messages(&self) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.messages.len() + 1);
        if let Some(prompt) = &self.system_prompt {
            out.push(Message::new(Role::System, prompt.clone()));
        }
        out.extend(self.messages.iter().cloned());
        out
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Most recent user turn.
    pub fn last_user(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::User)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// "User: ...\nAssistant: ..." rendering of the user/assistant turns.
    pub fn transcript(&self) -> String {
        self.messages
            .iter()
            .map(|m| {
                let role = m.role.as_str();
                let mut name = role[..1].to_uppercase();
                name.push_str(&role[1..]);
                format!("{}: {}", name, m.content)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Produces a summary of a finished session.
pub trait Summarizer: Send + Sync {
    fn summarize<'a>(
        &'a self,
        history: &'a ConversationHistory,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>>;
}
