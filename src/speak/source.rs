//! Token sources the speech pipeline consumes.

use futures_util::stream::{self, BoxStream, StreamExt};

/// Text to be spoken, arriving all at once or token by token.
///
/// All variants are consumed the same way through [`into_stream`](Self::into_stream).
pub enum TokenSource {
    /// A complete reply. Split on whitespace, keeping the separators.
    Text(String),
    /// A finite synchronous token sequence.
    Tokens(Box<dyn Iterator<Item = String> + Send>),
    /// An asynchronous token stream, e.g. from a streaming LLM response.
    Stream(BoxStream<'static, anyhow::Result<String>>),
}

impl TokenSource {
    pub fn from_tokens<I>(tokens: I) -> Self
    where
        I: IntoIterator<Item = String>,
        I::IntoIter: Send + 'static,
    {
        Self::Tokens(Box::new(tokens.into_iter()))
    }

    pub fn into_stream(self) -> BoxStream<'static, anyhow::Result<String>> {
        match self {
            Self::Text(text) => {
                let tokens = split_tokens(&text);
                stream::iter(tokens.into_iter().map(Ok)).boxed()
            }
            Self::Tokens(iter) => stream::iter(iter.map(Ok)).boxed(),
            Self::Stream(s) => s,
        }
    }
}

impl From<String> for TokenSource {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for TokenSource {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl std::fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(t) => f.debug_tuple("Text").field(t).finish(),
            Self::Tokens(_) => f.write_str("Tokens(..)"),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Split text into word tokens that keep their trailing whitespace, so the
/// tokens concatenate back to the input exactly.
pub fn split_tokens(text: &str) -> Vec<String> {
    text.split_inclusive(char::is_whitespace)
        .map(str::to_string)
        .collect()
}
