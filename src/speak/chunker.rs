//! Incremental text chunking for streaming synthesis.
//!
//! The first chunk is cut early (a few words or the first delimiter) to get
//! audio out quickly; later chunks are cut on delimiters only, so they carry
//! whole clauses. Chunks are returned verbatim: concatenating every chunk
//! reproduces the input exactly.

use crate::config::ChunkingConfig;

/// Accumulates tokens and cuts speakable chunks.
#[derive(Debug, Clone)]
pub struct TextChunker {
    buffer: String,
    initial_emitted: bool,
    target_words: usize,
    delimiters: Vec<char>,
    max_chars: usize,
}

impl TextChunker {
    pub fn new(config: &ChunkingConfig) -> Self {
        Self {
            buffer: String::new(),
            initial_emitted: false,
            target_words: config.initial_chunk_target_words.max(1),
            delimiters: config.delimiters.chars().collect(),
            max_chars: config.max_buffer_chars,
        }
    }

    /// Append a token; returns a chunk when a cut fires.
    pub fn push(&mut self, token: &str) -> Option<String> {
        self.buffer.push_str(token);
        if self.should_cut() {
            return Some(self.cut());
        }
        None
    }

    /// Flush whatever is left once the source is exhausted.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        Some(self.cut())
    }

    /// Text received since the last cut.
    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    pub fn initial_emitted(&self) -> bool {
        self.initial_emitted
    }

    fn should_cut(&self) -> bool {
        if self.ends_with_delimiter() {
            return true;
        }
        if !self.initial_emitted {
            return self.buffer.split_whitespace().count() >= self.target_words;
        }
        // Delimiter-free streams would otherwise buffer until the very end.
        self.max_chars > 0 && self.buffer.chars().count() >= self.max_chars
    }

    /// A delimiter at the very end, or just before trailing whitespace.
    fn ends_with_delimiter(&self) -> bool {
        let is_delim = |c: char| self.delimiters.contains(&c);
        self.buffer.chars().next_back().is_some_and(is_delim)
            || self.buffer.trim_end().chars().next_back().is_some_and(is_delim)
    }

    fn cut(&mut self) -> String {
        self.initial_emitted = true;
        std::mem::take(&mut self.buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(target_words: usize) -> TextChunker {
        TextChunker::new(&ChunkingConfig {
            initial_chunk_target_words: target_words,
            ..Default::default()
        })
    }

    fn run(chunker: &mut TextChunker, tokens: &[&str]) -> Vec<String> {
        let mut chunks: Vec<String> = tokens.iter().filter_map(|t| chunker.push(t)).collect();
        chunks.extend(chunker.finish());
        chunks
    }

    #[test]
    fn test_first_cut_on_delimiter_before_word_target() {
        let tokens = ["Hi", " there", ", ", "how", " are", " you", "?"];
        let chunks = run(&mut chunker(3), &tokens);
        assert_eq!(chunks[0], "Hi there, ");
        assert_eq!(chunks, vec!["Hi there, ", "how are you?"]);
    }

    #[test]
    fn test_first_cut_on_word_target() {
        let tokens = ["one", " two", " three", " four", " five", " six."];
        let chunks = run(&mut chunker(3), &tokens);
        assert_eq!(chunks, vec!["one two three", " four five six."]);
    }

    #[test]
    fn test_later_chunks_ignore_word_target() {
        let tokens = ["Okay.", " this", " has", " many", " words", " before", " a", " stop", "!"];
        let chunks = run(&mut chunker(2), &tokens);
        assert_eq!(chunks, vec!["Okay.", " this has many words before a stop!"]);
    }

    #[test]
    fn test_newline_is_a_delimiter() {
        let chunks = run(&mut chunker(10), &["Title", "\n", "Body text"]);
        assert_eq!(chunks, vec!["Title\n", "Body text"]);
    }

    #[test]
    fn test_en_dash_is_a_delimiter() {
        let chunks = run(&mut chunker(10), &["Wait \u{2013} ", "then go"]);
        assert_eq!(chunks, vec!["Wait \u{2013} ", "then go"]);
    }

    #[test]
    fn test_buffer_cap_forces_cut_after_first_chunk() {
        let mut c = TextChunker::new(&ChunkingConfig {
            initial_chunk_target_words: 1,
            max_buffer_chars: 10,
            ..Default::default()
        });
        assert_eq!(c.push("go "), Some("go ".to_string()));
        assert_eq!(c.push("aaaa "), None);
        assert_eq!(c.push("bbbbb"), Some("aaaa bbbbb".to_string()));
    }

    #[test]
    fn test_concatenation_reproduces_stream() {
        let text = "Well, that's interesting! Let me think about it for a moment. \
                    First; the weather \u{2013} it is sunny.\nSecond, the news? None";
        let tokens = crate::speak::source::split_tokens(text);
        let refs: Vec<&str> = tokens.iter().map(String::as_str).collect();
        for target in 1..10 {
            let chunks = run(&mut chunker(target), &refs);
            assert_eq!(chunks.concat(), text, "target {}", target);
            assert!(chunks.iter().all(|c| !c.is_empty()));
        }
    }

    #[test]
    fn test_buffer_tracks_uncut_tokens() {
        let mut c = chunker(5);
        c.push("a");
        c.push(" b");
        assert_eq!(c.buffered(), "a b");
        assert!(!c.initial_emitted());
        c.push(".");
        assert_eq!(c.buffered(), "");
        assert!(c.initial_emitted());
    }

    #[test]
    fn test_finish_on_empty_buffer() {
        assert_eq!(chunker(3).finish(), None);
    }
}
