//! Chunking and streaming synthesis.

pub mod chunker;
pub mod pipeline;
pub mod source;

pub use chunker::TextChunker;
pub use pipeline::{AudioOutput, SpeakOutcome, SpeechPipeline};
pub use source::TokenSource;
