//! Audio playback: the sink seam and the queue-driven engine in front of it.

pub mod engine;
pub mod sink;

pub use engine::{drain_timeout_for, PlaybackEngine, PlaybackItem};
pub use sink::{rodio_factory, PlaybackSink, RodioSink, SinkFactory, WriteOutcome};
